pub mod overlay;
pub mod skeleton;
#[cfg(feature = "desktop")]
pub mod window;

pub use overlay::{DrawStats, OverlayCanvas, OverlayRenderer, OverlayStyle, OverlaySurface};
pub use skeleton::SKELETON_CONNECTIONS;
#[cfg(feature = "desktop")]
pub use window::OverlayWindow;
