#[cfg(feature = "desktop")]
pub mod capture;
pub mod replay;
pub mod source;

#[cfg(feature = "desktop")]
pub use capture::ThreadedCamera;
pub use replay::ReplaySource;
pub use source::{CameraProvider, DeviceError, EncodedFrame, FrameSource};
