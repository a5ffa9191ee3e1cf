pub mod backend;
pub mod camera;
pub mod config;
pub mod logging;
pub mod narration;
pub mod orchestrator;
pub mod pacer;
pub mod pose;
pub mod protocol;
pub mod render;
pub mod session;
pub mod transport;

pub use orchestrator::{Collaborators, Command, Notice, Orchestrator, OrchestratorSettings};
