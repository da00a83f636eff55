// Core components
pub mod batch;
pub mod cache;
pub mod memory;
pub mod pool;

// Composition and entry points
pub mod cli;
pub mod infrastructure;
pub mod orchestrator;

pub use infrastructure::{ResourceConfig, ResourceError, ResourceResult};
pub use orchestrator::{CommandRequest, CommandRunner, ResourceOrchestrator};
