pub mod command;
pub mod manager;

pub use command::{CommandRequest, CommandRunner, PooledCommandExecutor};
pub use manager::{OrchestratorConfig, OrchestratorMetrics, ResourceOrchestrator};
