pub mod config;
pub mod error;
pub mod events;
pub mod logging;
pub mod scheduler;

pub use config::{ResourceConfig, ENV_PREFIX};
pub use error::{ErrorCategory, ResourceError, ResourceResult};
pub use events::EventBus;
pub use logging::{setup_logging, LogFormat, LogOutput, LoggingConfig};
pub use scheduler::PeriodicTask;
