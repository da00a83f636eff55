pub mod factory;
pub mod manager;

pub use factory::ConnectionFactory;
pub use manager::{Connection, ConnectionPool, HealthCheckReport, PoolConfig, PoolEvent, PoolStatistics};
