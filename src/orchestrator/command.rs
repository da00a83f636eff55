use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{debug, warn};

use crate::batch::BatchExecutor;
use crate::pool::{ConnectionFactory, ConnectionPool};

/// One keyed operation against a repository
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommandRequest {
    pub repository: String,
    pub operation: String,
    #[serde(default)]
    pub args: Map<String, Value>,
    /// Batch priority; the orchestrator default applies when absent
    #[serde(default)]
    pub priority: Option<i32>,
}

impl CommandRequest {
    pub fn new(repository: impl Into<String>, operation: impl Into<String>) -> Self {
        Self {
            repository: repository.into(),
            operation: operation.into(),
            args: Map::new(),
            priority: None,
        }
    }

    pub fn with_arg(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.args.insert(name.into(), value.into());
        self
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = Some(priority);
        self
    }

    /// Arguments as a JSON object, the form used for cache keys
    pub fn args_value(&self) -> Value {
        Value::Object(self.args.clone())
    }
}

/// 命令执行器：在一个池化连接上执行单个请求
#[async_trait]
pub trait CommandRunner<C: Send + Sync + 'static>: Send + Sync + 'static {
    async fn run(&self, connection: &mut C, request: &CommandRequest) -> anyhow::Result<Value>;
}

/// Batch executor that runs a whole batch on one pooled connection
///
/// Per-request failures come back as `Err(message)` in that request's slot,
/// so one bad command never fails its neighbours.
pub struct PooledCommandExecutor<F, R>
where
    F: ConnectionFactory,
    R: CommandRunner<F::Connection>,
{
    pool: ConnectionPool<F>,
    runner: Arc<R>,
    read_operations: HashSet<String>,
}

impl<F, R> PooledCommandExecutor<F, R>
where
    F: ConnectionFactory,
    R: CommandRunner<F::Connection>,
{
    pub fn new(pool: ConnectionPool<F>, runner: Arc<R>, read_operations: impl IntoIterator<Item = String>) -> Self {
        Self {
            pool,
            runner,
            read_operations: read_operations.into_iter().collect(),
        }
    }

    pub fn is_read_operation(&self, operation: &str) -> bool {
        self.read_operations.contains(operation)
    }
}

#[async_trait]
impl<F, R> BatchExecutor for PooledCommandExecutor<F, R>
where
    F: ConnectionFactory,
    R: CommandRunner<F::Connection>,
{
    type Item = CommandRequest;
    type Output = Result<Value, String>;

    async fn process(&self, items: Vec<CommandRequest>) -> anyhow::Result<Vec<Result<Value, String>>> {
        let mut connection = self.pool.acquire().await?;
        debug!(connection_id = connection.id(), size = items.len(), "running command batch");

        let mut outputs = Vec::with_capacity(items.len());
        for request in &items {
            match self.runner.run(&mut *connection, request).await {
                Ok(value) => outputs.push(Ok(value)),
                Err(e) => {
                    warn!(
                        repository = %request.repository,
                        operation = %request.operation,
                        error = %e,
                        "command failed"
                    );
                    outputs.push(Err(e.to_string()));
                }
            }
        }

        self.pool.release(connection).await;
        Ok(outputs)
    }

    fn can_batch(&self, item: &CommandRequest) -> bool {
        self.is_read_operation(&item.operation)
    }

    fn estimate_memory_usage(&self, item: &CommandRequest) -> usize {
        std::mem::size_of::<CommandRequest>()
            + item.repository.len()
            + item.operation.len()
            + serde_json::to_vec(&item.args).map(|bytes| bytes.len()).unwrap_or(0)
    }
}
