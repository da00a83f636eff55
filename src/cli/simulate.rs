use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use futures_util::future::join_all;
use serde_json::{json, Value};
use tracing::{debug, info, warn};

use crate::infrastructure::config::ResourceConfig;
use crate::infrastructure::error::ResourceResult;
use crate::orchestrator::{CommandRequest, CommandRunner, OrchestratorMetrics, ResourceOrchestrator};
use crate::pool::ConnectionFactory;

const READ_OPERATIONS: [&str; 4] = ["list", "show", "next", "status"];

/// In-process stand-in for a CLI session
#[derive(Debug)]
pub struct EchoSession {
    pub id: u64,
    pub executed: u64,
}

#[derive(Debug, Default)]
pub struct EchoFactory {
    next_id: AtomicU64,
}

#[async_trait]
impl ConnectionFactory for EchoFactory {
    type Connection = EchoSession;

    async fn create(&self) -> anyhow::Result<EchoSession> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        debug!(session = id, "echo session opened");
        Ok(EchoSession { id, executed: 0 })
    }

    async fn validate(&self, _session: &EchoSession) -> bool {
        true
    }

    async fn destroy(&self, session: EchoSession) -> anyhow::Result<()> {
        debug!(session = session.id, executed = session.executed, "echo session closed");
        Ok(())
    }
}

/// Echoes each request back after a fixed delay
#[derive(Debug, Clone)]
pub struct EchoRunner {
    latency: Duration,
}

impl EchoRunner {
    pub fn new(latency: Duration) -> Self {
        Self { latency }
    }
}

#[async_trait]
impl CommandRunner<EchoSession> for EchoRunner {
    async fn run(&self, session: &mut EchoSession, request: &CommandRequest) -> anyhow::Result<Value> {
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        session.executed += 1;
        Ok(json!({
            "repository": request.repository,
            "operation": request.operation,
            "args": request.args,
            "session": session.id,
        }))
    }
}

#[derive(Debug, Clone)]
pub struct SimulationOptions {
    pub requests: usize,
    pub repositories: usize,
    pub latency: Duration,
    /// Every n-th request is a mutation; 0 disables mutations
    pub mutation_every: usize,
}

impl Default for SimulationOptions {
    fn default() -> Self {
        Self {
            requests: 200,
            repositories: 4,
            latency: Duration::from_millis(2),
            mutation_every: 10,
        }
    }
}

fn request_for(index: usize, options: &SimulationOptions) -> CommandRequest {
    let repository = format!("/srv/repos/project-{}", index % options.repositories.max(1));
    if options.mutation_every > 0 && index % options.mutation_every == options.mutation_every - 1 {
        return CommandRequest::new(repository, "set-status")
            .with_arg("id", (index % 7) as u64)
            .with_arg("status", "done");
    }
    let operation = READ_OPERATIONS[index % READ_OPERATIONS.len()];
    CommandRequest::new(repository, operation)
        .with_arg("id", (index % 7) as u64)
        .with_priority((index % 3) as i32)
}

/// Drive an orchestrator with synthetic load and return its final metrics
pub async fn run_simulation(config: ResourceConfig, options: SimulationOptions) -> ResourceResult<OrchestratorMetrics> {
    let orchestrator = ResourceOrchestrator::new(config, EchoFactory::default(), EchoRunner::new(options.latency))?;
    orchestrator.start().await?;

    info!(requests = options.requests, repositories = options.repositories, "starting simulation");
    let results = join_all((0..options.requests).map(|index| orchestrator.execute(request_for(index, &options)))).await;

    let failed = results.iter().filter(|result| result.is_err()).count();
    if failed > 0 {
        warn!(failed, "some simulated requests failed");
    }

    let metrics = orchestrator.metrics();
    orchestrator.shutdown().await;
    info!(
        succeeded = results.len() - failed,
        failed,
        cache_hit_rate = metrics.cache.hit_rate,
        "simulation finished"
    );
    Ok(metrics)
}
