use std::collections::{HashMap, VecDeque};
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, oneshot};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::infrastructure::error::{ResourceError, ResourceResult};
use crate::infrastructure::events::EventBus;
use crate::infrastructure::scheduler::PeriodicTask;
use crate::pool::factory::ConnectionFactory;

/// Rolling window for the average acquire time
const ACQUIRE_SAMPLE_WINDOW: usize = 100;
const CREATE_RETRY_BACKOFF_MS: u64 = 100;

/// Connection pool configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct PoolConfig {
    pub min_connections: usize,
    pub max_connections: usize,
    pub acquire_timeout_ms: u64,
    pub idle_timeout_ms: u64,
    pub health_check_interval_ms: u64,
    /// Extra attempts for background creation (warm-up and replenishment)
    pub max_retries: u32,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            min_connections: 1,
            max_connections: 10,
            acquire_timeout_ms: 30_000,
            idle_timeout_ms: 5 * 60 * 1000,
            health_check_interval_ms: 60_000,
            max_retries: 3,
        }
    }
}

impl PoolConfig {
    pub fn validate(&self) -> ResourceResult<()> {
        if self.max_connections == 0 {
            return Err(ResourceError::validation(
                "maxConnections must be at least 1",
                Some("pool.maxConnections"),
            ));
        }
        if self.min_connections > self.max_connections {
            return Err(ResourceError::validation(
                format!(
                    "minConnections ({}) exceeds maxConnections ({})",
                    self.min_connections, self.max_connections
                ),
                Some("pool.minConnections"),
            ));
        }
        if self.acquire_timeout_ms == 0 {
            return Err(ResourceError::validation(
                "acquireTimeoutMs must be positive",
                Some("pool.acquireTimeoutMs"),
            ));
        }
        if self.health_check_interval_ms == 0 {
            return Err(ResourceError::validation(
                "healthCheckIntervalMs must be positive",
                Some("pool.healthCheckIntervalMs"),
            ));
        }
        Ok(())
    }

    pub fn acquire_timeout(&self) -> Duration {
        Duration::from_millis(self.acquire_timeout_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PoolEvent {
    Created { connection_id: u64 },
    Acquired { connection_id: u64 },
    Released { connection_id: u64 },
    Unhealthy { connection_id: u64 },
    Destroyed { connection_id: u64, error: Option<String> },
    AcquireTimeout { waiting: usize },
}

/// Point-in-time pool figures
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PoolStatistics {
    pub total_connections: usize,
    pub available_connections: usize,
    pub busy_connections: usize,
    pub pending_requests: usize,
    pub creating: usize,
    pub healthy_connections: usize,
    pub total_acquired: u64,
    pub total_released: u64,
    pub total_created: u64,
    pub total_destroyed: u64,
    pub total_timeouts: u64,
    pub failed_creates: u64,
    pub unhealthy_detected: u64,
    pub average_acquire_time_ms: f64,
    pub shutting_down: bool,
}

/// Outcome of one health sweep over the idle set
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthCheckReport {
    pub checked: usize,
    pub healthy: usize,
    pub idle_expired: usize,
    pub unhealthy: usize,
}

#[derive(Debug)]
struct ConnectionMeta {
    in_use: bool,
    healthy: bool,
}

struct Idle<C> {
    id: u64,
    created_at: Instant,
    last_used_at: Instant,
    resource: C,
}

struct Waiter<F: ConnectionFactory> {
    id: u64,
    enqueued_at: Instant,
    sender: oneshot::Sender<ResourceResult<Connection<F>>>,
}

#[derive(Debug, Default)]
struct PoolCounters {
    acquired: u64,
    released: u64,
    created: u64,
    destroyed: u64,
    timeouts: u64,
    failed_creates: u64,
    unhealthy: u64,
}

struct PoolState<F: ConnectionFactory> {
    /// Every live connection, idle or not
    connections: HashMap<u64, ConnectionMeta>,
    available: VecDeque<Idle<F::Connection>>,
    waiters: VecDeque<Waiter<F>>,
    /// Slots reserved for creations that have not returned yet
    pending_creates: usize,
    shutting_down: bool,
    counters: PoolCounters,
    acquire_times: VecDeque<Duration>,
}

impl<F: ConnectionFactory> PoolState<F> {
    fn reserved(&self) -> usize {
        self.connections.len() + self.pending_creates
    }

    fn record_acquire(&mut self, waited: Duration) {
        self.counters.acquired += 1;
        self.acquire_times.push_back(waited);
        while self.acquire_times.len() > ACQUIRE_SAMPLE_WINDOW {
            self.acquire_times.pop_front();
        }
    }

    fn has_live_waiters(&self) -> bool {
        self.waiters.iter().any(|waiter| !waiter.sender.is_closed())
    }
}

enum AcquirePlan<F: ConnectionFactory> {
    Ready(Idle<F::Connection>),
    Create,
    Wait {
        waiter_id: u64,
        receiver: oneshot::Receiver<ResourceResult<Connection<F>>>,
        /// A slot was reserved for the queue head and still needs filling
        fill: bool,
    },
}

enum CreateOutcome<C> {
    Ready(Idle<C>),
    ShutDown(C),
    /// Error message and the number of slots reserved for queued callers
    Failed(String, usize),
}

/// A checked-out connection
///
/// Hand it back with [`ConnectionPool::release`]. Dropping it instead also
/// returns it to the pool from a background task.
pub struct Connection<F: ConnectionFactory> {
    id: u64,
    created_at: Instant,
    last_used_at: Instant,
    resource: Option<F::Connection>,
    pool: Weak<PoolInner<F>>,
}

impl<F: ConnectionFactory> Connection<F> {
    fn checkout(idle: Idle<F::Connection>, pool: &Arc<PoolInner<F>>, now: Instant) -> Self {
        Self {
            id: idle.id,
            created_at: idle.created_at,
            last_used_at: now,
            resource: Some(idle.resource),
            pool: Arc::downgrade(pool),
        }
    }

    fn into_idle(mut self) -> Option<Idle<F::Connection>> {
        self.pool = Weak::new();
        let resource = self.resource.take()?;
        Some(Idle {
            id: self.id,
            created_at: self.created_at,
            last_used_at: self.last_used_at,
            resource,
        })
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn created_at(&self) -> Instant {
        self.created_at
    }

    pub fn last_used_at(&self) -> Instant {
        self.last_used_at
    }
}

impl<F: ConnectionFactory> std::fmt::Debug for Connection<F> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("created_at", &self.created_at)
            .field("last_used_at", &self.last_used_at)
            .finish()
    }
}

impl<F: ConnectionFactory> Deref for Connection<F> {
    type Target = F::Connection;

    fn deref(&self) -> &Self::Target {
        // Only emptied by `into_idle`, which consumes the handle
        self.resource.as_ref().expect("pooled connection already returned")
    }
}

impl<F: ConnectionFactory> DerefMut for Connection<F> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.resource.as_mut().expect("pooled connection already returned")
    }
}

impl<F: ConnectionFactory> Drop for Connection<F> {
    fn drop(&mut self) {
        let Some(resource) = self.resource.take() else {
            return;
        };
        let Some(pool) = self.pool.upgrade() else {
            return;
        };
        let idle = Idle {
            id: self.id,
            created_at: self.created_at,
            last_used_at: self.last_used_at,
            resource,
        };
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move { pool.release_idle(idle).await });
            }
            Err(_) => pool.forget(idle.id),
        }
    }
}

struct PoolInner<F: ConnectionFactory> {
    factory: F,
    config: PoolConfig,
    state: Mutex<PoolState<F>>,
    events: EventBus<PoolEvent>,
    health_task: Mutex<Option<PeriodicTask>>,
    next_connection_id: AtomicU64,
    next_waiter_id: AtomicU64,
}

impl<F: ConnectionFactory> PoolInner<F> {
    async fn acquire(self: &Arc<Self>) -> ResourceResult<Connection<F>> {
        let started = Instant::now();

        let plan = {
            let mut guard = self.state.lock();
            let state = &mut *guard;
            if state.shutting_down {
                return Err(ResourceError::PoolShuttingDown);
            }

            if let Some(idle) = state.available.pop_front() {
                if let Some(meta) = state.connections.get_mut(&idle.id) {
                    meta.in_use = true;
                }
                state.record_acquire(started.elapsed());
                AcquirePlan::Ready(idle)
            } else if !state.has_live_waiters() && state.reserved() < self.config.max_connections {
                state.pending_creates += 1;
                AcquirePlan::Create
            } else {
                // Earlier callers keep their place even when a slot is free
                let (sender, receiver) = oneshot::channel();
                let waiter_id = self.next_waiter_id.fetch_add(1, Ordering::Relaxed);
                state.waiters.push_back(Waiter {
                    id: waiter_id,
                    enqueued_at: started,
                    sender,
                });
                let fill = self.reserve_slot(state);
                debug!(waiting = state.waiters.len(), "pool exhausted, queueing acquire");
                AcquirePlan::Wait {
                    waiter_id,
                    receiver,
                    fill,
                }
            }
        };

        match plan {
            AcquirePlan::Ready(idle) => {
                self.events.emit(PoolEvent::Acquired { connection_id: idle.id });
                Ok(Connection::checkout(idle, self, Instant::now()))
            }
            AcquirePlan::Create => self.create_for_caller(started).await,
            AcquirePlan::Wait {
                waiter_id,
                receiver,
                fill,
            } => {
                if fill {
                    self.spawn_fill(1);
                }
                self.wait_for_handoff(waiter_id, receiver, started + self.config.acquire_timeout())
                    .await
            }
        }
    }

    async fn create_for_caller(self: &Arc<Self>, started: Instant) -> ResourceResult<Connection<F>> {
        let created = self.factory.create().await;
        let now = Instant::now();

        let outcome = {
            let mut guard = self.state.lock();
            let state = &mut *guard;
            state.pending_creates = state.pending_creates.saturating_sub(1);
            match created {
                Ok(resource) if state.shutting_down => CreateOutcome::ShutDown(resource),
                Ok(resource) => {
                    let id = self.next_connection_id.fetch_add(1, Ordering::Relaxed);
                    state.connections.insert(
                        id,
                        ConnectionMeta {
                            in_use: true,
                            healthy: true,
                        },
                    );
                    state.counters.created += 1;
                    state.record_acquire(now.saturating_duration_since(started));
                    CreateOutcome::Ready(Idle {
                        id,
                        created_at: now,
                        last_used_at: now,
                        resource,
                    })
                }
                Err(e) => {
                    state.counters.failed_creates += 1;
                    // The freed slot goes to whoever queued meanwhile
                    let reserved = usize::from(self.reserve_slot(state));
                    CreateOutcome::Failed(e.to_string(), reserved)
                }
            }
        };

        match outcome {
            CreateOutcome::Ready(idle) => {
                debug!(connection_id = idle.id, "created connection");
                self.events.emit(PoolEvent::Created { connection_id: idle.id });
                self.events.emit(PoolEvent::Acquired { connection_id: idle.id });
                Ok(Connection::checkout(idle, self, now))
            }
            CreateOutcome::ShutDown(resource) => {
                if let Err(e) = self.factory.destroy(resource).await {
                    warn!(error = %e, "failed to destroy connection created during shutdown");
                }
                Err(ResourceError::PoolShuttingDown)
            }
            CreateOutcome::Failed(message, reserved) => {
                warn!(error = %message, "connection creation failed");
                self.spawn_fill(reserved);
                Err(ResourceError::ConnectionFailed { message })
            }
        }
    }

    async fn wait_for_handoff(
        &self,
        waiter_id: u64,
        mut receiver: oneshot::Receiver<ResourceResult<Connection<F>>>,
        deadline: Instant,
    ) -> ResourceResult<Connection<F>> {
        match tokio::time::timeout_at(deadline, &mut receiver).await {
            Ok(Ok(delivery)) => delivery,
            Ok(Err(_)) => Err(ResourceError::PoolShuttingDown),
            Err(_) => {
                let still_queued = {
                    let mut guard = self.state.lock();
                    let state = &mut *guard;
                    match state.waiters.iter().position(|waiter| waiter.id == waiter_id) {
                        Some(index) => {
                            state.waiters.remove(index);
                            state.counters.timeouts += 1;
                            Some(state.waiters.len())
                        }
                        None => None,
                    }
                };

                match still_queued {
                    Some(waiting) => {
                        warn!(
                            timeout_ms = self.config.acquire_timeout_ms,
                            waiting, "connection acquire timed out"
                        );
                        self.events.emit(PoolEvent::AcquireTimeout { waiting });
                        Err(ResourceError::AcquireTimeout {
                            timeout_ms: self.config.acquire_timeout_ms,
                            waiting,
                        })
                    }
                    // Handed a connection between the deadline and taking the lock
                    None => match receiver.try_recv() {
                        Ok(delivery) => delivery,
                        Err(_) => Err(ResourceError::PoolShuttingDown),
                    },
                }
            }
        }
    }

    /// Give `idle` to the longest-waiting live caller. Returns it when nobody takes it.
    fn hand_off(
        self: &Arc<Self>,
        state: &mut PoolState<F>,
        idle: Idle<F::Connection>,
    ) -> Option<Idle<F::Connection>> {
        let now = Instant::now();
        let mut idle = idle;

        while let Some(waiter) = state.waiters.pop_front() {
            if waiter.sender.is_closed() {
                continue;
            }
            let connection_id = idle.id;
            match waiter.sender.send(Ok(Connection::checkout(idle, self, now))) {
                Ok(()) => {
                    if let Some(meta) = state.connections.get_mut(&connection_id) {
                        meta.in_use = true;
                    }
                    state.record_acquire(now.saturating_duration_since(waiter.enqueued_at));
                    self.events.emit(PoolEvent::Acquired { connection_id });
                    return None;
                }
                Err(returned) => match returned.ok().and_then(Connection::into_idle) {
                    Some(back) => idle = back,
                    None => return None,
                },
            }
        }
        Some(idle)
    }

    async fn release_idle(self: &Arc<Self>, idle: Idle<F::Connection>) {
        let now = Instant::now();
        let mut idle = idle;
        idle.last_used_at = now;
        let id = idle.id;

        let retire = {
            let mut guard = self.state.lock();
            let state = &mut *guard;
            state.counters.released += 1;
            let retire = state.shutting_down || !state.connections.contains_key(&id);
            if retire {
                state.connections.remove(&id);
            } else if let Some(meta) = state.connections.get_mut(&id) {
                meta.in_use = false;
            }
            retire
        };
        self.events.emit(PoolEvent::Released { connection_id: id });

        if retire {
            self.destroy_resource(id, idle.resource).await;
            return;
        }

        if !self.factory.validate(&idle.resource).await {
            self.mark_unhealthy(id, "release");
            self.destroy_tracked(idle).await;
            return;
        }

        let leftover = {
            let mut guard = self.state.lock();
            let state = &mut *guard;
            if state.shutting_down || !state.connections.contains_key(&id) {
                state.connections.remove(&id);
                Some(idle)
            } else {
                if let Some(idle) = self.hand_off(state, idle) {
                    state.available.push_back(idle);
                }
                None
            }
        };
        if let Some(idle) = leftover {
            self.destroy_resource(idle.id, idle.resource).await;
        }
    }

    fn mark_unhealthy(&self, id: u64, context: &str) {
        {
            let mut state = self.state.lock();
            state.counters.unhealthy += 1;
            if let Some(meta) = state.connections.get_mut(&id) {
                meta.healthy = false;
            }
        }
        let error = ResourceError::ResourceInvalid {
            connection_id: id,
            message: format!("validation failed during {}", context),
        };
        warn!(error = %error, "destroying connection");
        self.events.emit(PoolEvent::Unhealthy { connection_id: id });
    }

    /// Remove from bookkeeping, destroy, then top the pool back up.
    async fn destroy_tracked(self: &Arc<Self>, idle: Idle<F::Connection>) {
        let reserved = self.untrack(idle.id);
        self.destroy_resource(idle.id, idle.resource).await;
        self.spawn_fill(reserved);
    }

    /// Drop `id` from bookkeeping and, under the same lock, reserve the freed
    /// slot for the queue head. Returns the number of slots reserved.
    fn untrack(&self, id: u64) -> usize {
        let mut guard = self.state.lock();
        let state = &mut *guard;
        state.connections.remove(&id);
        usize::from(self.reserve_slot(state))
    }

    /// Claim one creation slot when a live caller is queued below the
    /// maximum, or when the pool is below `min_connections`.
    fn reserve_slot(&self, state: &mut PoolState<F>) -> bool {
        if state.shutting_down {
            return false;
        }
        let reserved = state.reserved();
        let for_waiter = state.has_live_waiters() && reserved < self.config.max_connections;
        if !for_waiter && reserved >= self.config.min_connections {
            return false;
        }
        state.pending_creates += 1;
        true
    }

    async fn destroy_resource(&self, id: u64, resource: F::Connection) {
        self.state.lock().counters.destroyed += 1;
        let error = match self.factory.destroy(resource).await {
            Ok(()) => None,
            Err(e) => {
                warn!(connection_id = id, error = %e, "failed to destroy connection");
                Some(e.to_string())
            }
        };
        debug!(connection_id = id, "destroyed connection");
        self.events.emit(PoolEvent::Destroyed {
            connection_id: id,
            error,
        });
    }

    /// Bookkeeping-only removal for handles dropped outside a runtime.
    fn forget(&self, id: u64) {
        let mut state = self.state.lock();
        if state.connections.remove(&id).is_some() {
            state.counters.destroyed += 1;
        }
    }

    async fn create_with_retries(&self) -> ResourceResult<F::Connection> {
        let mut attempt = 0;
        loop {
            match self.factory.create().await {
                Ok(resource) => return Ok(resource),
                Err(e) if attempt < self.config.max_retries => {
                    attempt += 1;
                    warn!(attempt, error = %e, "background connection creation failed, retrying");
                    tokio::time::sleep(Duration::from_millis(CREATE_RETRY_BACKOFF_MS * attempt as u64)).await;
                }
                Err(e) => {
                    return Err(ResourceError::ConnectionFailed {
                        message: e.to_string(),
                    })
                }
            }
        }
    }

    /// Create into a slot already counted in `pending_creates`.
    ///
    /// The connection goes to the longest-waiting caller, else to the idle
    /// set. Returns `false` when the pool shut down in the meantime.
    async fn fill_reserved_slot(self: &Arc<Self>) -> ResourceResult<bool> {
        let resource = match self.create_with_retries().await {
            Ok(resource) => resource,
            Err(e) => {
                let mut state = self.state.lock();
                state.pending_creates = state.pending_creates.saturating_sub(1);
                state.counters.failed_creates += 1;
                return Err(e);
            }
        };

        let now = Instant::now();
        let retired = {
            let mut guard = self.state.lock();
            let state = &mut *guard;
            state.pending_creates = state.pending_creates.saturating_sub(1);
            if state.shutting_down {
                Some(resource)
            } else {
                let id = self.next_connection_id.fetch_add(1, Ordering::Relaxed);
                state.connections.insert(
                    id,
                    ConnectionMeta {
                        in_use: false,
                        healthy: true,
                    },
                );
                state.counters.created += 1;
                self.events.emit(PoolEvent::Created { connection_id: id });
                let idle = Idle {
                    id,
                    created_at: now,
                    last_used_at: now,
                    resource,
                };
                if let Some(idle) = self.hand_off(state, idle) {
                    state.available.push_back(idle);
                }
                None
            }
        };

        match retired {
            Some(resource) => {
                if let Err(e) = self.factory.destroy(resource).await {
                    warn!(error = %e, "failed to destroy connection created during shutdown");
                }
                Ok(false)
            }
            None => Ok(true),
        }
    }

    /// Create connections for live waiters first, then up to `min_connections`.
    async fn replenish(self: Arc<Self>) -> ResourceResult<usize> {
        let mut created = 0;

        loop {
            let reserved = {
                let mut guard = self.state.lock();
                self.reserve_slot(&mut guard)
            };
            if !reserved || !self.fill_reserved_slot().await? {
                break;
            }
            created += 1;
        }

        Ok(created)
    }

    /// Fill `reserved` pre-claimed slots in the background, then replenish.
    fn spawn_fill(self: &Arc<Self>, reserved: usize) {
        let inner = Arc::clone(self);
        tokio::spawn(async move {
            let mut remaining = reserved;
            while remaining > 0 {
                remaining -= 1;
                match inner.fill_reserved_slot().await {
                    Ok(true) => {}
                    outcome => {
                        if let Err(e) = outcome {
                            warn!(error = %e, "connection replenishment failed");
                        }
                        let mut state = inner.state.lock();
                        state.pending_creates = state.pending_creates.saturating_sub(remaining);
                        return;
                    }
                }
            }
            if let Err(e) = inner.replenish().await {
                warn!(error = %e, "connection replenishment failed");
            }
        });
    }

    async fn perform_health_check(self: &Arc<Self>) -> HealthCheckReport {
        let now = Instant::now();
        let idle_timeout = Duration::from_millis(self.config.idle_timeout_ms);
        let mut report = HealthCheckReport::default();

        let idle: Vec<Idle<F::Connection>> = {
            let mut state = self.state.lock();
            if state.shutting_down {
                return report;
            }
            state.available.drain(..).collect()
        };
        report.checked = idle.len();
        let mut reserved = 0;

        for connection in idle {
            let id = connection.id;
            if self.state.lock().shutting_down {
                // Shutdown already drained the idle set; these are ours to close
                self.destroy_resource(id, connection.resource).await;
                continue;
            }
            if self.config.idle_timeout_ms > 0
                && now.saturating_duration_since(connection.last_used_at) >= idle_timeout
            {
                report.idle_expired += 1;
                debug!(connection_id = id, "closing idle connection");
                reserved += self.untrack(id);
                self.destroy_resource(id, connection.resource).await;
                continue;
            }

            if !self.factory.validate(&connection.resource).await {
                report.unhealthy += 1;
                self.mark_unhealthy(id, "health check");
                reserved += self.untrack(id);
                self.destroy_resource(id, connection.resource).await;
                continue;
            }

            report.healthy += 1;
            let leftover = {
                let mut guard = self.state.lock();
                let state = &mut *guard;
                if state.shutting_down || !state.connections.contains_key(&id) {
                    state.connections.remove(&id);
                    Some(connection)
                } else {
                    if let Some(meta) = state.connections.get_mut(&id) {
                        meta.healthy = true;
                    }
                    if let Some(connection) = self.hand_off(state, connection) {
                        state.available.push_back(connection);
                    }
                    None
                }
            };
            if let Some(connection) = leftover {
                self.destroy_resource(connection.id, connection.resource).await;
            }
        }

        if report.idle_expired + report.unhealthy > 0 {
            self.spawn_fill(reserved);
        }
        debug!(?report, "pool health check finished");
        report
    }

    fn statistics(&self) -> PoolStatistics {
        let state = self.state.lock();
        let total = state.connections.len();
        let available = state.available.len();
        let average_acquire_time_ms = if state.acquire_times.is_empty() {
            0.0
        } else {
            let sum: Duration = state.acquire_times.iter().sum();
            sum.as_secs_f64() * 1000.0 / state.acquire_times.len() as f64
        };

        PoolStatistics {
            total_connections: total,
            available_connections: available,
            busy_connections: total.saturating_sub(available),
            pending_requests: state.waiters.len(),
            creating: state.pending_creates,
            healthy_connections: state.connections.values().filter(|meta| meta.healthy).count(),
            total_acquired: state.counters.acquired,
            total_released: state.counters.released,
            total_created: state.counters.created,
            total_destroyed: state.counters.destroyed,
            total_timeouts: state.counters.timeouts,
            failed_creates: state.counters.failed_creates,
            unhealthy_detected: state.counters.unhealthy,
            average_acquire_time_ms,
            shutting_down: state.shutting_down,
        }
    }

    async fn shutdown(&self) {
        let (waiters, idle) = {
            let mut guard = self.state.lock();
            let state = &mut *guard;
            if state.shutting_down {
                return;
            }
            state.shutting_down = true;
            let waiters: Vec<Waiter<F>> = state.waiters.drain(..).collect();
            let idle: Vec<Idle<F::Connection>> = state.available.drain(..).collect();
            // Connections still checked out are destroyed when they come back
            state.connections.clear();
            (waiters, idle)
        };

        let rejected = waiters.len();
        for waiter in waiters {
            let _ = waiter.sender.send(Err(ResourceError::PoolShuttingDown));
        }
        let closed = idle.len();
        for connection in idle {
            self.destroy_resource(connection.id, connection.resource).await;
        }

        // A sweep in progress holds idle connections of its own and closes
        // them once it sees the flag, so let it finish rather than abort it
        let health_task = self.health_task.lock().take();
        if let Some(task) = health_task {
            task.shutdown().await;
        }

        info!(rejected, closed, "connection pool shut down");
    }
}

/// Bounded connection pool with a FIFO wait-queue
///
/// Cloning yields another handle to the same pool.
pub struct ConnectionPool<F: ConnectionFactory> {
    inner: Arc<PoolInner<F>>,
}

impl<F: ConnectionFactory> Clone for ConnectionPool<F> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<F: ConnectionFactory> ConnectionPool<F> {
    pub fn new(factory: F, config: PoolConfig) -> ResourceResult<Self> {
        config.validate()?;
        Ok(Self {
            inner: Arc::new(PoolInner {
                factory,
                config,
                state: Mutex::new(PoolState {
                    connections: HashMap::new(),
                    available: VecDeque::new(),
                    waiters: VecDeque::new(),
                    pending_creates: 0,
                    shutting_down: false,
                    counters: PoolCounters::default(),
                    acquire_times: VecDeque::with_capacity(ACQUIRE_SAMPLE_WINDOW),
                }),
                events: EventBus::new(),
                health_task: Mutex::new(None),
                next_connection_id: AtomicU64::new(1),
                next_waiter_id: AtomicU64::new(1),
            }),
        })
    }

    pub fn config(&self) -> &PoolConfig {
        &self.inner.config
    }

    pub fn factory(&self) -> &F {
        &self.inner.factory
    }

    pub fn subscribe(&self) -> broadcast::Receiver<PoolEvent> {
        self.inner.events.subscribe()
    }

    /// Warm up to `min_connections` and start the health-check timer.
    pub async fn initialize(&self) -> ResourceResult<()> {
        if self.inner.state.lock().shutting_down {
            return Err(ResourceError::PoolShuttingDown);
        }

        {
            let mut slot = self.inner.health_task.lock();
            if slot.is_none() {
                let weak = Arc::downgrade(&self.inner);
                let period = Duration::from_millis(self.inner.config.health_check_interval_ms);
                *slot = Some(PeriodicTask::spawn("pool-health-check", period, move || {
                    let weak = weak.clone();
                    async move {
                        if let Some(inner) = weak.upgrade() {
                            inner.perform_health_check().await;
                        }
                    }
                }));
            }
        }

        let created = Arc::clone(&self.inner).replenish().await?;
        info!(
            created,
            min = self.inner.config.min_connections,
            max = self.inner.config.max_connections,
            "connection pool initialized"
        );
        Ok(())
    }

    /// Check out a connection, waiting at most `acquire_timeout_ms`.
    pub async fn acquire(&self) -> ResourceResult<Connection<F>> {
        self.inner.acquire().await
    }

    pub async fn release(&self, connection: Connection<F>) {
        if let Some(idle) = connection.into_idle() {
            self.inner.release_idle(idle).await;
        }
    }

    pub async fn destroy_connection(&self, connection: Connection<F>) {
        if let Some(idle) = connection.into_idle() {
            self.inner.destroy_tracked(idle).await;
        }
    }

    pub async fn perform_health_check(&self) -> HealthCheckReport {
        self.inner.perform_health_check().await
    }

    pub fn statistics(&self) -> PoolStatistics {
        self.inner.statistics()
    }

    pub fn is_shutting_down(&self) -> bool {
        self.inner.state.lock().shutting_down
    }

    pub async fn shutdown(&self) {
        self.inner.shutdown().await;
    }
}
