use async_trait::async_trait;

/// Source of pooled resources
///
/// The pool never inspects the resource itself. Failures returned from
/// `create` surface to the caller as `ConnectionFailed`; failures from
/// `destroy` are logged and emitted but never propagated.
#[async_trait]
pub trait ConnectionFactory: Send + Sync + 'static {
    type Connection: Send + Sync + 'static;

    async fn create(&self) -> anyhow::Result<Self::Connection>;

    /// Return `false` to have the connection destroyed instead of reused.
    async fn validate(&self, connection: &Self::Connection) -> bool;

    async fn destroy(&self, connection: Self::Connection) -> anyhow::Result<()>;
}
