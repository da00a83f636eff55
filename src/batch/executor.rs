use async_trait::async_trait;

/// 批处理执行器
///
/// `process` must return exactly one output per input, in input order.
#[async_trait]
pub trait BatchExecutor: Send + Sync + 'static {
    /// Payloads are cloned into each attempt so failed items can be retried
    type Item: Clone + Send + Sync + 'static;
    type Output: Send + 'static;

    async fn process(&self, items: Vec<Self::Item>) -> anyhow::Result<Vec<Self::Output>>;

    /// 是否可以批处理；返回 `false` 的项目会被立即单独执行
    fn can_batch(&self, _item: &Self::Item) -> bool {
        true
    }

    /// 估算内存占用（字节）
    fn estimate_memory_usage(&self, item: &Self::Item) -> usize {
        std::mem::size_of_val(item)
    }
}
