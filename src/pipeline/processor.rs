use super::result::ItemOutcome;
use crate::strategy::FrontierEntry;
use async_trait::async_trait;
use std::future::Future;
use std::marker::PhantomData;

/// Something the pipeline can carry
pub trait PipelineItem: Send + Sync + 'static {
    fn url(&self) -> &str;
}

impl PipelineItem for String {
    fn url(&self) -> &str {
        self
    }
}

impl PipelineItem for FrontierEntry {
    fn url(&self) -> &str {
        &self.url
    }
}

/// Work performed by pipeline workers on each item
///
/// Errors and panics are turned into failed results by the pipeline.
#[async_trait]
pub trait ItemProcessor<T: PipelineItem>: Send + Sync {
    /// Runs before the per-item timeout starts
    ///
    /// Waiting for a pacing slot belongs here, so a long queue for one host
    /// is not mistaken for a slow item.
    async fn prepare(&self, _item: &T) {}

    async fn process(&self, item: &T) -> crate::Result<ItemOutcome>;
}

/// Adapts an async closure over the item's URL into an [`ItemProcessor`]
pub struct FnProcessor<T, F> {
    func: F,
    _item: PhantomData<fn(&T)>,
}

pub fn processor_fn<T, F, Fut>(func: F) -> FnProcessor<T, F>
where
    T: PipelineItem,
    F: Fn(String) -> Fut + Send + Sync,
    Fut: Future<Output = crate::Result<ItemOutcome>> + Send,
{
    FnProcessor {
        func,
        _item: PhantomData,
    }
}

#[async_trait]
impl<T, F, Fut> ItemProcessor<T> for FnProcessor<T, F>
where
    T: PipelineItem,
    F: Fn(String) -> Fut + Send + Sync,
    Fut: Future<Output = crate::Result<ItemOutcome>> + Send,
{
    async fn process(&self, item: &T) -> crate::Result<ItemOutcome> {
        (self.func)(item.url().to_string()).await
    }
}
