//! Isolated fan-out of independent invocations.
//!
//! Each item runs in its own task. A failure or panic in one is confined to
//! that item's result slot; the rest proceed.

use std::future::Future;

use tokio::task::JoinSet;

use crate::error::{PipelineError, PipelineResult};

/// Run `handler` once per item concurrently and return results in input order.
pub async fn run_isolated<I, T, F, Fut>(items: Vec<I>, handler: F) -> Vec<PipelineResult<T>>
where
    I: Send + 'static,
    T: Send + 'static,
    F: Fn(I) -> Fut,
    Fut: Future<Output = PipelineResult<T>> + Send + 'static,
{
    let mut set = JoinSet::new();
    let mut slots: Vec<Option<PipelineResult<T>>> = Vec::with_capacity(items.len());

    for (slot, item) in items.into_iter().enumerate() {
        slots.push(None);
        let invocation = handler(item);
        set.spawn(async move { (slot, invocation.await) });
    }

    // A panicked task cannot report its slot; its error fills the first gap.
    let mut lost = Vec::new();
    while let Some(joined) = set.join_next().await {
        match joined {
            Ok((slot, result)) => slots[slot] = Some(result),
            Err(err) => lost.push(PipelineError::Task(err.to_string())),
        }
    }

    let mut lost = lost.into_iter();
    slots
        .into_iter()
        .map(|slot| {
            slot.unwrap_or_else(|| {
                Err(lost
                    .next()
                    .unwrap_or_else(|| PipelineError::Task("task vanished".into())))
            })
        })
        .collect()
}
