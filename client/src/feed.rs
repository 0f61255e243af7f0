use futures::StreamExt;
use tokio::task::JoinHandle;

use chatty_common::protocol::{Subscription, SubscriptionEvent};
use chatty_common::CacheUpdate;

use crate::context::ClientContext;
use crate::error::ClientError;

/// A running subscription that feeds the shared cache.
///
/// The feed task is aborted on [`FeedHandle::cancel`] or when the handle is
/// dropped, which also drops the event stream and ends the subscription.
#[derive(Debug)]
pub struct FeedHandle {
    subscription: Subscription,
    task: JoinHandle<()>,
}

impl FeedHandle {
    pub fn subscription(&self) -> &Subscription {
        &self.subscription
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    pub fn cancel(self) {
        tracing::debug!(subscription = ?self.subscription, "cancelling feed");
        // Drop aborts the task.
    }
}

impl Drop for FeedHandle {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// Subscribe and write every matching event into the cache through
/// `to_update`.
pub async fn start_feed<F>(ctx: &ClientContext, subscription: Subscription, to_update: F) -> Result<FeedHandle, ClientError>
where
    F: Fn(SubscriptionEvent) -> Option<CacheUpdate> + Send + 'static,
{
    let mut events = ctx.data.subscribe(subscription.clone()).await?;
    let cache = ctx.cache.clone();
    let filter = subscription.clone();
    let task = tokio::spawn(async move {
        while let Some(event) = events.next().await {
            if !filter.matches(&event) {
                tracing::debug!(?event, "ignoring event outside feed");
                continue;
            }
            if let Some(update) = to_update(event) {
                cache.apply(update);
            }
        }
        tracing::debug!(subscription = ?filter, "feed ended");
    });
    tracing::debug!(?subscription, "feed started");
    Ok(FeedHandle { subscription, task })
}
