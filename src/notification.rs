//! Per-characteristic notification streams.

use bytes::Bytes;
use futures::stream::{self, Stream};
use tokio::sync::broadcast;
use tracing::warn;
use uuid::Uuid;

use crate::error::{AdapterError, Error, Result};

/// Item published on a characteristic's notification channel.
pub(crate) type NotificationEvent = std::result::Result<Bytes, AdapterError>;

/// Live subscription to value updates of one characteristic.
///
/// Only values published after the subscription was created are observed.
/// An adapter error is yielded once as `Err` and ends the subscription.
/// Dropping the subscription cancels it.
#[derive(Debug)]
pub struct NotificationStream {
    characteristic: Uuid,
    receiver: broadcast::Receiver<NotificationEvent>,
    finished: bool,
}

impl NotificationStream {
    pub(crate) fn new(characteristic: Uuid, receiver: broadcast::Receiver<NotificationEvent>) -> Self {
        Self {
            characteristic,
            receiver,
            finished: false,
        }
    }

    /// UUID of the characteristic this stream follows.
    pub fn characteristic(&self) -> Uuid {
        self.characteristic
    }

    /// Wait for the next value.
    ///
    /// Returns `None` once the subscription has ended.
    pub async fn next(&mut self) -> Option<Result<Bytes>> {
        if self.finished {
            return None;
        }

        loop {
            match self.receiver.recv().await {
                Ok(Ok(value)) => return Some(Ok(value)),
                Ok(Err(error)) => {
                    self.finished = true;
                    return Some(Err(Error::Adapter(error)));
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(
                        "Notification subscriber for {} lagged, skipped {} values",
                        self.characteristic, skipped
                    );
                }
                Err(broadcast::error::RecvError::Closed) => {
                    self.finished = true;
                    return None;
                }
            }
        }
    }

    /// Convert into a [`Stream`] of values.
    pub fn into_stream(self) -> impl Stream<Item = Result<Bytes>> + Send + Unpin + 'static {
        Box::pin(stream::unfold(self, |mut subscription| async move {
            subscription.next().await.map(|item| (item, subscription))
        }))
    }
}
