//! A watch-backed view of the alarm list for reactive consumers.

use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use futures_core::Stream;
use tokio::sync::watch;
use tokio_stream::wrappers::WatchStream;

use crate::model::Alarm;

/// A live view of the presented alarm list.
///
/// Holds the snapshot observed at subscription time and yields each
/// subsequent one. Intermediate snapshots may be skipped when the
/// consumer is slow; the latest state is always observable.
#[derive(Debug)]
pub struct AlarmStream {
    current: Arc<Vec<Alarm>>,
    receiver: watch::Receiver<Arc<Vec<Alarm>>>,
}

impl AlarmStream {
    pub(crate) fn new(mut receiver: watch::Receiver<Arc<Vec<Alarm>>>) -> Self {
        let current = receiver.borrow_and_update().clone();
        Self { current, receiver }
    }

    /// The snapshot this stream last yielded (or started from).
    pub fn current(&self) -> &Arc<Vec<Alarm>> {
        &self.current
    }

    /// The newest snapshot, without waiting.
    pub fn latest(&self) -> Arc<Vec<Alarm>> {
        self.receiver.borrow().clone()
    }

    /// Wait for the next change. Returns `None` once the controller is
    /// shut down.
    pub async fn changed(&mut self) -> Option<Arc<Vec<Alarm>>> {
        self.receiver.changed().await.ok()?;
        self.current = self.receiver.borrow_and_update().clone();
        Some(self.current.clone())
    }

    /// Adapt into a `Stream` of snapshots.
    pub fn into_stream(self) -> AlarmWatchStream {
        AlarmWatchStream {
            inner: WatchStream::new(self.receiver),
        }
    }
}

/// `Stream` adapter over the alarm watch channel. The first item is the
/// snapshot current at conversion time.
pub struct AlarmWatchStream {
    inner: WatchStream<Arc<Vec<Alarm>>>,
}

impl Stream for AlarmWatchStream {
    type Item = Arc<Vec<Alarm>>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Pin::new(&mut self.inner).poll_next(cx)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    fn alarm(index: u32) -> Alarm {
        Alarm {
            index,
            name: format!("Alarm {index}"),
            hour: 7,
            minute: 0,
            enabled: true,
            recurring: true,
            days: None,
            vibration_strength: None,
            time_until: String::new(),
        }
    }

    #[tokio::test]
    async fn yields_each_published_snapshot() {
        let (tx, rx) = watch::channel(Arc::new(vec![]));
        let mut stream = AlarmStream::new(rx);
        assert!(stream.current().is_empty());

        tx.send_replace(Arc::new(vec![alarm(0)]));
        let snap = stream.changed().await.unwrap();
        assert_eq!(snap.len(), 1);
        assert_eq!(stream.current().len(), 1);
    }

    #[tokio::test]
    async fn ends_when_the_sender_is_dropped() {
        let (tx, rx) = watch::channel(Arc::new(vec![alarm(0)]));
        let mut stream = AlarmStream::new(rx);
        drop(tx);
        assert!(stream.changed().await.is_none());
    }

    #[tokio::test]
    async fn stream_adapter_starts_from_the_current_snapshot() {
        use futures_util::StreamExt;

        let (tx, rx) = watch::channel(Arc::new(vec![alarm(0)]));
        let mut stream = AlarmStream::new(rx).into_stream();
        let first = stream.next().await.unwrap();
        assert_eq!(first.len(), 1);

        tx.send_replace(Arc::new(vec![alarm(0), alarm(1)]));
        let second = stream.next().await.unwrap();
        assert_eq!(second.len(), 2);
    }
}
