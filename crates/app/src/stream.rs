use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;
use tokio_stream::{Stream, StreamExt};

/// Turn a broadcast receiver into a stream that skips over lag instead of
/// ending. Slow consumers lose values; the producer never waits.
pub(crate) fn lossy<T>(rx: broadcast::Receiver<T>, source: &'static str) -> impl Stream<Item = T>
where
    T: Clone + Send + 'static,
{
    BroadcastStream::new(rx).filter_map(move |result| match result {
        Ok(value) => Some(value),
        Err(BroadcastStreamRecvError::Lagged(skipped)) => {
            tracing::warn!(skipped, source, "subscriber lagged, values were dropped");
            None
        }
    })
}
