use crate::domain::batch::Batch;
use crate::domain::ports::{FlushSink, SinkError};
use tokio::sync::mpsc::UnboundedSender;

/// Forwards batches into a tokio channel. Fails with [`SinkError::Closed`]
/// once the receiver is gone.
impl<T: Send + Sync + 'static> FlushSink<T> for UnboundedSender<Batch<T>> {
    fn deliver(&self, batch: Batch<T>) -> Result<(), SinkError> {
        self.send(batch).map_err(|_| SinkError::Closed)
    }
}

/// Adapts a closure into a [`FlushSink`].
pub struct CallbackSink<F> {
    callback: F,
}

impl<F> CallbackSink<F> {
    pub fn new(callback: F) -> Self {
        Self { callback }
    }
}

impl<T, F> FlushSink<T> for CallbackSink<F>
where
    F: Fn(Batch<T>) -> Result<(), SinkError> + Send + Sync,
{
    fn deliver(&self, batch: Batch<T>) -> Result<(), SinkError> {
        (self.callback)(batch)
    }
}
