use tokio::sync::mpsc;

use crate::error::StreamError;

/// Creates the bounded single-producer/single-consumer queue that hands native
/// chunks from a transport worker to an adapter.
///
/// The receiver is consumed as a blocking [`Iterator`], so the adapter pipeline
/// it feeds must run on a plain thread or inside `spawn_blocking`. Driving it
/// from async code panics; see [`ChunkReceiver`].
pub fn chunk_channel<T>(capacity: usize) -> (ChunkSender<T>, ChunkReceiver<T>) {
    let (sender, receiver) = mpsc::channel(capacity.max(1));
    (
        ChunkSender { inner: sender },
        ChunkReceiver { inner: receiver },
    )
}

#[derive(Debug)]
pub struct ChunkSender<T> {
    inner: mpsc::Sender<Result<T, StreamError>>,
}

impl<T> ChunkSender<T> {
    pub async fn send(&self, chunk: T) -> Result<(), StreamError> {
        self.inner.send(Ok(chunk)).await.map_err(|_| closed_error())
    }

    pub async fn fail(&self, error: StreamError) -> Result<(), StreamError> {
        self.inner.send(Err(error)).await.map_err(|_| closed_error())
    }

    pub fn blocking_send(&self, chunk: T) -> Result<(), StreamError> {
        self.inner.blocking_send(Ok(chunk)).map_err(|_| closed_error())
    }

    pub fn blocking_fail(&self, error: StreamError) -> Result<(), StreamError> {
        self.inner.blocking_send(Err(error)).map_err(|_| closed_error())
    }

    /// True once the consuming pipeline has finished or been cancelled.
    pub fn is_closed(&self) -> bool {
        self.inner.is_closed()
    }
}

/// Consuming half of [`chunk_channel`]; iterating blocks the current thread, so
/// drive it from a plain thread or `spawn_blocking`, never from async code.
///
/// # Panics
///
/// [`Iterator::next`] panics when called from within an asynchronous execution
/// context, as [`tokio::sync::mpsc::Receiver::blocking_recv`] does. Use
/// [`ChunkReceiver::recv`] there instead.
#[derive(Debug)]
pub struct ChunkReceiver<T> {
    inner: mpsc::Receiver<Result<T, StreamError>>,
}

impl<T> ChunkReceiver<T> {
    pub async fn recv(&mut self) -> Option<Result<T, StreamError>> {
        self.inner.recv().await
    }

    pub fn close(&mut self) {
        self.inner.close();
    }
}

impl<T> Iterator for ChunkReceiver<T> {
    type Item = Result<T, StreamError>;

    fn next(&mut self) -> Option<Self::Item> {
        self.inner.blocking_recv()
    }
}

fn closed_error() -> StreamError {
    StreamError::transport("chunk receiver closed; the canonical stream was cancelled")
}
