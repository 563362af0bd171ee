//! Single-read fan-out of an upload stream.
//!
//! [`Tee::pump`] reads the source once and hands every chunk to each
//! registered consumer over its own bounded channel. Chunks are frozen
//! [`Bytes`], so all consumers share the same immutable buffer.

use std::io;

use bytes::{Bytes, BytesMut};
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::sync::mpsc;
use tokio_util::io::StreamReader;
use tracing::debug;

/// Read size per chunk.
pub const CHUNK_SIZE: usize = 64 * 1024;

/// What a consumer receives: a chunk, or the error that ended the stream.
pub type Chunk = io::Result<Bytes>;

#[derive(Debug, Error)]
pub enum TeeError {
    #[error("Failed to read upload: {0}")]
    Read(#[from] io::Error),

    #[error("Upload exceeds its declared size of {limit} bytes")]
    LimitExceeded { limit: u64 },

    #[error("Consumer '{0}' stopped before the upload finished")]
    ConsumerClosed(&'static str),
}

struct Tap {
    name: &'static str,
    tx: mpsc::Sender<Chunk>,
    required: bool,
}

/// Fan-out over bounded channels.
pub struct Tee {
    taps: Vec<Tap>,
    capacity: usize,
}

impl Tee {
    /// `capacity` is the number of chunks buffered per consumer.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            taps: Vec::new(),
            capacity: capacity.max(1),
        }
    }

    /// Register a consumer that must see the whole stream. Dropping its
    /// receiver early fails the pump.
    pub fn required(&mut self, name: &'static str) -> mpsc::Receiver<Chunk> {
        self.tap(name, true)
    }

    /// Register a consumer that may give up by dropping its receiver.
    pub fn optional(&mut self, name: &'static str) -> mpsc::Receiver<Chunk> {
        self.tap(name, false)
    }

    fn tap(&mut self, name: &'static str, required: bool) -> mpsc::Receiver<Chunk> {
        let (tx, rx) = mpsc::channel(self.capacity);
        self.taps.push(Tap { name, tx, required });
        rx
    }

    /// Copy `source` to every consumer, returning the number of bytes read.
    ///
    /// Fails with [`TeeError::LimitExceeded`] as soon as more than `limit`
    /// bytes arrive. On any failure the remaining consumers receive an error
    /// as their last item, so none of them mistakes a cut-off stream for a
    /// complete one.
    pub async fn pump<R>(self, mut source: R, limit: u64) -> Result<u64, TeeError>
    where
        R: AsyncRead + Unpin,
    {
        let mut taps = self.taps;
        let mut total = 0u64;

        let result = loop {
            let mut buf = BytesMut::with_capacity(CHUNK_SIZE);
            let n = match source.read_buf(&mut buf).await {
                Ok(0) => break Ok(total),
                Ok(n) => n,
                Err(e) => break Err(TeeError::Read(e)),
            };

            total += n as u64;
            if total > limit {
                break Err(TeeError::LimitExceeded { limit });
            }

            if let Err(e) = broadcast(&mut taps, buf.freeze()).await {
                break Err(e);
            }
        };

        if let Err(e) = &result {
            for tap in &taps {
                // Consumers that already left don't need to hear about it
                let _ = tap.tx.send(Err(io::Error::other(e.to_string()))).await;
            }
        }

        result
    }
}

async fn broadcast(taps: &mut Vec<Tap>, chunk: Bytes) -> Result<(), TeeError> {
    let mut i = 0;
    while i < taps.len() {
        if taps[i].tx.send(Ok(chunk.clone())).await.is_ok() {
            i += 1;
            continue;
        }

        let tap = taps.remove(i);
        if tap.required {
            return Err(TeeError::ConsumerClosed(tap.name));
        }
        debug!(consumer = tap.name, "Consumer detached from upload stream");
    }
    Ok(())
}

/// View a consumer channel as a byte stream.
pub fn chunk_reader(rx: mpsc::Receiver<Chunk>) -> impl AsyncRead + Send + 'static {
    StreamReader::new(futures::stream::unfold(rx, |mut rx| async move {
        rx.recv().await.map(|chunk| (chunk, rx))
    }))
}
