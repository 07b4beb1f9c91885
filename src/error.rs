use std::{collections::TryReserveError, fmt, io};
use thiserror::Error;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum ConfigError {
    #[error("port must be a positive integer")]
    ZeroPort,
    #[error("thread count must be a positive integer")]
    ZeroThreads,
    #[error("queue size must be a positive integer")]
    ZeroQueueSize,
}

#[derive(Error, Debug)]
pub enum ServerError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: std::net::SocketAddr,
        source: io::Error,
    },
    #[error("failed to spawn {name}: {source}")]
    Spawn { name: String, source: io::Error },
    #[error("failed to register signal handlers: {0}")]
    Signals(io::Error),
    #[error(transparent)]
    Io(#[from] io::Error),
}

/// An append that left the log untouched.
#[derive(Error, Debug)]
pub enum LogError {
    #[error("refusing to append an empty entry")]
    EmptyEntry,
    #[error("log growth to {requested} bytes failed: {source}")]
    Grow {
        requested: usize,
        source: TryReserveError,
    },
}

/// Returned by enqueue operations once the queue has been closed; hands the
/// rejected item back.
#[derive(Error, PartialEq, Eq)]
#[error("work queue is closed")]
pub struct QueueClosed<T>(pub T);

impl<T> fmt::Debug for QueueClosed<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("QueueClosed(..)")
    }
}
