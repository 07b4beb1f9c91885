pub mod config;
pub mod error;
pub mod handler;
pub mod pool;
pub mod queue;
pub mod request;
pub mod request_log;
pub mod rwlock;
pub mod semaphore;
pub mod server;
pub mod stats;

pub use config::Config;
pub use error::{ConfigError, LogError, QueueClosed, ServerError};
pub use handler::{RequestHandler, StatsHandler};
pub use pool::WorkerPool;
pub use queue::WorkQueue;
pub use request::{Dispatch, Request};
pub use request_log::RequestLog;
pub use rwlock::ReaderWriterLock;
pub use server::{Server, ShutdownHandle};
pub use stats::{RequestKind, ThreadStats};

use log::{error, info};
use signal_hook::{
    consts::{SIGINT, SIGTERM},
    iterator::Signals,
};
use std::thread::{self, JoinHandle};

/// Serves until SIGINT or SIGTERM arrives, then returns the per-worker
/// statistics.
pub fn run(config: &Config) -> Result<Vec<ThreadStats>, ServerError> {
    let mut signals = Signals::new([SIGINT, SIGTERM]).map_err(ServerError::Signals)?;
    let signals_handle = signals.handle();
    let server = Server::bind(config)?;

    let shutdown = server.shutdown_handle();
    let watcher = thread::Builder::new()
        .name("signals".to_owned())
        .spawn(move || {
            if let Some(signal) = signals.forever().next() {
                info!("received signal {signal}, shutting down");
                shutdown.trigger();
            }
        });
    let watcher = match watcher {
        Ok(watcher) => watcher,
        Err(source) => {
            server.shutdown_handle().trigger();
            server.run();
            return Err(ServerError::Spawn {
                name: "signals".to_owned(),
                source,
            });
        }
    };

    let stats = server.run();
    signals_handle.close();
    join_watcher(watcher);
    Ok(stats)
}

/// Returns whether the watcher exited cleanly; a panic is logged.
fn join_watcher(watcher: JoinHandle<()>) -> bool {
    let name = watcher.thread().name().unwrap_or("watcher").to_owned();
    match watcher.join() {
        Ok(()) => true,
        Err(_) => {
            error!("{name} thread panicked");
            false
        }
    }
}
