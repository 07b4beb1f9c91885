use crate::{
    config::Config,
    error::{QueueClosed, ServerError},
    handler::{RequestHandler, StatsHandler},
    pool::WorkerPool,
    queue::WorkQueue,
    request::Request,
    request_log::RequestLog,
    stats::ThreadStats,
};

use log::{debug, error, info, warn};
use std::{
    net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr, TcpListener, TcpStream},
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    thread,
    time::Duration,
};

const ACCEPT_BACKOFF_START: Duration = Duration::from_millis(10);
const ACCEPT_BACKOFF_MAX: Duration = Duration::from_secs(1);

type ConnectionQueue = WorkQueue<Request<TcpStream>>;

/// Listening socket, work queue, request log and worker pool.
///
/// [`run`](Server::run) turns the calling thread into the acceptor.
#[derive(Debug)]
pub struct Server {
    listener: TcpListener,
    local_addr: SocketAddr,
    queue: Arc<ConnectionQueue>,
    log: Arc<RequestLog>,
    pool: Option<WorkerPool>,
    shutdown: ShutdownHandle,
}

impl Server {
    pub fn bind(config: &Config) -> Result<Self, ServerError> {
        Self::bind_with(config, StatsHandler::new())
    }

    /// Binds the listener and starts the workers, which serve every
    /// connection with `handler`. Nothing is left running on error.
    pub fn bind_with<H>(config: &Config, handler: H) -> Result<Self, ServerError>
    where
        H: RequestHandler<TcpStream> + 'static,
    {
        let config = config.validate()?;
        let listener = TcpListener::bind(config.addr).map_err(|source| ServerError::Bind {
            addr: config.addr,
            source,
        })?;
        let local_addr = listener.local_addr()?;

        let queue = Arc::new(WorkQueue::new(config.queue_size));
        let log = Arc::new(RequestLog::new());
        let pool = WorkerPool::spawn(config.threads, queue.clone(), Arc::new(handler), log.clone())?;
        info!(
            "listening on {local_addr}: {} workers, queue size {}",
            config.threads,
            config.queue_size
        );

        let shutdown = ShutdownHandle {
            triggered: Arc::new(AtomicBool::new(false)),
            queue: queue.clone(),
            wake_addr: wake_addr(local_addr),
        };
        Ok(Server {
            listener,
            local_addr,
            queue,
            log,
            pool: Some(pool),
            shutdown,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn log(&self) -> Arc<RequestLog> {
        self.log.clone()
    }

    pub fn shutdown_handle(&self) -> ShutdownHandle {
        self.shutdown.clone()
    }

    /// Accepts connections until shut down, then joins the workers and
    /// returns their final statistics.
    ///
    /// A queue slot is claimed before each `accept`, so while every slot is
    /// taken no further connection is accepted.
    ///
    /// Failed accepts back off exponentially up to one second; a run of
    /// failures is logged at 1, 2, 4, 8... occurrences.
    pub fn run(mut self) -> Vec<ThreadStats> {
        let mut accept_failures: u32 = 0;
        loop {
            let Ok(slot) = self.queue.reserve() else {
                break;
            };
            if self.shutdown.is_triggered() {
                break;
            }
            match self.listener.accept() {
                Ok((stream, addr)) => {
                    accept_failures = 0;
                    if self.shutdown.is_triggered() {
                        break;
                    }
                    debug!("new connection from {addr}");
                    if let Err(QueueClosed(request)) = slot.enqueue(Request::new(stream)) {
                        debug!("dropping connection from {addr}: {request:?}");
                        break;
                    }
                }
                Err(err) => {
                    accept_failures = accept_failures.saturating_add(1);
                    if accept_failures.is_power_of_two() {
                        error!("failed to accept connection ({accept_failures} in a row): {err}");
                    }
                    drop(slot);
                    thread::sleep(accept_backoff(accept_failures));
                }
            }
        }

        self.shutdown.trigger();
        let stats = self.pool.take().map(WorkerPool::join).unwrap_or_default();
        let served: u64 = stats.iter().map(|stats| stats.total_requests).sum();
        info!(
            "server stopped after {served} requests, log holds {} bytes",
            self.log.len()
        );
        stats
    }
}

impl Drop for Server {
    fn drop(&mut self) {
        // Lets the workers exit when the server is dropped without running.
        self.queue.close();
    }
}

/// Stops a running [`Server`] from any thread.
#[derive(Debug, Clone)]
pub struct ShutdownHandle {
    triggered: Arc<AtomicBool>,
    queue: Arc<ConnectionQueue>,
    wake_addr: SocketAddr,
}

impl ShutdownHandle {
    /// Closes the queue, which wakes idle workers and a blocked acceptor, and
    /// pokes the listener so a pending `accept` returns.
    ///
    /// Queued connections are dropped unserved. Requests already inside the
    /// handler finish normally.
    pub fn trigger(&self) {
        if self.triggered.swap(true, Ordering::SeqCst) {
            return;
        }
        let abandoned = self.queue.close();
        if !abandoned.is_empty() {
            warn!("abandoning {} queued connections", abandoned.len());
        }
        if let Err(err) = TcpStream::connect(self.wake_addr) {
            debug!("could not wake the acceptor: {err}");
        }
    }

    pub fn is_triggered(&self) -> bool {
        self.triggered.load(Ordering::SeqCst)
    }
}

/// Pause after the `failures`-th consecutive failed accept.
fn accept_backoff(failures: u32) -> Duration {
    let doublings = failures.saturating_sub(1).min(7);
    ACCEPT_BACKOFF_START
        .saturating_mul(1 << doublings)
        .min(ACCEPT_BACKOFF_MAX)
}

fn wake_addr(local_addr: SocketAddr) -> SocketAddr {
    match local_addr.ip() {
        IpAddr::V4(ip) if ip.is_unspecified() => {
            SocketAddr::new(Ipv4Addr::LOCALHOST.into(), local_addr.port())
        }
        IpAddr::V6(ip) if ip.is_unspecified() => {
            SocketAddr::new(Ipv6Addr::LOCALHOST.into(), local_addr.port())
        }
        _ => local_addr,
    }
}
