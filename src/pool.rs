use crate::{
    error::ServerError,
    handler::RequestHandler,
    queue::WorkQueue,
    request::Request,
    request_log::RequestLog,
    stats::ThreadStats,
};

use log::{debug, error, info};
use std::{
    num::NonZeroUsize,
    panic::{self, AssertUnwindSafe},
    sync::Arc,
    thread::{self, JoinHandle},
};

/// Fixed set of worker threads draining one [`WorkQueue`].
///
/// Workers run until the queue is closed. Each owns its [`ThreadStats`] and
/// hands it back when joined.
#[derive(Debug)]
pub struct WorkerPool {
    workers: Vec<JoinHandle<ThreadStats>>,
}

impl WorkerPool {
    /// Starts `size` workers with ids `1..=size`.
    ///
    /// If a thread cannot be spawned the queue is closed, the workers started
    /// so far are joined and the error is returned.
    pub fn spawn<C, H>(
        size: NonZeroUsize,
        queue: Arc<WorkQueue<Request<C>>>,
        handler: Arc<H>,
        log: Arc<RequestLog>,
    ) -> Result<Self, ServerError>
    where
        C: Send + 'static,
        H: RequestHandler<C> + 'static,
    {
        let mut pool = WorkerPool {
            workers: Vec::with_capacity(size.get()),
        };
        for id in 1..=size.get() {
            let (queue_ref, handler, log) = (queue.clone(), handler.clone(), log.clone());
            let name = format!("worker-{id}");
            let spawned = thread::Builder::new()
                .name(name.clone())
                .spawn(move || work(ThreadStats::new(id), &queue_ref, handler.as_ref(), &log));
            match spawned {
                Ok(worker) => pool.workers.push(worker),
                Err(source) => {
                    queue.close();
                    pool.join();
                    return Err(ServerError::Spawn { name, source });
                }
            }
        }
        info!("started {} workers", pool.workers.len());
        Ok(pool)
    }

    /// Waits for every worker to exit; only returns once the queue has been
    /// closed. Workers that panicked are reported and left out.
    pub fn join(self) -> Vec<ThreadStats> {
        self.workers
            .into_iter()
            .filter_map(|worker| {
                let name = worker.thread().name().unwrap_or("worker").to_owned();
                match worker.join() {
                    Ok(stats) => Some(stats),
                    Err(_) => {
                        error!("{name} panicked");
                        None
                    }
                }
            })
            .collect()
    }
}

fn work<C, H>(
    mut stats: ThreadStats,
    queue: &WorkQueue<Request<C>>,
    handler: &H,
    log: &RequestLog,
) -> ThreadStats
where
    H: RequestHandler<C> + ?Sized,
{
    while let Some(mut request) = queue.dequeue() {
        let dispatch = request.dispatch();
        // A panicking handler costs its connection, not the worker.
        let handled = panic::catch_unwind(AssertUnwindSafe(|| {
            handler.handle(
                &mut request.connection,
                request.arrival,
                dispatch,
                &mut stats,
                log,
            )
        }));
        if handled.is_err() {
            error!("worker {} handler panicked, dropping connection", stats.id());
        }
        // Dropping the request closes the connection.
        drop(request);
    }
    match serde_json::to_string(&stats) {
        Ok(summary) => debug!("worker {} stopped: {summary}", stats.id()),
        Err(err) => debug!("worker {} stopped ({err})", stats.id()),
    }
    stats
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{request::Dispatch, request::Time, stats::RequestKind};
    use std::{sync::mpsc, sync::Mutex, time::Duration};

    fn nonzero(n: usize) -> NonZeroUsize {
        NonZeroUsize::new(n).unwrap()
    }

    #[test]
    fn workers_handle_every_request_and_return_stats() {
        let queue = Arc::new(WorkQueue::new(nonzero(2)));
        let log = Arc::new(RequestLog::new());
        let handler = Arc::new(
            |connection: &mut u32,
             _: Time,
             _: Dispatch,
             stats: &mut ThreadStats,
             log: &RequestLog| {
                stats.record(RequestKind::Static);
                log.append(format!("{}:{connection}", stats.id()).as_bytes())
                    .unwrap();
            },
        );
        let pool = WorkerPool::spawn(nonzero(3), queue.clone(), handler, log.clone()).unwrap();

        for i in 0..30 {
            queue.enqueue(Request::new(i)).unwrap();
        }
        while log.snapshot_string().lines().count() < 30 {
            thread::sleep(Duration::from_millis(1));
        }
        queue.close();

        let stats = pool.join();
        let mut ids: Vec<_> = stats.iter().map(ThreadStats::id).collect();
        ids.sort_unstable();
        assert_eq!(ids, vec![1, 2, 3]);
        assert_eq!(stats.iter().map(|s| s.total_requests).sum::<u64>(), 30);
        assert_eq!(stats.iter().map(|s| s.static_requests).sum::<u64>(), 30);
    }

    #[test]
    fn dispatch_follows_arrival_order() {
        let queue = Arc::new(WorkQueue::new(nonzero(8)));
        let seen = Arc::new(Mutex::new(Vec::new()));
        let handler = {
            let seen = seen.clone();
            Arc::new(
                move |connection: &mut u32,
                      _: Time,
                      _: Dispatch,
                      _: &mut ThreadStats,
                      _: &RequestLog| {
                    seen.lock().unwrap().push(*connection);
                },
            )
        };
        for i in 0..8 {
            queue.enqueue(Request::new(i)).unwrap();
        }
        let pool = WorkerPool::spawn(nonzero(1), queue.clone(), handler, Arc::default()).unwrap();
        while seen.lock().unwrap().len() < 8 {
            thread::sleep(Duration::from_millis(1));
        }
        queue.close();
        pool.join();
        assert_eq!(*seen.lock().unwrap(), (0..8).collect::<Vec<_>>());
    }

    #[test]
    fn worker_survives_a_panicking_handler() {
        let queue = Arc::new(WorkQueue::new(nonzero(4)));
        let log = Arc::new(RequestLog::new());
        let handler = Arc::new(
            |connection: &mut u32,
             _: Time,
             _: Dispatch,
             stats: &mut ThreadStats,
             log: &RequestLog| {
                if *connection == 0 {
                    panic!("handler failed on connection 0");
                }
                stats.record(RequestKind::Dynamic);
                log.append(connection.to_string().as_bytes()).unwrap();
            },
        );
        let pool = WorkerPool::spawn(nonzero(1), queue.clone(), handler, log.clone()).unwrap();

        for i in 0..4 {
            queue.enqueue(Request::new(i)).unwrap();
        }
        while log.snapshot_string().lines().count() < 3 {
            thread::sleep(Duration::from_millis(1));
        }
        queue.close();

        let stats = pool.join();
        assert_eq!(stats.len(), 1);
        assert_eq!(stats[0].dynamic_requests, 3);
        assert_eq!(log.snapshot_string(), "1\n2\n3\n");
    }

    #[test]
    fn connection_is_dropped_after_handling() {
        struct Connection(mpsc::Sender<&'static str>);
        impl Drop for Connection {
            fn drop(&mut self) {
                let _ = self.0.send("closed");
            }
        }

        let queue = Arc::new(WorkQueue::new(nonzero(1)));
        let handler = Arc::new(
            |connection: &mut Connection,
             _: Time,
             _: Dispatch,
             _: &mut ThreadStats,
             _: &RequestLog| {
                connection.0.send("handled").unwrap();
            },
        );
        let pool = WorkerPool::spawn(nonzero(1), queue.clone(), handler, Arc::default()).unwrap();

        let (tx, rx) = mpsc::channel();
        queue.enqueue(Request::new(Connection(tx))).unwrap();
        assert_eq!(rx.recv().unwrap(), "handled");
        assert_eq!(rx.recv().unwrap(), "closed");

        queue.close();
        pool.join();
    }
}
