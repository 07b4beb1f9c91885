use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};

#[derive(Debug)]
struct Permits {
    available: usize,
    closed: bool,
}

/// Counting semaphore: blocking `acquire`, non-blocking `release`.
///
/// Closing wakes every waiter; from then on `acquire` fails immediately even
/// if permits remain.
#[derive(Debug)]
pub struct Semaphore {
    permits: Mutex<Permits>,
    released: Condvar,
}

impl Semaphore {
    pub fn new(permits: usize) -> Self {
        Self {
            permits: Mutex::new(Permits {
                available: permits,
                closed: false,
            }),
            released: Condvar::new(),
        }
    }

    fn permits(&self) -> MutexGuard<'_, Permits> {
        self.permits.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Takes one permit, blocking while none is available. Returns `false`
    /// once the semaphore is closed.
    pub fn acquire(&self) -> bool {
        let mut permits = self.permits();
        loop {
            if permits.closed {
                return false;
            }
            if permits.available > 0 {
                permits.available -= 1;
                return true;
            }
            permits = self
                .released
                .wait(permits)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }

    pub fn release(&self) {
        self.permits().available += 1;
        self.released.notify_one();
    }

    pub fn close(&self) {
        self.permits().closed = true;
        self.released.notify_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::{
        sync::{mpsc, Arc},
        thread,
        time::Duration,
    };

    #[test]
    fn counts_down_to_zero() {
        let semaphore = Semaphore::new(2);
        assert!(semaphore.acquire());
        assert!(semaphore.acquire());
        assert_eq!(semaphore.permits().available, 0);
        semaphore.release();
        assert_eq!(semaphore.permits().available, 1);
    }

    #[test]
    fn acquire_blocks_until_release() {
        let semaphore = Arc::new(Semaphore::new(0));
        let (tx, rx) = mpsc::channel();
        let waiter = {
            let semaphore = semaphore.clone();
            thread::spawn(move || tx.send(semaphore.acquire()).unwrap())
        };

        assert!(rx.recv_timeout(Duration::from_millis(50)).is_err());
        semaphore.release();
        assert!(rx.recv().unwrap());
        waiter.join().unwrap();
    }

    #[test]
    fn close_wakes_waiters() {
        let semaphore = Arc::new(Semaphore::new(0));
        let waiters: Vec<_> = (0..3)
            .map(|_| {
                let semaphore = semaphore.clone();
                thread::spawn(move || semaphore.acquire())
            })
            .collect();

        thread::sleep(Duration::from_millis(20));
        semaphore.close();
        for waiter in waiters {
            assert!(!waiter.join().unwrap());
        }
        semaphore.release();
        assert!(!semaphore.acquire());
    }
}
