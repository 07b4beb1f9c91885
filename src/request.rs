use chrono::{DateTime, TimeDelta, Utc};

pub type Time = DateTime<Utc>;

/// A connection waiting in the work queue, stamped when it was accepted.
#[derive(Debug)]
pub struct Request<C> {
    pub connection: C,
    pub arrival: Time,
}

impl<C> Request<C> {
    pub fn new(connection: C) -> Self {
        Self::arrived_at(connection, Utc::now())
    }

    pub fn arrived_at(connection: C, arrival: Time) -> Self {
        Self {
            connection,
            arrival,
        }
    }

    /// Stamps the moment a worker picked the request up.
    pub fn dispatch(&self) -> Dispatch {
        Dispatch {
            elapsed: (Utc::now() - self.arrival).max(TimeDelta::zero()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Dispatch {
    /// Time spent in the queue.
    pub elapsed: TimeDelta,
}
