use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestKind {
    Static,
    Dynamic,
    Post,
    /// Counted in the total only.
    Other,
}

/// Per-worker request counters.
///
/// Each worker owns exactly one of these for the lifetime of the pool and is
/// the only thread that ever touches it, so it carries no synchronization.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ThreadStats {
    id: usize,
    pub static_requests: u64,
    pub dynamic_requests: u64,
    pub post_requests: u64,
    pub total_requests: u64,
}

impl ThreadStats {
    pub fn new(id: usize) -> Self {
        Self {
            id,
            ..Self::default()
        }
    }

    pub fn id(&self) -> usize {
        self.id
    }

    pub fn record(&mut self, kind: RequestKind) {
        match kind {
            RequestKind::Static => self.static_requests += 1,
            RequestKind::Dynamic => self.dynamic_requests += 1,
            RequestKind::Post => self.post_requests += 1,
            RequestKind::Other => {}
        }
        self.total_requests += 1;
    }
}
