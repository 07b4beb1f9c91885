//! Shared, growable activity log written by every worker.

use crate::{error::LogError, rwlock::ReaderWriterLock};

pub const INITIAL_CAPACITY: usize = 1024;
const DELIMITER: u8 = b'\n';

#[derive(Debug)]
struct LogBuffer {
    bytes: Vec<u8>,
    // Logical capacity; always at least `bytes.len() + 1`. The allocator may
    // hand out more, but growth decisions follow this value only.
    capacity: usize,
}

impl LogBuffer {
    fn with_capacity(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            bytes: Vec::with_capacity(capacity),
            capacity,
        }
    }

    fn append(&mut self, data: &[u8]) -> Result<(), LogError> {
        let committed = self.bytes.len() + data.len() + 1;
        if committed + 1 > self.capacity {
            let requested = 2 * committed;
            self.bytes
                .try_reserve_exact(requested - self.bytes.len())
                .map_err(|source| LogError::Grow { requested, source })?;
            self.capacity = requested;
        }
        self.bytes.extend_from_slice(data);
        self.bytes.push(DELIMITER);
        Ok(())
    }
}

/// Append-mostly byte log guarded by a writer-preferring [`ReaderWriterLock`].
///
/// Every append is applied whole inside one exclusive section and followed
/// by a single newline, so a snapshot only ever sees complete entries.
#[derive(Debug)]
pub struct RequestLog {
    buffer: ReaderWriterLock<LogBuffer>,
}

impl RequestLog {
    pub fn new() -> Self {
        Self::with_capacity(INITIAL_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buffer: ReaderWriterLock::new(LogBuffer::with_capacity(capacity)),
        }
    }

    /// Appends `data` followed by a newline.
    ///
    /// Empty entries are rejected. When growing the buffer fails the entry is
    /// dropped and the log stays exactly as it was; callers are free to
    /// ignore the result.
    pub fn append(&self, data: &[u8]) -> Result<(), LogError> {
        if data.is_empty() {
            return Err(LogError::EmptyEntry);
        }
        self.buffer.acquire_write().append(data)
    }

    /// Copies the whole log as of the moment the shared section is granted.
    pub fn snapshot(&self) -> Vec<u8> {
        self.buffer.acquire_read().bytes.clone()
    }

    pub fn snapshot_string(&self) -> String {
        String::from_utf8_lossy(&self.snapshot()).into_owned()
    }

    pub fn len(&self) -> usize {
        self.buffer.acquire_read().bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.buffer.acquire_read().capacity
    }
}

impl Default for RequestLog {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::{sync::Arc, thread};

    #[test]
    fn appends_are_newline_terminated() {
        let log = RequestLog::new();
        log.append(b"A").unwrap();
        log.append(b"BB").unwrap();
        assert_eq!(log.len(), 5);
        assert_eq!(log.snapshot(), b"A\nBB\n");
        assert_eq!(log.snapshot_string(), "A\nBB\n");
    }

    #[test]
    fn empty_entry_is_rejected() {
        let log = RequestLog::new();
        assert!(matches!(log.append(b""), Err(LogError::EmptyEntry)));
        assert!(log.is_empty());
    }

    #[test]
    fn grows_to_twice_the_needed_size() {
        let log = RequestLog::with_capacity(4);
        assert_eq!(log.capacity(), 4);

        log.append(b"ab").unwrap();
        // 2 bytes + delimiter + terminator fit exactly.
        assert_eq!(log.capacity(), 4);

        log.append(b"cde").unwrap();
        assert_eq!(log.capacity(), 2 * (3 + 3 + 1));
        assert_eq!(log.snapshot(), b"ab\ncde\n");
    }

    #[test]
    fn capacity_never_shrinks() {
        let log = RequestLog::with_capacity(1);
        let mut last = log.capacity();
        for i in 0..200 {
            log.append(format!("entry {i}").as_bytes()).unwrap();
            let capacity = log.capacity();
            assert!(capacity >= last);
            assert!(capacity > log.len());
            last = capacity;
        }
    }

    #[test]
    fn concurrent_appends_do_not_interleave() {
        let a = "a".repeat(4096);
        let b = "b".repeat(3000);
        let log = Arc::new(RequestLog::with_capacity(1));

        let handles: Vec<_> = [a.clone(), b.clone()]
            .into_iter()
            .map(|entry| {
                let log = log.clone();
                thread::spawn(move || log.append(entry.as_bytes()).unwrap())
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        let text = log.snapshot_string();
        assert_eq!(text.len(), a.len() + b.len() + 2);
        let a_first = format!("{a}\n{b}\n");
        let b_first = format!("{b}\n{a}\n");
        assert!(text == a_first || text == b_first);
    }

    #[test]
    fn snapshot_holds_every_completed_append() {
        let log = Arc::new(RequestLog::new());
        let handles: Vec<_> = (0..4)
            .map(|worker| {
                let log = log.clone();
                thread::spawn(move || {
                    for i in 0..50 {
                        log.append(format!("w{worker}-{i}").as_bytes()).unwrap();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        let text = log.snapshot_string();
        let lines: Vec<_> = text.lines().collect();
        assert_eq!(lines.len(), 200);
        for worker in 0..4 {
            for i in 0..50 {
                assert!(lines.contains(&format!("w{worker}-{i}").as_str()));
            }
        }
        let expected: usize = lines.iter().map(|line| line.len() + 1).sum();
        assert_eq!(text.len(), expected);
    }
}
