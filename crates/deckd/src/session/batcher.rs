//! Frame-aligned output coalescing.

use std::time::Duration;

use tokio::time::Instant;

/// Coalesces PTY reads into at most one frame per interval.
///
/// The first read after a flush arms the deadline; later reads in the same
/// window append without moving it.
#[derive(Debug)]
pub struct OutputBatcher {
    interval: Duration,
    pending: Vec<u8>,
    deadline: Option<Instant>,
}

impl OutputBatcher {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            pending: Vec::new(),
            deadline: None,
        }
    }

    pub fn push(&mut self, bytes: &[u8], now: Instant) {
        if bytes.is_empty() {
            return;
        }
        self.pending.extend_from_slice(bytes);
        if self.deadline.is_none() {
            self.deadline = Some(now + self.interval);
        }
    }

    /// When the pending frame is due, if any.
    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Pending byte count.
    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Takes the pending frame and disarms the deadline.
    pub fn take(&mut self) -> Option<Vec<u8>> {
        self.deadline = None;
        if self.pending.is_empty() {
            return None;
        }
        Some(std::mem::take(&mut self.pending))
    }

    /// Drops the pending frame (kill path).
    pub fn cancel(&mut self) {
        self.deadline = None;
        self.pending.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reads_within_window_share_one_frame() {
        let t0 = Instant::now();
        let mut batcher = OutputBatcher::new(Duration::from_millis(16));

        batcher.push(b"ab", t0);
        batcher.push(b"cd", t0 + Duration::from_millis(10));
        assert_eq!(batcher.deadline(), Some(t0 + Duration::from_millis(16)));

        assert_eq!(batcher.take().as_deref(), Some(&b"abcd"[..]));
        assert_eq!(batcher.deadline(), None);
        assert!(batcher.take().is_none());
    }

    #[test]
    fn test_next_read_rearms() {
        let t0 = Instant::now();
        let mut batcher = OutputBatcher::new(Duration::from_millis(16));
        batcher.push(b"a", t0);
        batcher.take();

        let t1 = t0 + Duration::from_millis(40);
        batcher.push(b"b", t1);
        assert_eq!(batcher.deadline(), Some(t1 + Duration::from_millis(16)));
    }

    #[test]
    fn test_cancel_and_empty_reads() {
        let t0 = Instant::now();
        let mut batcher = OutputBatcher::new(Duration::from_millis(16));
        batcher.push(b"", t0);
        assert_eq!(batcher.deadline(), None);

        batcher.push(b"xyz", t0);
        assert_eq!(batcher.len(), 3);
        batcher.cancel();
        assert!(batcher.is_empty());
        assert_eq!(batcher.deadline(), None);
    }
}
