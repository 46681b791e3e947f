use std::collections::VecDeque;

/// Upper bound on up-front allocation; a client may ask for far more lines
/// than a file actually holds.
const MAX_PREALLOCATED: usize = 4096;

/// Fixed-capacity ring of the most recent lines
///
/// Used while scanning a file for its snapshot so memory stays proportional
/// to the number of lines kept, not to the size of the file.
#[derive(Debug)]
pub struct SnapshotRing {
    /// Internal storage
    lines: VecDeque<String>,

    /// Maximum capacity
    capacity: usize,

    /// Lines pushed over the ring's lifetime, including evicted ones
    seen: u64,
}

impl SnapshotRing {
    /// Create a new ring with the given capacity
    pub fn new(capacity: usize) -> Self {
        Self {
            lines: VecDeque::with_capacity(capacity.min(MAX_PREALLOCATED)),
            capacity,
            seen: 0,
        }
    }

    /// Push a new line, evicting oldest if at capacity
    pub fn push(&mut self, line: String) {
        self.seen += 1;
        if self.capacity == 0 {
            return;
        }
        if self.lines.len() >= self.capacity {
            self.lines.pop_front();
        }
        self.lines.push_back(line);
    }

    /// Number of lines currently held
    pub fn len(&self) -> usize {
        self.lines.len()
    }

    /// Check if ring is empty
    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    /// Total lines pushed, including evicted ones
    pub fn seen(&self) -> u64 {
        self.seen
    }

    /// Consume the ring, returning the retained lines oldest first
    pub fn into_lines(self) -> Vec<String> {
        self.lines.into()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn filled(capacity: usize, count: usize) -> SnapshotRing {
        let mut ring = SnapshotRing::new(capacity);
        for i in 0..count {
            ring.push(format!("line {}", i));
        }
        ring
    }

    #[test]
    fn test_keeps_most_recent() {
        let ring = filled(3, 10);
        assert_eq!(ring.len(), 3);
        assert_eq!(ring.seen(), 10);
        assert_eq!(ring.into_lines(), vec!["line 7", "line 8", "line 9"]);
    }

    #[test]
    fn test_fewer_lines_than_capacity() {
        let ring = filled(100, 2);
        assert_eq!(ring.into_lines(), vec!["line 0", "line 1"]);
    }

    #[test]
    fn test_zero_capacity_keeps_nothing() {
        let ring = filled(0, 5);
        assert!(ring.is_empty());
        assert_eq!(ring.seen(), 5);
    }

    #[test]
    fn test_huge_capacity_is_not_preallocated() {
        let ring = SnapshotRing::new(usize::MAX);
        assert_eq!(ring.capacity, usize::MAX);
        assert!(ring.lines.capacity() <= MAX_PREALLOCATED * 2);
    }
}
