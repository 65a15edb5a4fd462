use std::collections::BTreeSet;

use super::activity::ActivityKind;

/// Counts distinct `(file, kind)` resolutions until an expected total is reached.
///
/// Recording the same pair twice is absorbed, so duplicate deliveries never
/// advance the count.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JoinBarrier {
    expected: usize,
    resolved: BTreeSet<(String, ActivityKind)>,
}

impl JoinBarrier {
    pub fn new(expected: usize) -> Self {
        Self {
            expected,
            resolved: BTreeSet::new(),
        }
    }

    /// Barrier for a diagnostics fan-out: one metadata and one preview per file.
    pub fn for_files(file_count: usize) -> Self {
        Self::new(file_count * ActivityKind::ALL.len())
    }

    /// Records a resolution. Returns `false` if the pair was already recorded.
    pub fn record(&mut self, file_key: &str, kind: ActivityKind) -> bool {
        self.resolved.insert((file_key.to_string(), kind))
    }

    pub fn remaining(&self) -> usize {
        self.expected.saturating_sub(self.resolved.len())
    }

    pub fn is_satisfied(&self) -> bool {
        self.resolved.len() >= self.expected
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_barrier_is_satisfied() {
        let barrier = JoinBarrier::for_files(0);
        assert!(barrier.is_satisfied());
        assert_eq!(barrier.remaining(), 0);
    }

    #[test]
    fn test_duplicates_do_not_count() {
        let mut barrier = JoinBarrier::for_files(1);
        assert!(barrier.record("a.mkv", ActivityKind::MetadataFetch));
        assert!(!barrier.record("a.mkv", ActivityKind::MetadataFetch));
        assert_eq!(barrier.remaining(), 1);
        assert!(!barrier.is_satisfied());

        assert!(barrier.record("a.mkv", ActivityKind::PreviewTranscode));
        assert!(barrier.is_satisfied());
    }
}
