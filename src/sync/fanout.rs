//! Grouping of newly discovered ids into contiguous range fetches

use crate::types::SequenceId;

/// A contiguous id range `[start, start + len)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IdRun {
    pub start: SequenceId,
    pub len: usize,
}

impl IdRun {
    /// Last id covered by the run.
    pub fn end(&self) -> SequenceId {
        SequenceId(self.start.0.saturating_add(self.len.saturating_sub(1) as u32))
    }
}

/// Group `ids` into maximal contiguous runs, split so no run is longer than
/// `max_len`, ordered longest first. Ties go to the newer run.
pub fn contiguous_runs(ids: &[SequenceId], max_len: usize) -> Vec<IdRun> {
    let max_len = max_len.max(1);
    let mut sorted: Vec<u32> = ids.iter().map(|id| id.0).collect();
    sorted.sort_unstable();
    sorted.dedup();

    let mut runs: Vec<IdRun> = Vec::new();
    for id in sorted {
        match runs.last_mut() {
            Some(run) if run.len < max_len && run.start.0 as u64 + run.len as u64 == id as u64 => {
                run.len += 1;
            }
            _ => runs.push(IdRun {
                start: SequenceId(id),
                len: 1,
            }),
        }
    }

    runs.sort_by(|a, b| b.len.cmp(&a.len).then(b.start.cmp(&a.start)));
    runs
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ids(raw: &[u32]) -> Vec<SequenceId> {
        raw.iter().copied().map(SequenceId).collect()
    }

    fn run(start: u32, len: usize) -> IdRun {
        IdRun {
            start: SequenceId(start),
            len,
        }
    }

    #[test]
    fn test_groups_and_orders_by_length() {
        let runs = contiguous_runs(&ids(&[20, 3, 4, 5, 6, 10, 11, 1]), 100);
        assert_eq!(runs, vec![run(3, 4), run(10, 2), run(20, 1), run(1, 1)]);
    }

    #[test]
    fn test_splits_long_runs() {
        let all: Vec<u32> = (1..=7).collect();
        let runs = contiguous_runs(&ids(&all), 3);
        assert_eq!(runs, vec![run(4, 3), run(1, 3), run(7, 1)]);
        assert!(runs.iter().all(|r| r.len <= 3));
    }

    #[test]
    fn test_duplicates_and_empty() {
        assert!(contiguous_runs(&[], 10).is_empty());
        assert_eq!(contiguous_runs(&ids(&[8, 8, 9]), 10), vec![run(8, 2)]);
    }

    #[test]
    fn test_run_at_top_of_id_space() {
        let runs = contiguous_runs(&ids(&[u32::MAX - 1, u32::MAX]), 10);
        assert_eq!(runs, vec![run(u32::MAX - 1, 2)]);
        assert_eq!(runs[0].end(), SequenceId::MAX);
    }
}
