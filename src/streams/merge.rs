//! Sort-merge of per-session streams into one ordered table.

use crate::streams::types::{StreamKind, StreamTable, TimedSample};

/// Accumulates reconstructed sessions of one stream kind.
///
/// Sessions are appended as they arrive and sorted once in [`finish`](Self::finish).
/// The sort is stable, so samples sharing a timestamp keep their arrival order.
pub struct StreamMerger {
    kind: StreamKind,
    samples: Vec<TimedSample>,
}

impl StreamMerger {
    pub fn new(kind: StreamKind) -> Self {
        Self {
            kind,
            samples: Vec::new(),
        }
    }

    /// Append one session. Empty sessions add no rows.
    pub fn add_session(&mut self, samples: Vec<TimedSample>) {
        self.samples.extend(samples);
    }

    /// Append every sample of an already merged table.
    pub fn add_table(&mut self, table: StreamTable) {
        debug_assert_eq!(table.kind(), self.kind);
        self.add_session(table.into_samples());
    }

    /// Sort everything collected and produce the table.
    pub fn finish(mut self) -> StreamTable {
        self.samples.sort_by_key(|s| s.timestamp);
        StreamTable::from_sorted(self.kind, self.samples)
    }
}

/// Merge a set of sessions in one call.
pub fn merge_sessions<I>(kind: StreamKind, sessions: I) -> StreamTable
where
    I: IntoIterator<Item = Vec<TimedSample>>,
{
    let mut merger = StreamMerger::new(kind);
    for session in sessions {
        merger.add_session(session);
    }
    merger.finish()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::streams::types::{instant_from_epoch, scalar_values};

    fn at(secs: f64, value: f64) -> TimedSample {
        TimedSample::scalar(instant_from_epoch(secs).unwrap(), value)
    }

    #[test]
    fn test_merge_orders_sessions() {
        let late = vec![at(200.0, 3.0), at(201.0, 4.0)];
        let early = vec![at(100.0, 1.0), at(101.0, 2.0)];

        let table = merge_sessions(StreamKind::Hr, vec![late, early]);
        assert_eq!(scalar_values(table.samples()), vec![1.0, 2.0, 3.0, 4.0]);
    }

    #[test]
    fn test_merge_is_permutation_invariant() {
        let a = vec![at(10.0, 1.0), at(12.0, 3.0)];
        let b = vec![at(11.0, 2.0)];
        let c = vec![at(13.0, 4.0), at(14.0, 5.0)];

        let orders = [
            vec![a.clone(), b.clone(), c.clone()],
            vec![c.clone(), a.clone(), b.clone()],
            vec![b.clone(), c.clone(), a.clone()],
        ];
        for order in orders {
            let table = merge_sessions(StreamKind::Temp, order);
            assert!(table
                .samples()
                .windows(2)
                .all(|w| w[0].timestamp <= w[1].timestamp));
            assert_eq!(scalar_values(table.samples()), vec![1.0, 2.0, 3.0, 4.0, 5.0]);
        }
    }

    #[test]
    fn test_ties_keep_arrival_order() {
        let table = merge_sessions(
            StreamKind::Eda,
            vec![vec![at(5.0, 1.0)], vec![at(5.0, 2.0)]],
        );
        assert_eq!(scalar_values(table.samples()), vec![1.0, 2.0]);
    }

    #[test]
    fn test_empty_sessions_add_nothing() {
        let mut merger = StreamMerger::new(StreamKind::Ibi);
        merger.add_session(Vec::new());
        merger.add_session(vec![at(1.0, 800.0)]);
        assert_eq!(merger.finish().len(), 1);
    }
}
