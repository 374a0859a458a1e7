//! The circular observation buffer
//!
//! A power-of-two bounded ring of committed observations. Sequence numbers
//! are assigned in commit order and are strictly monotonic; `first` and
//! `latest` checkpoints bracket the live range and an incremental
//! checkpoint ring enables O(1) state reconstruction at any live sequence.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Weak};

use parking_lot::{Mutex, MutexGuard};
use tracing::trace;

use agent_types::{DataItem, Observation, ObservationPtr, SequenceNumber};

use crate::checkpoint::{Checkpoint, FilterSet};
use crate::observer::{ChangeObserver, ObserverInner};

/// A windowed read of the buffer, with the metadata a long-poll needs to
/// continue.
#[derive(Debug, Clone)]
pub struct ObservationRange {
    /// Matching observations in ascending sequence order
    pub observations: Vec<ObservationPtr>,
    /// First live sequence at read time (adjusted for `from`)
    pub first_sequence: SequenceNumber,
    /// The sequence to continue from
    pub end_sequence: SequenceNumber,
    /// True when the walk reached the live end of the buffer
    pub end_of_buffer: bool,
}

struct Inner {
    capacity: usize,
    checkpoint_freq: u64,
    ring: VecDeque<ObservationPtr>,
    first_sequence: SequenceNumber,
    next_sequence: SequenceNumber,
    first: Checkpoint,
    latest: Checkpoint,
    checkpoints: VecDeque<Checkpoint>,
    checkpoint_count: usize,
    observers: HashMap<String, Vec<Weak<ObserverInner>>>,
}

/// Bounded ephemeral storage of observations and checkpoint management.
///
/// All public operations take the single internal lock; [`CircularBuffer::lock`]
/// hands the guard out so readers can compose a consistent multi-step
/// snapshot.
pub struct CircularBuffer {
    inner: Mutex<Inner>,
}

impl CircularBuffer {
    /// Create a buffer of capacity `2^size_exponent` with a checkpoint
    /// every `checkpoint_freq` sequences.
    pub fn new(size_exponent: u32, checkpoint_freq: u64) -> Self {
        let capacity = 1usize << size_exponent;
        let checkpoint_count = capacity / checkpoint_freq as usize;
        Self {
            inner: Mutex::new(Inner {
                capacity,
                checkpoint_freq,
                ring: VecDeque::with_capacity(capacity),
                first_sequence: 1,
                next_sequence: 1,
                first: Checkpoint::new(),
                latest: Checkpoint::new(),
                checkpoints: VecDeque::with_capacity(checkpoint_count),
                checkpoint_count,
                observers: HashMap::new(),
            }),
        }
    }

    /// Take the buffer lock for a consistent multi-read snapshot.
    pub fn lock(&self) -> BufferGuard<'_> {
        BufferGuard {
            inner: self.inner.lock(),
        }
    }

    /// Commit an observation: assign the next sequence, fold checkpoints,
    /// signal observers. Returns sequence 0 for orphans.
    pub fn add(&self, observation: Observation) -> (SequenceNumber, ObservationPtr) {
        self.lock().add(observation)
    }

    /// Check an observation against the latest checkpoint's duplicate
    /// rules.
    pub fn check_duplicate(&self, observation: &ObservationPtr) -> Option<ObservationPtr> {
        self.lock().check_duplicate(observation)
    }

    /// Register an observer for a set of data item ids.
    pub fn add_observer<I>(&self, observer: &ChangeObserver, data_item_ids: I)
    where
        I: IntoIterator<Item = String>,
    {
        let mut guard = self.inner.lock();
        for id in data_item_ids {
            guard
                .observers
                .entry(id)
                .or_default()
                .push(observer.handle());
        }
    }

    /// Re-point every stored observation after a device-model swap;
    /// observations whose data item vanished become orphans.
    pub fn update_data_items(&self, map: &HashMap<String, Arc<DataItem>>) {
        let mut guard = self.inner.lock();
        for slot in guard.ring.iter_mut() {
            if let Some(rebound) = slot.rebind(map) {
                *slot = Arc::new(rebound);
            }
        }
        guard.first.update_data_items(map);
        guard.latest.update_data_items(map);
        for cp in guard.checkpoints.iter_mut() {
            cp.update_data_items(map);
        }
    }
}

/// The held buffer lock. Readers may issue several queries against one
/// guard to observe a single consistent state.
pub struct BufferGuard<'a> {
    inner: MutexGuard<'a, Inner>,
}

impl BufferGuard<'_> {
    pub fn capacity(&self) -> usize {
        self.inner.capacity
    }

    /// One greater than the last committed sequence.
    pub fn next_sequence(&self) -> SequenceNumber {
        self.inner.next_sequence
    }

    pub fn first_sequence(&self) -> SequenceNumber {
        self.inner.first_sequence
    }

    pub fn checkpoint_frequency(&self) -> u64 {
        self.inner.checkpoint_freq
    }

    pub fn latest(&self) -> &Checkpoint {
        &self.inner.latest
    }

    pub fn first(&self) -> &Checkpoint {
        &self.inner.first
    }

    /// The observation committed at `sequence`, if still live.
    pub fn get_at(&self, sequence: SequenceNumber) -> Option<ObservationPtr> {
        if sequence < self.inner.first_sequence {
            return None;
        }
        let offset = (sequence - self.inner.first_sequence) as usize;
        self.inner.ring.get(offset).cloned()
    }

    pub fn check_duplicate(&self, observation: &ObservationPtr) -> Option<ObservationPtr> {
        self.inner.latest.check_duplicate(observation)
    }

    pub fn add(&mut self, mut observation: Observation) -> (SequenceNumber, ObservationPtr) {
        if observation.is_orphan() {
            return (0, Arc::new(observation));
        }

        let inner = &mut *self.inner;
        let seq = inner.next_sequence;
        observation.set_sequence(seq);
        let ptr = Arc::new(observation);

        if inner.ring.len() == inner.capacity {
            inner.ring.pop_front();
        }
        inner.ring.push_back(ptr.clone());
        inner.latest.add_observation(&ptr);

        // The first event primes the first checkpoint; thereafter the
        // front of a full ring folds in as it ages out.
        if seq == 1 {
            inner.first.add_observation(&ptr);
        } else if inner.ring.len() == inner.capacity {
            let oldest = inner.ring.front().cloned();
            if let Some(oldest) = oldest {
                inner.first.add_observation(&oldest);
                if oldest.sequence() > 1 {
                    inner.first_sequence += 1;
                }
            }
        }

        if inner.checkpoint_count > 0 && seq % inner.checkpoint_freq == 0 {
            if inner.checkpoints.len() == inner.checkpoint_count {
                inner.checkpoints.pop_front();
            }
            inner.checkpoints.push_back(inner.latest.clone());
        }

        Self::signal_observers(inner, ptr.data_item_id(), seq);

        inner.next_sequence += 1;
        trace!(sequence = seq, data_item = ptr.data_item_id(), "committed");
        (seq, ptr)
    }

    fn signal_observers(inner: &mut Inner, data_item_id: &str, sequence: SequenceNumber) {
        if let Some(handles) = inner.observers.get_mut(data_item_id) {
            handles.retain(|weak| match weak.upgrade() {
                Some(observer) => {
                    observer.signal(sequence);
                    true
                }
                None => false,
            });
            if handles.is_empty() {
                inner.observers.remove(data_item_id);
            }
        }
    }

    /// Reconstruct the checkpoint at sequence `at`: locate the nearest
    /// prior incremental checkpoint (or `first`), clone it under the
    /// filter, and replay the ring forward through `at`.
    pub fn checkpoint_at(
        &self,
        at: SequenceNumber,
        filter: Option<FilterSet>,
    ) -> Option<Checkpoint> {
        let inner = &self.inner;
        if at < inner.first_sequence || at >= inner.next_sequence {
            return None;
        }

        let freq = inner.checkpoint_freq;
        let fi = inner.first_sequence / freq;
        let li = at / freq;
        let dt = li as i64 - fi as i64 - 1;

        let (mut check, replay_from) = match usize::try_from(dt)
            .ok()
            .and_then(|i| inner.checkpoints.get(i))
        {
            Some(incremental) => {
                let check = Checkpoint::filtered_copy(incremental, filter);
                let checkpoint_seq = li * freq;
                if at == checkpoint_seq {
                    return Some(check);
                }
                (check, (checkpoint_seq - inner.first_sequence + 1) as usize)
            }
            None => {
                let check = Checkpoint::filtered_copy(&inner.first, filter);
                if at == inner.first_sequence {
                    return Some(check);
                }
                (check, 0)
            }
        };

        let through = (at - inner.first_sequence) as usize;
        for index in replay_from..=through {
            if let Some(obs) = inner.ring.get(index) {
                check.add_observation(obs);
            }
        }
        Some(check)
    }

    /// Walk the buffer accumulating observations matching the filter.
    ///
    /// A non-negative `count` walks forward from `from` (or backward from
    /// `to` when given); a negative `count` walks backward from the end.
    /// Results are returned in ascending sequence order either way.
    pub fn observations(
        &self,
        count: i64,
        filter: Option<&FilterSet>,
        from: Option<SequenceNumber>,
        to: Option<SequenceNumber>,
    ) -> ObservationRange {
        let inner = &self.inner;
        let mut first_seq = inner.first_sequence;
        let limit;
        let increment: i64;
        let start_at: SequenceNumber;

        if count >= 0 {
            if let Some(to) = to {
                if let Some(from) = from {
                    if from > first_seq {
                        first_seq = from;
                    }
                }
                start_at = to;
                increment = -1;
            } else {
                start_at = from.filter(|f| *f > first_seq).unwrap_or(first_seq);
                increment = 1;
            }
            limit = count;
        } else {
            start_at = from
                .filter(|f| *f < inner.next_sequence)
                .unwrap_or(inner.next_sequence - 1);
            increment = -1;
            limit = -count;
        }

        let max = inner.ring.len() as i64;
        let min = (first_seq - inner.first_sequence) as i64;
        let mut i = start_at as i64 - inner.first_sequence as i64;

        let mut results = Vec::new();
        let mut added = 0;
        while added < limit && i < max && i >= min {
            let obs = &inner.ring[i as usize];
            if !obs.is_orphan() {
                let matches = filter
                    .map(|f| f.contains(obs.data_item_id()))
                    .unwrap_or(true);
                if matches {
                    results.push(obs.clone());
                    added += 1;
                }
            }
            i += increment;
        }

        if increment < 0 {
            results.reverse();
        }

        let end_sequence = if to.is_some() {
            if start_at < inner.next_sequence {
                start_at + 1
            } else {
                inner.next_sequence
            }
        } else {
            (inner.first_sequence as i64 + i).max(0) as SequenceNumber
        };

        let end_of_buffer = if count >= 0 {
            i + inner.first_sequence as i64 >= inner.next_sequence as i64
        } else {
            i + (inner.first_sequence as i64) <= inner.first_sequence as i64
        };

        ObservationRange {
            observations: results,
            first_sequence: first_seq,
            end_sequence,
            end_of_buffer,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use agent_types::device::{DataItem, DataItemCategory};
    use agent_types::entity::{Properties, Value};
    use chrono::Utc;

    fn item(id: &str) -> Arc<DataItem> {
        Arc::new(
            DataItem::builder(id, DataItemCategory::Sample)
                .item_type("POSITION")
                .build()
                .unwrap(),
        )
    }

    fn obs(di: &Arc<DataItem>, value: f64) -> Observation {
        let mut props = Properties::new();
        props.insert("VALUE".into(), Value::Double(value));
        Observation::make(di, &props, Utc::now()).unwrap()
    }

    #[test]
    fn sequences_are_strictly_monotonic() {
        let buffer = CircularBuffer::new(3, 2);
        let di = item("x");
        for n in 1..=5u64 {
            let (seq, _) = buffer.add(obs(&di, n as f64));
            assert_eq!(seq, n);
        }
        let guard = buffer.lock();
        assert_eq!(guard.next_sequence(), 6);
        assert_eq!(guard.first_sequence(), 1);
    }

    #[test]
    fn orphans_are_not_committed() {
        let buffer = CircularBuffer::new(3, 2);
        let di = item("x");
        let o = obs(&di, 1.0);
        drop(di);
        let (seq, _) = buffer.add(o);
        assert_eq!(seq, 0);
        assert_eq!(buffer.lock().next_sequence(), 1);
    }

    #[test]
    fn overflow_advances_first_sequence() {
        // Capacity 8, checkpoint every 2, ten observations: two age out.
        let buffer = CircularBuffer::new(3, 2);
        let di = item("x");
        for n in 1..=10u64 {
            buffer.add(obs(&di, n as f64));
        }

        let guard = buffer.lock();
        assert_eq!(guard.first_sequence(), 3);
        assert_eq!(guard.next_sequence(), 11);
        assert!(guard.get_at(2).is_none());
        assert_eq!(guard.get_at(3).unwrap().sequence(), 3);

        let cp = guard.checkpoint_at(5, None).unwrap();
        assert_eq!(cp.get("x").unwrap().sequence(), 5);
        assert_eq!(cp.get("x").unwrap().value_text(), "5");
    }

    #[test]
    fn checkpoint_at_equals_fold_of_prefix() {
        let buffer = CircularBuffer::new(4, 4);
        let x = item("x");
        let y = item("y");
        for n in 1..=9u64 {
            if n % 2 == 0 {
                buffer.add(obs(&y, n as f64 * 10.0));
            } else {
                buffer.add(obs(&x, n as f64));
            }
        }

        let guard = buffer.lock();
        for at in guard.first_sequence()..guard.next_sequence() {
            let cp = guard.checkpoint_at(at, None).unwrap();
            // x holds the last odd sequence <= at; y the last even.
            let expect_x = (1..=at).filter(|s| s % 2 == 1).max();
            let expect_y = (1..=at).filter(|s| s % 2 == 0).max();
            assert_eq!(cp.get("x").map(|o| o.sequence()), expect_x, "x at {at}");
            assert_eq!(cp.get("y").map(|o| o.sequence()), expect_y, "y at {at}");
        }
    }

    #[test]
    fn checkpoint_at_rejects_dead_sequences() {
        let buffer = CircularBuffer::new(2, 2);
        let di = item("x");
        for n in 1..=6u64 {
            buffer.add(obs(&di, n as f64));
        }
        let guard = buffer.lock();
        assert!(guard.checkpoint_at(1, None).is_none());
        assert!(guard.checkpoint_at(guard.next_sequence(), None).is_none());
    }

    #[test]
    fn range_walks_forward_with_filter() {
        let buffer = CircularBuffer::new(4, 4);
        let x = item("x");
        let y = item("y");
        for n in 1..=6u64 {
            buffer.add(obs(&x, n as f64));
            buffer.add(obs(&y, n as f64));
        }

        let filter: FilterSet = ["x".to_string()].into_iter().collect();
        let range = buffer.lock().observations(3, Some(&filter), Some(1), None);
        let seqs: Vec<u64> = range.observations.iter().map(|o| o.sequence()).collect();
        assert_eq!(seqs, vec![1, 3, 5]);
        assert!(!range.end_of_buffer);

        // Continue from where the walk stopped.
        let range2 = buffer
            .lock()
            .observations(3, Some(&filter), Some(range.end_sequence), None);
        let seqs2: Vec<u64> = range2.observations.iter().map(|o| o.sequence()).collect();
        assert_eq!(seqs2, vec![7, 9, 11]);
    }

    #[test]
    fn negative_count_walks_backward_returning_ascending() {
        let buffer = CircularBuffer::new(4, 4);
        let di = item("x");
        for n in 1..=6u64 {
            buffer.add(obs(&di, n as f64));
        }
        let range = buffer.lock().observations(-3, None, None, None);
        let seqs: Vec<u64> = range.observations.iter().map(|o| o.sequence()).collect();
        assert_eq!(seqs, vec![4, 5, 6]);
    }

    #[test]
    fn end_of_buffer_is_reported() {
        let buffer = CircularBuffer::new(4, 4);
        let di = item("x");
        for n in 1..=3u64 {
            buffer.add(obs(&di, n as f64));
        }
        let range = buffer.lock().observations(100, None, Some(1), None);
        assert_eq!(range.observations.len(), 3);
        assert!(range.end_of_buffer);
        assert_eq!(range.end_sequence, 4);
    }

    #[test]
    fn observers_signal_on_commit() {
        let buffer = CircularBuffer::new(4, 4);
        let di = item("x");
        let observer = ChangeObserver::new();
        buffer.add_observer(&observer, ["x".to_string()]);

        assert!(!observer.was_signalled());
        let (seq, _) = buffer.add(obs(&di, 1.0));
        assert_eq!(observer.take_sequence(), Some(seq));
    }

    #[test]
    fn dropped_data_items_orphan_their_observations() {
        let buffer = CircularBuffer::new(4, 4);
        let di = item("x");
        let keep = item("y");
        buffer.add(obs(&di, 1.0));
        buffer.add(obs(&keep, 2.0));
        drop(di);

        let mut map = HashMap::new();
        map.insert("y".to_string(), keep.clone());
        buffer.update_data_items(&map);

        let guard = buffer.lock();
        assert!(guard.latest().get("x").is_none());
        assert!(guard.latest().get("y").is_some());
        let range = guard.observations(10, None, Some(1), None);
        assert_eq!(range.observations.len(), 1);
    }
}
