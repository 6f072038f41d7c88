//! Shard objects and their split state machine.

use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};

use num_enum::{IntoPrimitive, TryFromPrimitive};

use metafs_types::{make_error_msg, Result, ShardCode, ShardId, Void};

/// Split lifecycle of a shard.
#[derive(Debug, Clone, Copy, PartialEq, Eq, IntoPrimitive, TryFromPrimitive)]
#[repr(u8)]
pub enum ShardStatus {
    Normal = 0,
    /// Reserved intermediate state, never entered on its own.
    ToBeSplit = 1,
    /// Serving its full range while a split is in flight; mutations are
    /// additionally appended to the migration log.
    IsSplit = 2,
    /// Ranges published; the handed-off sub-range now belongs to the child.
    SplitAlmostDone = 3,
    /// Freshly created migration target, not yet caught up.
    NotReady = 4,
}

/// Events that drive status changes. The `Normal -> IsSplit` edge is not an
/// event here: it goes through `try_begin_split` so that exactly one trigger
/// wins per threshold crossing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShardEvent {
    /// Coordinator published the narrowed parent range and the child range.
    RangesPublished,
    /// Log shipping fully caught up; the parent returns to normal service.
    CatchUpComplete,
    /// Target shard finished catch-up and becomes authoritative.
    Promoted,
}

/// The complete transition table. Anything not listed is invalid.
fn next_status(state: ShardStatus, event: ShardEvent) -> Option<ShardStatus> {
    use ShardEvent::*;
    use ShardStatus::*;
    match (state, event) {
        (IsSplit, RangesPublished) => Some(SplitAlmostDone),
        (SplitAlmostDone, CatchUpComplete) => Some(Normal),
        (NotReady, Promoted) => Some(Normal),
        _ => None,
    }
}

/// One shard: an inclusive routing key range plus split bookkeeping.
///
/// Owned by exactly one worker; the coordinator reads the counters without
/// locking (advisory for thresholds, exact ordering comes from log ids).
pub struct Shard {
    pub id: ShardId,
    /// Parent shard this one was split from; equal to `id` for bootstrap
    /// shards.
    pub predecessor_id: ShardId,
    start_key: AtomicU64,
    end_key: AtomicU64,
    element_count: AtomicU64,
    /// Origin side: next log id to assign. Target side: next log id to apply.
    log_cursor: AtomicU64,
    status: AtomicU8,
}

impl Shard {
    pub fn new(id: ShardId, start_key: u64, end_key: u64, status: ShardStatus) -> Self {
        Self {
            id,
            predecessor_id: id,
            start_key: AtomicU64::new(start_key),
            end_key: AtomicU64::new(end_key),
            element_count: AtomicU64::new(0),
            log_cursor: AtomicU64::new(0),
            status: AtomicU8::new(status.into()),
        }
    }

    pub fn new_child(id: ShardId, predecessor_id: ShardId, start_key: u64, end_key: u64) -> Self {
        let mut shard = Self::new(id, start_key, end_key, ShardStatus::NotReady);
        shard.predecessor_id = predecessor_id;
        shard
    }

    /// Current status. A byte outside the status enum means the state word
    /// was corrupted; abort rather than keep serving.
    pub fn status(&self) -> ShardStatus {
        let raw = self.status.load(Ordering::Acquire);
        match ShardStatus::try_from(raw) {
            Ok(status) => status,
            Err(_) => panic!("shard {}: corrupt status byte {}", self.id, raw),
        }
    }

    #[cfg(test)]
    fn set_raw_status(&self, raw: u8) {
        self.status.store(raw, Ordering::Release);
    }

    /// Apply an event through the transition table. Fails on any edge the
    /// table does not allow; races on the same edge lose cleanly.
    pub fn apply_event(&self, event: ShardEvent) -> Result<Void> {
        let current = self.status();
        let next = match next_status(current, event) {
            Some(next) => next,
            None => {
                return make_error_msg(
                    ShardCode::BAD_TRANSITION,
                    format!("shard {}: {:?} in {:?}", self.id, event, current),
                );
            }
        };
        let swapped = self.status.compare_exchange(
            current.into(),
            next.into(),
            Ordering::AcqRel,
            Ordering::Acquire,
        );
        if swapped.is_err() {
            return make_error_msg(
                ShardCode::BAD_TRANSITION,
                format!("shard {}: lost {:?} race", self.id, event),
            );
        }
        Ok(())
    }

    /// The one safety-critical CAS: `Normal -> IsSplit`. Returns true for
    /// exactly one caller per threshold crossing.
    pub fn try_begin_split(&self) -> bool {
        self.status
            .compare_exchange(
                ShardStatus::Normal.into(),
                ShardStatus::IsSplit.into(),
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok()
    }

    pub fn start_key(&self) -> u64 {
        self.start_key.load(Ordering::Acquire)
    }

    pub fn end_key(&self) -> u64 {
        self.end_key.load(Ordering::Acquire)
    }

    pub fn contains(&self, bucket: u64) -> bool {
        self.start_key() <= bucket && bucket <= self.end_key()
    }

    /// Narrow the served range at publication time.
    pub fn set_end_key(&self, end_key: u64) {
        self.end_key.store(end_key, Ordering::Release);
    }

    /// Midpoint split of this shard's current range: the parent would retain
    /// `[start, mid]` and the child take `[mid + 1, end]`.
    pub fn split_point(&self) -> u64 {
        let start = self.start_key();
        let end = self.end_key();
        start + (end - start) / 2
    }

    pub fn element_count(&self) -> u64 {
        self.element_count.load(Ordering::Relaxed)
    }

    pub fn add_elements(&self, n: u64) -> u64 {
        self.element_count.fetch_add(n, Ordering::Relaxed) + n
    }

    pub fn sub_elements(&self, n: u64) {
        self.element_count.fetch_sub(n, Ordering::Relaxed);
    }

    pub fn log_cursor(&self) -> u64 {
        self.log_cursor.load(Ordering::Acquire)
    }

    /// Origin side: claim the next log id.
    pub fn next_log_id(&self) -> u64 {
        self.log_cursor.fetch_add(1, Ordering::AcqRel)
    }

    /// Target side: record that everything below `cursor` has been applied.
    pub fn advance_log_cursor(&self, cursor: u64) {
        self.log_cursor.fetch_max(cursor, Ordering::AcqRel);
    }

    pub fn reset_log_cursor(&self) {
        self.log_cursor.store(0, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Arc;

    fn shard(status: ShardStatus) -> Shard {
        Shard::new(ShardId(1), 0, 1023, status)
    }

    #[test]
    fn test_transition_table_exhaustive() {
        use ShardEvent::*;
        use ShardStatus::*;
        let states = [Normal, ToBeSplit, IsSplit, SplitAlmostDone, NotReady];
        let events = [RangesPublished, CatchUpComplete, Promoted];
        for state in states {
            for event in events {
                let expect = match (state, event) {
                    (IsSplit, RangesPublished) => Some(SplitAlmostDone),
                    (SplitAlmostDone, CatchUpComplete) => Some(Normal),
                    (NotReady, Promoted) => Some(Normal),
                    _ => None,
                };
                let s = shard(state);
                let result = s.apply_event(event);
                match expect {
                    Some(next) => {
                        result.unwrap();
                        assert_eq!(s.status(), next, "{:?} + {:?}", state, event);
                    }
                    None => {
                        assert_eq!(result.unwrap_err().code(), ShardCode::BAD_TRANSITION);
                        assert_eq!(s.status(), state, "{:?} must not move on {:?}", state, event);
                    }
                }
            }
        }
    }

    #[test]
    fn test_begin_split_only_from_normal() {
        let s = shard(ShardStatus::Normal);
        assert!(s.try_begin_split());
        assert_eq!(s.status(), ShardStatus::IsSplit);
        assert!(!s.try_begin_split());
        assert!(!shard(ShardStatus::NotReady).try_begin_split());
        assert!(!shard(ShardStatus::SplitAlmostDone).try_begin_split());
    }

    #[test]
    fn test_begin_split_exactly_once_under_race() {
        let s = Arc::new(shard(ShardStatus::Normal));
        let wins = Arc::new(AtomicUsize::new(0));
        let mut handles = Vec::new();
        for _ in 0..16 {
            let s = Arc::clone(&s);
            let wins = Arc::clone(&wins);
            handles.push(std::thread::spawn(move || {
                for _ in 0..100 {
                    if s.try_begin_split() {
                        wins.fetch_add(1, Ordering::Relaxed);
                    }
                }
            }));
        }
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(wins.load(Ordering::Relaxed), 1);
        assert_eq!(s.status(), ShardStatus::IsSplit);
    }

    #[test]
    #[should_panic(expected = "corrupt status byte")]
    fn test_corrupt_status_byte_aborts() {
        let s = shard(ShardStatus::Normal);
        s.set_raw_status(9);
        let _ = s.status();
    }

    #[test]
    fn test_split_point_midpoint() {
        assert_eq!(Shard::new(ShardId(0), 0, 1023, ShardStatus::Normal).split_point(), 511);
        assert_eq!(Shard::new(ShardId(0), 512, 1023, ShardStatus::Normal).split_point(), 767);
        assert_eq!(Shard::new(ShardId(0), 4, 5, ShardStatus::Normal).split_point(), 4);
    }

    #[test]
    fn test_range_and_counters() {
        let s = shard(ShardStatus::Normal);
        assert!(s.contains(0));
        assert!(s.contains(1023));
        assert!(!s.contains(1024));
        s.set_end_key(511);
        assert!(!s.contains(512));

        assert_eq!(s.add_elements(3), 3);
        s.sub_elements(1);
        assert_eq!(s.element_count(), 2);

        assert_eq!(s.next_log_id(), 0);
        assert_eq!(s.next_log_id(), 1);
        assert_eq!(s.log_cursor(), 2);
        s.reset_log_cursor();
        assert_eq!(s.log_cursor(), 0);

        s.advance_log_cursor(5);
        s.advance_log_cursor(3);
        assert_eq!(s.log_cursor(), 5);
    }
}
