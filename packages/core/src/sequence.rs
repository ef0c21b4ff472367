//! In-process job ID allocator for imported data.

use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::JobId;

/// Errors returned by [`SequenceAllocator`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SequenceError {
    #[error("sequence allocator used before initialization")]
    NotInitialized,
    #[error("reservation of {count} ids at {start} crosses the ceiling {ceiling}")]
    CeilingReached { start: i64, count: i64, ceiling: i64 },
    #[error("invalid reservation size {0}")]
    InvalidCount(i64),
}

#[derive(Debug, Default)]
struct AllocatorState {
    initialized: bool,
    /// Next ID to hand out.
    next: i64,
    /// Highest floor observed by `initialize`.
    floor: i64,
    /// First ID this allocator must never reach.
    ceiling: Option<i64>,
}

/// Issues disjoint, strictly increasing job ID ranges.
///
/// Reservations are permanent: a range handed out is never handed out again,
/// even if the caller fails to use it.
#[derive(Debug, Default)]
pub struct SequenceAllocator {
    state: Mutex<AllocatorState>,
}

impl SequenceAllocator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocator that refuses to hand out IDs at or above `ceiling`.
    pub fn with_ceiling(ceiling: i64) -> Self {
        let allocator = Self::default();
        allocator.lock().ceiling = Some(ceiling);
        allocator
    }

    fn lock(&self) -> MutexGuard<'_, AllocatorState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Raise the next value to at least `floor + 1`.
    ///
    /// Never lowers it, so re-initializing with an older floor is harmless.
    /// Returns the effective floor (the highest one observed).
    pub fn initialize(&self, floor: i64) -> i64 {
        let mut state = self.lock();
        state.floor = state.floor.max(floor.max(0));
        state.next = state.next.max(state.floor + 1);
        state.initialized = true;
        state.floor
    }

    pub fn is_initialized(&self) -> bool {
        self.lock().initialized
    }

    /// Effective floor, `0` before initialization.
    pub fn floor(&self) -> i64 {
        self.lock().floor
    }

    pub fn ceiling(&self) -> Option<i64> {
        self.lock().ceiling
    }

    /// Reserve `count` consecutive IDs and return the first one.
    pub fn reserve(&self, count: i64) -> Result<JobId, SequenceError> {
        if count <= 0 {
            return Err(SequenceError::InvalidCount(count));
        }
        let mut state = self.lock();
        if !state.initialized {
            return Err(SequenceError::NotInitialized);
        }
        let start = state.next;
        let end = start
            .checked_add(count)
            .ok_or(SequenceError::InvalidCount(count))?;
        if let Some(ceiling) = state.ceiling
            && end > ceiling
        {
            return Err(SequenceError::CeilingReached {
                start,
                count,
                ceiling,
            });
        }
        state.next = end;
        Ok(JobId(start))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;

    #[test]
    fn reserves_after_floor() {
        let allocator = SequenceAllocator::new();
        allocator.initialize(500);
        assert_eq!(allocator.reserve(10).unwrap(), JobId(501));
        assert_eq!(allocator.reserve(5).unwrap(), JobId(511));
    }

    #[test]
    fn initialize_never_lowers_floor() {
        let allocator = SequenceAllocator::new();
        assert_eq!(allocator.initialize(900), 900);
        assert_eq!(allocator.initialize(100), 900);
        assert_eq!(allocator.reserve(1).unwrap(), JobId(901));
        // Raising the floor past handed-out ranges moves the counter forward.
        allocator.initialize(2000);
        assert_eq!(allocator.reserve(1).unwrap(), JobId(2001));
        // A floor below the counter keeps the counter.
        allocator.initialize(1500);
        assert_eq!(allocator.reserve(1).unwrap(), JobId(2002));
    }

    #[test]
    fn rejects_use_before_initialize() {
        let allocator = SequenceAllocator::new();
        assert_eq!(allocator.reserve(1), Err(SequenceError::NotInitialized));
        allocator.initialize(0);
        assert_eq!(allocator.reserve(0), Err(SequenceError::InvalidCount(0)));
        assert_eq!(allocator.reserve(1).unwrap(), JobId(1));
    }

    #[test]
    fn ceiling_bounds_reservations() {
        let allocator = SequenceAllocator::with_ceiling(111);
        allocator.initialize(100);
        assert_eq!(allocator.reserve(10).unwrap(), JobId(101));
        assert!(matches!(
            allocator.reserve(2),
            Err(SequenceError::CeilingReached { start: 111, .. })
        ));
        // A failed reservation consumes nothing.
        assert!(matches!(
            allocator.reserve(1),
            Err(SequenceError::CeilingReached { .. })
        ));
    }

    #[test]
    fn concurrent_reservations_are_disjoint() {
        let allocator = Arc::new(SequenceAllocator::new());
        allocator.initialize(0);

        let handles: Vec<_> = (0..8)
            .map(|worker| {
                let allocator = allocator.clone();
                std::thread::spawn(move || {
                    (0..200)
                        .map(|i| {
                            let count = 1 + (worker + i) % 5;
                            let start = allocator.reserve(count).unwrap();
                            (start.0, count)
                        })
                        .collect::<Vec<_>>()
                })
            })
            .collect();

        let mut ranges: Vec<(i64, i64)> = handles
            .into_iter()
            .flat_map(|h| h.join().unwrap())
            .collect();
        ranges.sort();
        for pair in ranges.windows(2) {
            let (start, count) = pair[0];
            assert!(start + count <= pair[1].0, "overlap at {start}");
        }
        let total: i64 = ranges.iter().map(|(_, c)| c).sum();
        let (last_start, last_count) = ranges[ranges.len() - 1];
        assert_eq!(last_start + last_count - 1, total);
    }
}
