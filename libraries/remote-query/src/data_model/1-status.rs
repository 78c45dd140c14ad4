use std::sync::atomic::{AtomicU64, Ordering};

bitflags::bitflags! {
    /// Status of a query (or, as reported by a [`Store`](crate::Store), of a record).
    ///
    /// The flags are not mutually exclusive: a query being refreshed is `READY | LOADING`.
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
    pub struct Status: u16 {
        /// Never fetched.
        const EMPTY = 1 << 0;
        /// Has a length and at least some data.
        const READY = 1 << 1;
        const DESTROYED = 1 << 2;
        /// Destroyed before it was ever fetched.
        const NON_EXISTENT = 1 << 3;
        /// A fetch (or delta fetch) is in flight.
        const LOADING = 1 << 4;
        /// The server data may have changed; a refetch is needed.
        const OBSOLETE = 1 << 5;
        /// A preemptive update was applied since the last update fetch began, so an in-flight
        /// delta may not cover every local change.
        const DIRTY = 1 << 6;
    }
}

bitflags::bitflags! {
    /// Load state of one window of a windowed query.
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
    pub struct WindowState: u8 {
        const REQUESTED = 1 << 0;
        const LOADING = 1 << 1;
        /// Every id in the window is known.
        const READY = 1 << 2;
        const RECORDS_REQUESTED = 1 << 3;
        const RECORDS_LOADING = 1 << 4;
        const RECORDS_READY = 1 << 5;
    }
}

impl WindowState {
    pub const EMPTY: WindowState = WindowState::empty();

    const ANY_RECORDS: WindowState = WindowState::RECORDS_REQUESTED
        .union(WindowState::RECORDS_LOADING)
        .union(WindowState::RECORDS_READY);

    /// True once records have been asked for (or are already there).
    pub fn records_requested(self) -> bool {
        self.intersects(Self::ANY_RECORDS)
    }
}

/// Process-unique identifier of a query, used to register it with its store.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct QueryId(u64);

impl QueryId {
    pub(crate) fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        QueryId(NEXT.fetch_add(1, Ordering::Relaxed))
    }
}

impl std::fmt::Display for QueryId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "query#{}", self.0)
    }
}

/// Errors returned when a caller breaks the contract of a query entry point.
///
/// Divergence between local and server state is never an error; it is handled by refetching.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum QueryError {
    #[error("query has been destroyed")]
    Destroyed,
    #[error("query has not loaded its length yet")]
    NotReady,
    #[error("added index {index} is past the end of the updated list (length {total})")]
    AddedIndexOutOfRange { index: usize, total: usize },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_window_state_records_requested() {
        assert!(!WindowState::EMPTY.records_requested());
        assert!(!(WindowState::READY | WindowState::LOADING).records_requested());
        assert!(WindowState::RECORDS_LOADING.records_requested());
        assert!((WindowState::READY | WindowState::RECORDS_READY).records_requested());
    }

    #[test]
    fn test_query_ids_are_unique() {
        let a = QueryId::next();
        let b = QueryId::next();
        assert_ne!(a, b);
    }
}
