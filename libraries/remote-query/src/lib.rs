//! This is a library for keeping a client-side copy of a server-computed, ordered list of records.
//! The list may be huge, so it is fetched lazily in fixed-size windows, and it is kept consistent while
//! both the local user and the server change it.
//!
//! Syncing strategy:
//! 1. A query is identified by its sort and filter. The server hands out an opaque "state" token with
//!    every answer, naming the snapshot of the list the answer was computed against.
//! 2. The query keeps a sparse list of record keys. Windows of ids (and optionally records) are asked for
//!    as consumers look at them.
//! 3. When the server list changes, the server sends a delta from one state token to the next. The delta
//!    is applied by index arithmetic rather than by refetching the whole list.
//! 4. Local mutations are *predicted*: they are applied to the list straight away and remembered. When the
//!    server's delta arrives it is compared with the predictions, which are either confirmed or undone.
//!
//! Sounds simple, but there are a few tricky parts that this library handles: deltas that arrive for
//! a state we no longer have, id packets computed against an older state, and predictions that the
//! server disagrees with.
//!
//! The library does no I/O. A [`Source`] is responsible for talking to the server and a [`Store`] owns
//! the records themselves.

pub mod data_model;
pub mod memory;

use std::fmt::Debug;
use std::hash::Hash;

pub use data_model::{
    ALL_OBJECTS, AutoRefresh, FetchCallback, FetchRequest, FetchSettle, FetchedQuery,
    IdListPacket, IndexCallback, IndexedUpdate, ListenerKey, Lookup, ObserverKey, Query,
    QueryConfig, QueryCore, QueryDelta, QueryError, QueryEvent, QueryId, QueryUpdate,
    RangeCallback, RangeObservable, RangeRequest, RawUpdate, RemoteQuery, Sequence, Status,
    UpToMissing, WindowConfig, WindowState, WindowedRemoteQuery,
};

/// The record store a query reads from.
///
/// Queries never mutate the store; they only translate server ids into store keys and look
/// records up.
pub trait Store {
    /// Store-local identifier for a record. Distinct from the server-assigned id.
    type Key: Clone + Eq + Hash + Debug + 'static;
    type Record;

    fn key_for_id(&self, id: &str) -> Self::Key;

    /// The server id of a key, if the store knows it.
    fn id_for_key(&self, key: &Self::Key) -> Option<String>;

    /// Returns the record for a key. If `skip_fetch` is false, the store may start loading it.
    fn record(&self, key: &Self::Key, skip_fetch: bool) -> Option<Self::Record>;

    /// The load status of a record. Only `EMPTY` and `OBSOLETE` are inspected by queries.
    fn status(&self, key: &Self::Key) -> Status;

    fn add_query(&self, id: QueryId);

    fn remove_query(&self, id: QueryId);
}

/// Talks to the server on behalf of a query.
///
/// `fetch_query` is called whenever the query needs data. The source eventually calls back into
/// the query's `source_will_fetch_query` / `source_did_fetch_*` methods and finally invokes
/// `callback`, if there is one.
pub trait Source<Q> {
    fn fetch_query(&self, query: &mut Q, callback: Option<FetchCallback>);
}
