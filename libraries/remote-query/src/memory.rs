//! In-memory collaborators: a [`Store`] backed by hash maps, and a [`Source`] that performs no I/O
//! but records what it was asked for, so responses can be fed back by hand.

use std::cell::{Cell, RefCell};
use std::collections::{BTreeSet, HashMap};

use serde_json::Value;

use crate::data_model::{FetchCallback, FetchRequest, RemoteQuery, Status, WindowedRemoteQuery};
use crate::{Query, QueryId, Source, Store};

/// Keys are the server ids themselves; records are JSON values.
#[derive(Debug, Default)]
pub struct MemoryStore {
    records: RefCell<HashMap<String, Value>>,
    statuses: RefCell<HashMap<String, Status>>,
    queries: RefCell<BTreeSet<QueryId>>,
    requested: RefCell<Vec<String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, id: &str, record: Value) {
        self.records.borrow_mut().insert(id.to_owned(), record);
        self.statuses.borrow_mut().insert(id.to_owned(), Status::READY);
    }

    pub fn set_status(&self, id: &str, status: Status) {
        self.statuses.borrow_mut().insert(id.to_owned(), status);
    }

    /// Queries currently registered with the store.
    pub fn queries(&self) -> Vec<QueryId> {
        self.queries.borrow().iter().copied().collect()
    }

    /// Keys whose records were asked for but not present, in order.
    pub fn requested(&self) -> Vec<String> {
        self.requested.borrow().clone()
    }
}

impl Store for MemoryStore {
    type Key = String;
    type Record = Value;

    fn key_for_id(&self, id: &str) -> String {
        id.to_owned()
    }

    fn id_for_key(&self, key: &String) -> Option<String> {
        Some(key.clone())
    }

    fn record(&self, key: &String, skip_fetch: bool) -> Option<Value> {
        let record = self.records.borrow().get(key).cloned();
        if record.is_none() && !skip_fetch {
            log::trace!("Record {key} requested");
            self.requested.borrow_mut().push(key.clone());
        }
        record
    }

    fn status(&self, key: &String) -> Status {
        self.statuses
            .borrow()
            .get(key)
            .copied()
            .unwrap_or(Status::EMPTY)
    }

    fn add_query(&self, id: QueryId) {
        self.queries.borrow_mut().insert(id);
    }

    fn remove_query(&self, id: QueryId) {
        self.queries.borrow_mut().remove(&id);
    }
}

/// A source that tells the query a fetch has begun and then remembers the request. Nothing is ever
/// sent anywhere; the caller delivers the response through the query's `source_did_*` methods.
#[derive(Default)]
pub struct RecordingSource {
    fetches: Cell<usize>,
    refreshes: RefCell<Vec<bool>>,
    requests: RefCell<Vec<FetchRequest>>,
    callbacks: RefCell<Vec<FetchCallback>>,
}

impl RecordingSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// How many times a query asked to be fetched.
    pub fn fetch_count(&self) -> usize {
        self.fetches.get()
    }

    /// The refresh flags handed out by plain queries, oldest first.
    pub fn take_refreshes(&self) -> Vec<bool> {
        std::mem::take(&mut *self.refreshes.borrow_mut())
    }

    /// The requests built by windowed queries, oldest first.
    pub fn take_requests(&self) -> Vec<FetchRequest> {
        std::mem::take(&mut *self.requests.borrow_mut())
    }

    /// Runs the completion callbacks of every recorded fetch.
    pub fn finish_fetches(&self) {
        let callbacks = std::mem::take(&mut *self.callbacks.borrow_mut());
        for callback in callbacks {
            callback();
        }
    }

    fn record_fetch(&self, callback: Option<FetchCallback>) {
        self.fetches.set(self.fetches.get() + 1);
        if let Some(callback) = callback {
            self.callbacks.borrow_mut().push(callback);
        }
    }
}

impl<S: Store + 'static> Source<RemoteQuery<S>> for RecordingSource {
    fn fetch_query(&self, query: &mut RemoteQuery<S>, callback: Option<FetchCallback>) {
        let refresh = query.source_will_fetch_query();
        self.refreshes.borrow_mut().push(refresh);
        self.record_fetch(callback);
    }
}

impl<S: Store + 'static> Source<WindowedRemoteQuery<S>> for RecordingSource {
    fn fetch_query(&self, query: &mut WindowedRemoteQuery<S>, callback: Option<FetchCallback>) {
        let request = query.source_will_fetch_query();
        log::debug!("Recorded fetch for {}: {request:?}", query.core().id());
        self.requests.borrow_mut().push(request);
        self.record_fetch(callback);
    }
}
