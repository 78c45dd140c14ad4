//! # Query
//! State and behaviour shared by [`RemoteQuery`](crate::RemoteQuery) and
//! [`WindowedRemoteQuery`](crate::WindowedRemoteQuery).
//!
//! Each query type owns a [`QueryCore`] and implements [`Query`] (lifecycle, refresh, reset) and
//! [`Sequence`] (indexed access to the keys). [`RangeObservable`] comes for free with [`Query`].

use std::collections::HashMap;
use std::fmt::Debug;
use std::hash::Hash;
use std::ops::Range;
use std::rc::Rc;

use serde_json::Value;

use crate::data_model::{ListenerKey, ObserverKey, Observers, QueryEvent, QueryId, QueryUpdate, Status};
use crate::{Source, Store};

/// `get_keys_for_all_objects` asks for this many keys, the largest positive 32-bit integer.
pub const ALL_OBJECTS: usize = i32::MAX as usize;

/// Invoked by a source once the fetch it was handed is over.
pub type FetchCallback = Box<dyn FnOnce()>;

/// Receives the keys of a range (holes as `None`), and the clamped start and end of that range.
pub type RangeCallback<K> = Box<dyn FnOnce(&[Option<K>], usize, usize)>;

/// Receives the index of a key, or `None` if it is not in the list.
pub type IndexCallback = Box<dyn FnOnce(Option<usize>)>;

/// Whether marking a query obsolete refetches it straight away.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AutoRefresh {
    Never,
    /// Only if something is listening to or observing the query.
    #[default]
    IfObserved,
    Always,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct QueryConfig {
    pub auto_refresh: AutoRefresh,
}

/// The complete id list of a query, as computed by the server for `sort` and `filter`.
#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct FetchedQuery {
    pub sort: Value,
    pub filter: Value,
    pub state: String,
    pub ids: Vec<String>,
}

/// Result of looking up the record at an index.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Lookup<R> {
    /// The index is outside `[0, length)`, or the length is not known yet.
    OutOfRange,
    /// The index is valid but its key has not been loaded yet.
    Pending,
    Loaded(R),
}

struct AwaitingRange<K> {
    start: usize,
    end: usize,
    callback: RangeCallback<K>,
}

struct AwaitingIndexOf<K> {
    key: K,
    from: usize,
    callback: IndexCallback,
}

/// State every query has: identity, status, the sparse key list and its observers.
pub struct QueryCore<S: Store> {
    id: QueryId,
    store: Rc<S>,
    config: QueryConfig,
    sort: Value,
    filter: Value,
    state: String,
    status: Status,
    length: Option<usize>,
    pub(crate) list: Vec<Option<S::Key>>,
    awaiting_ranges: Vec<AwaitingRange<S::Key>>,
    awaiting_index_of: Vec<AwaitingIndexOf<S::Key>>,
    refresh_requested: bool,
    keys: HashMap<String, S::Key>,
    pub(crate) observers: Observers<S::Key>,
}

impl<S: Store> Debug for QueryCore<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueryCore")
            .field("id", &self.id)
            .field("sort", &self.sort)
            .field("filter", &self.filter)
            .field("state", &self.state)
            .field("status", &self.status)
            .field("length", &self.length)
            .field("list", &self.list)
            .field("awaiting_ranges", &self.awaiting_ranges.len())
            .field("observers", &self.observers)
            .finish()
    }
}

impl<S: Store> QueryCore<S> {
    /// Creates the core and registers the query with its store.
    pub fn new(store: Rc<S>, config: QueryConfig, sort: Value, filter: Value) -> Self {
        let id = QueryId::next();
        store.add_query(id);
        Self {
            id,
            store,
            config,
            sort,
            filter,
            state: String::new(),
            status: Status::EMPTY,
            length: None,
            list: Vec::new(),
            awaiting_ranges: Vec::new(),
            awaiting_index_of: Vec::new(),
            refresh_requested: false,
            keys: HashMap::new(),
            observers: Observers::default(),
        }
    }

    pub fn id(&self) -> QueryId {
        self.id
    }

    pub fn store(&self) -> &Rc<S> {
        &self.store
    }

    pub fn config(&self) -> &QueryConfig {
        &self.config
    }

    pub fn sort(&self) -> &Value {
        &self.sort
    }

    pub fn filter(&self) -> &Value {
        &self.filter
    }

    pub fn state(&self) -> &str {
        &self.state
    }

    pub fn status(&self) -> Status {
        self.status
    }

    pub fn length(&self) -> Option<usize> {
        self.length
    }

    /// The loaded part of the list. Entries at or past `length` are meaningless.
    pub fn list(&self) -> &[Option<S::Key>] {
        &self.list
    }

    pub fn is_destroyed(&self) -> bool {
        self.status
            .intersects(Status::DESTROYED | Status::NON_EXISTENT)
    }

    /// Whether a response computed for `sort` and `filter` still applies to this query.
    pub fn matches(&self, sort: &Value, filter: &Value) -> bool {
        self.sort == *sort && self.filter == *filter
    }

    pub(crate) fn set_status(&mut self, status: Status) {
        let old = self.status;
        if old != status {
            self.status = status;
            self.observers
                .fire(QueryEvent::StatusChanged { old, new: status });
        }
    }

    pub(crate) fn set_length(&mut self, length: Option<usize>) {
        let old = self.length;
        if old != length {
            self.length = length;
            self.observers
                .fire(QueryEvent::LengthChanged { old, new: length });
        }
    }

    pub(crate) fn set_state(&mut self, state: String) {
        self.state = state;
    }

    pub(crate) fn request_refresh(&mut self) {
        self.refresh_requested = true;
    }

    pub(crate) fn take_refresh_requested(&mut self) -> bool {
        std::mem::take(&mut self.refresh_requested)
    }

    /// Maps a server id to a store key, asking the store only once per id.
    pub(crate) fn to_key(&mut self, id: &str) -> S::Key {
        if let Some(key) = self.keys.get(id) {
            return key.clone();
        }
        let key = self.store.key_for_id(id);
        self.keys.insert(id.to_owned(), key.clone());
        key
    }

    pub(crate) fn index_of(&self, key: &S::Key, from: usize) -> Option<usize> {
        self.list
            .iter()
            .skip(from)
            .position(|k| k.as_ref() == Some(key))
            .map(|position| position + from)
    }

    /// The keys in `[start, end)`, with holes (including past the loaded part) as `None`.
    pub(crate) fn slice(&self, start: usize, end: usize) -> Vec<Option<S::Key>> {
        (start..end)
            .map(|index| self.list.get(index).cloned().flatten())
            .collect()
    }

    /// Clamps `[start, end)` to `[0, length)` and hands the keys to `callback`.
    pub(crate) fn send_range(&self, start: usize, end: usize, callback: RangeCallback<S::Key>) {
        let length = self.length.unwrap_or(0);
        let end = end.min(length);
        let start = start.min(end);
        let keys = self.slice(start, end);
        callback(&keys, start, end);
    }

    pub(crate) fn wait_for_range(&mut self, start: usize, end: usize, callback: RangeCallback<S::Key>) {
        self.awaiting_ranges.push(AwaitingRange {
            start,
            end,
            callback,
        });
    }

    pub(crate) fn wait_for_index_of(&mut self, key: S::Key, from: usize, callback: IndexCallback) {
        self.awaiting_index_of.push(AwaitingIndexOf {
            key,
            from,
            callback,
        });
    }

    /// Notifies listeners. Range requests still waiting for ids are moved first so they keep
    /// pointing at the same logical items.
    pub(crate) fn fire(&mut self, event: QueryEvent<S::Key>) {
        if let QueryEvent::Updated(update) = &event {
            self.adjust_awaiting_ranges(update);
        }
        self.observers.fire(event);
    }

    pub(crate) fn range_did_change(&mut self, range: Range<usize>) {
        self.observers.range_did_change(range);
    }

    fn adjust_awaiting_ranges(&mut self, update: &QueryUpdate<S::Key>) {
        for awaiting in &mut self.awaiting_ranges {
            let (mut start, mut end) = (awaiting.start, awaiting.end);
            for &index in &update.removed_indexes {
                if index < start {
                    start -= 1;
                }
                if index < end {
                    end -= 1;
                }
            }
            for &index in &update.added_indexes {
                if index <= start {
                    start += 1;
                }
                if index < end {
                    end += 1;
                }
            }
            awaiting.start = start;
            awaiting.end = end;
        }
    }
}

/// Indexed access to the keys of a query.
pub trait Sequence {
    type Key: Clone + Eq + Hash + Debug + 'static;
    type Record;

    /// Total number of items, or `None` before the first fetch.
    fn length(&self) -> Option<usize>;

    fn get_object_at(&mut self, index: usize, skip_fetch: bool) -> Lookup<Self::Record>;

    /// Searches the loaded part of the list from `from` onwards.
    ///
    /// With a callback, a miss that may be due to unloaded ids is answered once more ids arrive.
    fn index_of_key(
        &mut self,
        key: &Self::Key,
        from: usize,
        callback: Option<IndexCallback>,
    ) -> Option<usize>;

    /// Hands the keys in `[start, end)` to `callback`. Returns true if the answer is pending, false
    /// if `callback` has already been called.
    fn get_keys_for_range(
        &mut self,
        start: usize,
        end: usize,
        callback: RangeCallback<Self::Key>,
    ) -> bool;

    fn get_keys_for_all_objects(&mut self, callback: RangeCallback<Self::Key>) -> bool {
        self.get_keys_for_range(0, ALL_OBJECTS, callback)
    }
}

/// Lifecycle shared by every query type.
pub trait Query: Sequence + Sized + 'static {
    type Store: Store<Key = Self::Key, Record = Self::Record>;

    fn core(&self) -> &QueryCore<Self::Store>;

    fn core_mut(&mut self) -> &mut QueryCore<Self::Store>;

    fn source(&self) -> Rc<dyn Source<Self>>;

    /// Makes sure data around `index` is being fetched. Returns true if records are fetched by the
    /// query itself, so the store need not fetch them one by one.
    fn fetch_data_for_object_at(&mut self, _index: usize) -> bool {
        false
    }

    /// Called at the start of `reset`, before the shared state is cleared.
    fn will_reset(&mut self) {}

    /// Called by `destroy` once the query is marked destroyed. Drop anything that would call back
    /// into the caller.
    fn will_destroy(&mut self) {}

    fn id(&self) -> QueryId {
        self.core().id()
    }

    fn status(&self) -> Status {
        self.core().status()
    }

    fn is(&self, status: Status) -> bool {
        self.core().status().intersects(status)
    }

    fn state(&self) -> &str {
        self.core().state()
    }

    fn sort(&self) -> &Value {
        self.core().sort()
    }

    fn filter(&self) -> &Value {
        self.core().filter()
    }

    /// Hands the query to its source.
    fn fetch(&mut self, callback: Option<FetchCallback>) {
        if self.core().is_destroyed() {
            log::debug!("Not fetching destroyed {}", self.id());
            return;
        }
        let source = self.source();
        source.fetch_query(self, callback);
    }

    /// Fetches the query if forced, never fetched, or obsolete. Otherwise there is nothing to do and
    /// `callback` runs straight away.
    fn refresh(&mut self, force: bool, callback: Option<FetchCallback>) -> &mut Self {
        let status = self.status();
        if force || status == Status::EMPTY || status.contains(Status::OBSOLETE) {
            if status.contains(Status::READY) {
                self.core_mut().request_refresh();
            }
            self.fetch(callback);
        } else if let Some(callback) = callback {
            callback();
        }
        self
    }

    /// Throws away everything known about the list.
    fn reset(&mut self) {
        reset_query(self, false);
    }

    /// Changing the sort resets the query and fetches it again.
    fn set_sort(&mut self, sort: Value) {
        if *self.sort() != sort {
            self.core_mut().sort = sort;
            reset_query(self, true);
        }
    }

    /// Changing the filter resets the query and fetches it again.
    fn set_filter(&mut self, filter: Value) {
        if *self.filter() != filter {
            self.core_mut().filter = filter;
            reset_query(self, true);
        }
    }

    /// Marks the server data as possibly changed, refetching according to the auto-refresh policy.
    fn set_obsolete(&mut self) {
        if self.core().is_destroyed() {
            return;
        }
        let status = self.status();
        self.core_mut().set_status(status | Status::OBSOLETE);
        let refetch = match self.core().config().auto_refresh {
            AutoRefresh::Never => false,
            AutoRefresh::IfObserved => self.core().observers.is_observed(),
            AutoRefresh::Always => true,
        };
        if refetch {
            self.refresh(false, None);
        }
    }

    fn destroy(&mut self) {
        if self.core().is_destroyed() {
            return;
        }
        let status = if self.is(Status::EMPTY) {
            Status::NON_EXISTENT
        } else {
            Status::DESTROYED
        };
        let core = self.core_mut();
        core.set_status(status);
        core.store.remove_query(core.id);
        core.observers.clear();
        core.awaiting_ranges.clear();
        core.awaiting_index_of.clear();
        self.will_destroy();
    }

    fn register_listener(
        &mut self,
        listener: impl FnMut(ListenerKey, &QueryEvent<Self::Key>) + 'static,
    ) -> ListenerKey {
        self.core_mut().observers.register_listener(listener)
    }

    fn unregister_listener(&mut self, key: ListenerKey) {
        self.core_mut().observers.unregister_listener(key)
    }
}

/// Subscriptions to changes within an index range.
pub trait RangeObservable {
    fn add_range_observer(
        &mut self,
        range: Range<usize>,
        callback: impl FnMut(Range<usize>) + 'static,
    ) -> ObserverKey;

    fn remove_range_observer(&mut self, key: ObserverKey);

    /// Tells the observers whose range intersects `range` that it changed.
    fn range_did_change(&mut self, range: Range<usize>);
}

impl<Q: Query> RangeObservable for Q {
    fn add_range_observer(
        &mut self,
        range: Range<usize>,
        callback: impl FnMut(Range<usize>) + 'static,
    ) -> ObserverKey {
        self.core_mut().observers.add_range_observer(range, callback)
    }

    fn remove_range_observer(&mut self, key: ObserverKey) {
        self.core_mut().observers.remove_range_observer(key)
    }

    fn range_did_change(&mut self, range: Range<usize>) {
        self.core_mut().range_did_change(range)
    }
}

/// Clears the list and pending range requests and goes back to `EMPTY`. When the reset was caused
/// by a sort or filter change, the query is fetched again straight away.
pub(crate) fn reset_query<Q: Query>(query: &mut Q, refetch: bool) {
    query.will_reset();

    let core = query.core_mut();
    let length = core.length.unwrap_or(0);
    core.list.clear();
    core.awaiting_ranges.clear();
    core.refresh_requested = false;
    core.state.clear();
    core.set_status(Status::EMPTY);
    core.set_length(None);
    core.range_did_change(0..length);
    core.fire(QueryEvent::Reset);

    if refetch {
        query.fetch(None);
    }
}

/// Fires `IdsLoaded`, then replays (in order) the range requests and index lookups that were
/// waiting for ids. Each waiting request is replayed once; if it still can't be answered it queues
/// itself again.
pub(crate) fn ids_were_loaded<Q: Query>(query: &mut Q) {
    query.core_mut().fire(QueryEvent::IdsLoaded);

    let awaiting = std::mem::take(&mut query.core_mut().awaiting_ranges);
    for AwaitingRange {
        start,
        end,
        callback,
    } in awaiting
    {
        query.get_keys_for_range(start, end, callback);
    }

    let awaiting = std::mem::take(&mut query.core_mut().awaiting_index_of);
    for AwaitingIndexOf {
        key,
        from,
        callback,
    } in awaiting
    {
        callback(query.core().index_of(&key, from));
    }
}

/// Shared body of [`Sequence::get_object_at`].
pub(crate) fn object_at<Q: Query>(
    query: &mut Q,
    index: usize,
    skip_fetch: bool,
) -> Lookup<Q::Record> {
    let Some(length) = query.core().length() else {
        return Lookup::OutOfRange;
    };
    if index >= length {
        return Lookup::OutOfRange;
    }
    let skip_fetch = skip_fetch || query.fetch_data_for_object_at(index);
    let core = query.core();
    match core.list.get(index).cloned().flatten() {
        Some(key) => match core.store().record(&key, skip_fetch) {
            Some(record) => Lookup::Loaded(record),
            None => Lookup::Pending,
        },
        None => Lookup::Pending,
    }
}
