//! A query whose source always returns the complete id list.

use std::rc::Rc;

use serde_json::Value;

use crate::data_model::{
    FetchedQuery, IndexCallback, Lookup, Query, QueryConfig, QueryCore, QueryEvent, QueryUpdate,
    RangeCallback, Sequence, Status, ids_were_loaded, object_at,
};
use crate::{Source, Store};

pub struct RemoteQuery<S: Store> {
    core: QueryCore<S>,
    source: Rc<dyn Source<RemoteQuery<S>>>,
}

impl<S: Store> std::fmt::Debug for RemoteQuery<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteQuery")
            .field("core", &self.core)
            .finish_non_exhaustive()
    }
}

impl<S: Store + 'static> RemoteQuery<S> {
    pub fn new(
        store: Rc<S>,
        source: Rc<dyn Source<RemoteQuery<S>>>,
        config: QueryConfig,
        sort: Value,
        filter: Value,
    ) -> Self {
        Self {
            core: QueryCore::new(store, config, sort, filter),
            source,
        }
    }

    /// Called by the source as it starts a fetch. Returns whether the fetch is a refresh of data
    /// the query already has.
    pub fn source_will_fetch_query(&mut self) -> bool {
        let refresh = self.core.take_refresh_requested();
        let status = self.core.status();
        self.core
            .set_status((status | Status::LOADING) - Status::OBSOLETE);
        refresh
    }

    /// Replaces the list with the complete list from the server.
    ///
    /// Only the changed middle section (between the longest common prefix and suffix) is reported
    /// as removed and added.
    pub fn source_did_fetch_query(&mut self, result: FetchedQuery) {
        if self.core.is_destroyed() {
            log::debug!("Ignoring id list for destroyed {}", self.core.id());
            return;
        }
        if !self.core.matches(&result.sort, &result.filter) {
            log::debug!(
                "Ignoring id list for a previous sort or filter of {}",
                self.core.id()
            );
            return;
        }
        self.core.set_state(result.state);

        let keys: Vec<S::Key> = result.ids.iter().map(|id| self.core.to_key(id)).collect();
        // Nothing was listed before the first load, so there is nothing for waiting ranges to follow.
        let initial = self.core.length().is_none();
        let old_total = self.core.length().unwrap_or(0);
        let new_total = keys.len();
        let old = &self.core.list;
        let same = |old_index: usize, new_index: usize| {
            old.get(old_index).and_then(Option::as_ref) == Some(&keys[new_index])
        };

        let shortest = old_total.min(new_total);
        let mut first_change = 0;
        while first_change < shortest && same(first_change, first_change) {
            first_change += 1;
        }
        let (mut old_end, mut new_end) = (old_total, new_total);
        while old_end > first_change && new_end > first_change && same(old_end - 1, new_end - 1) {
            old_end -= 1;
            new_end -= 1;
        }

        let mut update = QueryUpdate {
            removed: Vec::new(),
            removed_indexes: Vec::new(),
            added: Vec::new(),
            added_indexes: Vec::new(),
        };
        for index in first_change..old_end {
            if let Some(key) = old.get(index).cloned().flatten() {
                update.removed.push(key);
                update.removed_indexes.push(index);
            }
        }
        for index in first_change..new_end {
            update.added.push(keys[index].clone());
            update.added_indexes.push(index);
        }

        self.core.list = keys.into_iter().map(Some).collect();
        let status = self.core.status();
        self.core
            .set_status(Status::READY | (status & Status::OBSOLETE));
        self.core.set_length(Some(new_total));

        let changed_end = old_end.max(new_end);
        if first_change < changed_end {
            self.core.range_did_change(first_change..changed_end);
        }
        if !initial && (!update.removed.is_empty() || !update.added.is_empty()) {
            self.core.fire(QueryEvent::Updated(update));
        }
        ids_were_loaded(self);
    }
}

impl<S: Store + 'static> Sequence for RemoteQuery<S> {
    type Key = S::Key;
    type Record = S::Record;

    fn length(&self) -> Option<usize> {
        self.core.length()
    }

    fn get_object_at(&mut self, index: usize, skip_fetch: bool) -> Lookup<S::Record> {
        object_at(self, index, skip_fetch)
    }

    fn index_of_key(
        &mut self,
        key: &S::Key,
        from: usize,
        callback: Option<IndexCallback>,
    ) -> Option<usize> {
        let index = self.core.index_of(key, from);
        if let Some(callback) = callback {
            if self.core.length().is_none() {
                self.core.wait_for_index_of(key.clone(), from, callback);
                self.refresh(false, None);
            } else {
                callback(index);
            }
        }
        index
    }

    fn get_keys_for_range(
        &mut self,
        start: usize,
        end: usize,
        callback: RangeCallback<S::Key>,
    ) -> bool {
        if self.core.length().is_none() {
            self.core.wait_for_range(start, end, callback);
            self.refresh(false, None);
            return true;
        }
        self.core.send_range(start, end, callback);
        false
    }
}

impl<S: Store + 'static> Query for RemoteQuery<S> {
    type Store = S;

    fn core(&self) -> &QueryCore<S> {
        &self.core
    }

    fn core_mut(&mut self) -> &mut QueryCore<S> {
        &mut self.core
    }

    fn source(&self) -> Rc<dyn Source<Self>> {
        Rc::clone(&self.source)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::RangeObservable;
    use crate::memory::{MemoryStore, RecordingSource};
    use serde_json::json;
    use std::cell::RefCell;

    fn setup() -> (Rc<MemoryStore>, Rc<RecordingSource>, RemoteQuery<MemoryStore>) {
        let store = Rc::new(MemoryStore::new());
        let source = Rc::new(RecordingSource::new());
        let query = RemoteQuery::new(
            Rc::clone(&store),
            source.clone(),
            QueryConfig::default(),
            json!({"date": "desc"}),
            json!({"in": "inbox"}),
        );
        (store, source, query)
    }

    fn fetched(query: &RemoteQuery<MemoryStore>, state: &str, ids: &[&str]) -> FetchedQuery {
        FetchedQuery {
            sort: query.sort().clone(),
            filter: query.filter().clone(),
            state: state.to_owned(),
            ids: ids.iter().map(|id| id.to_string()).collect(),
        }
    }

    fn record_events(query: &mut RemoteQuery<MemoryStore>) -> Rc<RefCell<Vec<QueryEvent<String>>>> {
        let events = Rc::new(RefCell::new(Vec::new()));
        let log = Rc::clone(&events);
        query.register_listener(move |_, event| log.borrow_mut().push(event.clone()));
        events
    }

    #[test]
    fn test_refresh_only_fetches_when_needed() {
        let (_store, source, mut query) = setup();
        query.refresh(false, None);
        assert_eq!(source.fetch_count(), 1);
        assert!(query.is(Status::LOADING));

        let result = fetched(&query, "s1", &["a", "b"]);
        query.source_did_fetch_query(result);
        assert_eq!(query.status(), Status::READY);

        let called = Rc::new(RefCell::new(false));
        let flag = Rc::clone(&called);
        query.refresh(false, Some(Box::new(move || *flag.borrow_mut() = true)));
        assert!(*called.borrow());
        assert_eq!(source.fetch_count(), 1);

        query.refresh(true, None);
        assert_eq!(source.fetch_count(), 2);
        assert_eq!(source.take_refreshes(), vec![false, true]);
    }

    #[test]
    fn test_fetch_reports_only_the_changed_middle() {
        let (_store, _source, mut query) = setup();
        let result = fetched(&query, "s1", &["a", "b", "c", "d"]);
        query.source_did_fetch_query(result);
        let events = record_events(&mut query);

        let result = fetched(&query, "s2", &["a", "x", "y", "d"]);
        query.source_did_fetch_query(result);

        let updates: Vec<_> = events
            .borrow()
            .iter()
            .filter_map(|event| match event {
                QueryEvent::Updated(update) => Some(update.clone()),
                _ => None,
            })
            .collect();
        assert_eq!(
            updates,
            vec![QueryUpdate {
                removed: vec!["b".to_owned(), "c".to_owned()],
                removed_indexes: vec![1, 2],
                added: vec!["x".to_owned(), "y".to_owned()],
                added_indexes: vec![1, 2],
            }]
        );
        assert!(events.borrow().contains(&QueryEvent::IdsLoaded));
        assert_eq!(query.state(), "s2");
    }

    #[test]
    fn test_identical_list_fires_no_update() {
        let (_store, _source, mut query) = setup();
        let result = fetched(&query, "s1", &["a", "b"]);
        query.source_did_fetch_query(result);
        let events = record_events(&mut query);

        let result = fetched(&query, "s1", &["a", "b"]);
        query.source_did_fetch_query(result);
        assert_eq!(*events.borrow(), vec![QueryEvent::IdsLoaded]);
    }

    #[test]
    fn test_response_for_old_sort_is_ignored() {
        let (_store, _source, mut query) = setup();
        let stale = fetched(&query, "s1", &["a"]);
        query.set_sort(json!({"date": "asc"}));
        query.source_did_fetch_query(stale);
        assert_eq!(query.length(), None);
        assert!(query.is(Status::LOADING));
    }

    #[test]
    fn test_pending_range_is_answered_after_fetch() {
        let (_store, source, mut query) = setup();
        let answer = Rc::new(RefCell::new(None));
        let slot = Rc::clone(&answer);
        let pending = query.get_keys_for_range(
            1,
            10,
            Box::new(move |keys, start, end| *slot.borrow_mut() = Some((keys.to_vec(), start, end))),
        );
        assert!(pending);
        assert_eq!(source.fetch_count(), 1);
        assert!(answer.borrow().is_none());

        let result = fetched(&query, "s1", &["a", "b", "c"]);
        query.source_did_fetch_query(result);
        assert_eq!(
            *answer.borrow(),
            Some((vec![Some("b".to_owned()), Some("c".to_owned())], 1, 3))
        );
    }

    #[test]
    fn test_first_load_is_not_an_update() {
        let (_store, _source, mut query) = setup();
        let events = record_events(&mut query);
        let result = fetched(&query, "s1", &["a", "b"]);
        query.source_did_fetch_query(result);
        let events = events.borrow();
        assert!(!events.iter().any(|e| matches!(e, QueryEvent::Updated(_))));
        assert_eq!(events.last(), Some(&QueryEvent::IdsLoaded));
    }

    #[test]
    fn test_get_object_at() {
        let (store, _source, mut query) = setup();
        assert_eq!(query.get_object_at(0, false), Lookup::OutOfRange);

        store.insert("a", json!({"subject": "hello"}));
        let result = fetched(&query, "s1", &["a", "b"]);
        query.source_did_fetch_query(result);
        assert_eq!(
            query.get_object_at(0, false),
            Lookup::Loaded(json!({"subject": "hello"}))
        );
        assert_eq!(query.get_object_at(1, true), Lookup::Pending);
        assert!(store.requested().is_empty());
        assert_eq!(query.get_object_at(1, false), Lookup::Pending);
        assert_eq!(store.requested(), vec!["b".to_owned()]);
        assert_eq!(query.get_object_at(2, false), Lookup::OutOfRange);
    }

    #[test]
    fn test_index_of_key_waits_for_the_list() {
        let (_store, source, mut query) = setup();
        let answer = Rc::new(RefCell::new(None));
        let slot = Rc::clone(&answer);
        let now = query.index_of_key(
            &"c".to_owned(),
            0,
            Some(Box::new(move |index| *slot.borrow_mut() = Some(index))),
        );
        assert_eq!(now, None);
        assert_eq!(source.fetch_count(), 1);

        let result = fetched(&query, "s1", &["a", "b", "c"]);
        query.source_did_fetch_query(result);
        assert_eq!(*answer.borrow(), Some(Some(2)));
        assert_eq!(query.index_of_key(&"c".to_owned(), 3, None), None);
    }

    #[test]
    fn test_set_filter_resets_and_refetches() {
        let (_store, source, mut query) = setup();
        let result = fetched(&query, "s1", &["a", "b"]);
        query.source_did_fetch_query(result);
        let events = record_events(&mut query);

        query.set_filter(json!({"in": "archive"}));
        assert_eq!(query.length(), None);
        assert!(query.core().list().is_empty());
        assert_eq!(query.state(), "");
        assert!(events.borrow().contains(&QueryEvent::Reset));
        assert_eq!(source.fetch_count(), 1);
        assert!(query.is(Status::LOADING));
    }

    #[test]
    fn test_set_obsolete_refetches_only_when_observed() {
        let (_store, source, mut query) = setup();
        let result = fetched(&query, "s1", &["a"]);
        query.source_did_fetch_query(result);

        query.set_obsolete();
        assert!(query.is(Status::OBSOLETE));
        assert_eq!(source.fetch_count(), 0);

        query.add_range_observer(0..10, |_| {});
        query.set_obsolete();
        assert_eq!(source.fetch_count(), 1);
        assert!(!query.is(Status::OBSOLETE));
        assert_eq!(source.take_refreshes(), vec![true]);
    }

    #[test]
    fn test_destroy() {
        let (store, source, mut query) = setup();
        assert_eq!(store.queries(), vec![query.id()]);
        query.destroy();
        assert_eq!(query.status(), Status::NON_EXISTENT);
        assert!(store.queries().is_empty());

        query.refresh(true, None);
        assert_eq!(source.fetch_count(), 0);

        let (_store, _source, mut query) = setup();
        let result = fetched(&query, "s1", &["a"]);
        query.source_did_fetch_query(result);
        query.destroy();
        assert_eq!(query.status(), Status::DESTROYED);
        let late = fetched(&query, "s2", &["b"]);
        query.source_did_fetch_query(late);
        assert_eq!(query.state(), "s1");
    }
}
