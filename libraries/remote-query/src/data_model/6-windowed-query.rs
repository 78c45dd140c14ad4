//! # Windowed remote query
//! A query over a list too long to fetch in one go. The list is divided into fixed-size windows
//! whose ids (and optionally records) are fetched on demand.
//!
//! Besides window bookkeeping this is where local predictions meet server deltas:
//!
//! * [`client_did_generate_update`](WindowedRemoteQuery::client_did_generate_update) applies a
//!   prediction straight away and remembers it.
//! * [`source_did_fetch_update`](WindowedRemoteQuery::source_did_fetch_update) receives the server's
//!   delta from one state token to the next. If the delta equals a prefix of the remembered
//!   predictions, those predictions are confirmed. Otherwise they are undone and the server's
//!   version is applied in their place.
//! * [`source_did_fetch_id_list`](WindowedRemoteQuery::source_did_fetch_id_list) receives slices of
//!   ids. Slices computed against a state we have moved away from are parked until a delta brings
//!   the query to that state.

use std::ops::Range;
use std::rc::Rc;

use serde_json::Value;

use crate::data_model::{
    AutoRefresh, IndexCallback, IndexedUpdate, Lookup, Query, QueryConfig, QueryCore, QueryError,
    QueryEvent, QueryUpdate, RangeCallback, RawUpdate, Sequence, Status, WindowState,
    ids_were_loaded, intersects, object_at, reset_query,
};
use crate::{Source, Store};

#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct WindowConfig {
    /// Number of list entries per window.
    pub window_size: usize,
    /// How close to the edge of a window an access has to be to prefetch the neighbouring window.
    pub trigger_point: usize,
    /// Number of windows either side of a requested window whose ids are fetched as well.
    pub prefetch: usize,
    /// Skip id fetches for windows no range observer is near.
    pub optimise_fetching: bool,
    /// Whether the source can compute deltas between state tokens. Without them, any id packet for
    /// a different state replaces the whole list.
    pub can_get_delta_updates: bool,
    pub auto_refresh: AutoRefresh,
}

impl Default for WindowConfig {
    fn default() -> Self {
        Self {
            window_size: 30,
            trigger_point: 10,
            prefetch: 1,
            optimise_fetching: false,
            can_get_delta_updates: true,
            auto_refresh: AutoRefresh::default(),
        }
    }
}

/// A contiguous range of list indexes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct RangeRequest {
    pub start: usize,
    pub count: usize,
}

/// A slice of the id list, as computed by the server at `state`.
#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct IdListPacket {
    pub sort: Value,
    pub filter: Value,
    pub state: String,
    pub ids: Vec<String>,
    /// Index of the first id in `ids`.
    pub position: usize,
    /// Length of the whole list.
    pub total: usize,
}

/// What changed on the server between `old_state` and `new_state`.
#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct QueryDelta {
    pub sort: Value,
    pub filter: Value,
    pub old_state: String,
    pub new_state: String,
    #[serde(default)]
    pub removed: Vec<String>,
    #[serde(default)]
    pub added: Vec<(usize, String)>,
    #[serde(default)]
    pub total: Option<usize>,
    /// The last id the delta was computed up to. Entries after it are unknown.
    #[serde(default)]
    pub up_to: Option<String>,
}

/// Everything a windowed query needs from one fetch.
///
/// `records` ranges imply their ids. Once the fetch is over, successfully or not, the source hands
/// `settle` back to the query.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FetchRequest {
    pub ids: Vec<RangeRequest>,
    pub records: Vec<RangeRequest>,
    /// Ids whose position in the list is wanted.
    pub index_of: Vec<String>,
    pub refresh: bool,
    pub settle: FetchSettle,
}

/// Token identifying a fetch. Running it clears the loading flags the fetch set and answers the
/// index lookups it carried.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FetchSettle {
    fetch: u64,
}

impl FetchSettle {
    pub fn run<S: Store + 'static>(self, query: &mut WindowedRemoteQuery<S>) {
        query.source_did_settle_fetch(self.fetch);
    }
}

struct IndexOfLookup<K> {
    id: String,
    key: K,
    from: usize,
    callback: IndexCallback,
}

pub struct WindowedRemoteQuery<S: Store> {
    core: QueryCore<S>,
    source: Rc<dyn Source<WindowedRemoteQuery<S>>>,
    config: WindowConfig,
    windows: Vec<WindowState>,
    /// Predictions applied locally but not yet confirmed by the server, oldest first.
    preemptives: Vec<IndexedUpdate<S::Key>>,
    /// Id packets for a state the query has not reached yet.
    waiting_packets: Vec<IdListPacket>,
    index_of_requested: Vec<IndexOfLookup<S::Key>>,
    index_of_in_flight: Vec<(u64, IndexOfLookup<S::Key>)>,
    fetches: u64,
    explicit_id_fetch: bool,
}

impl<S: Store> std::fmt::Debug for WindowedRemoteQuery<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WindowedRemoteQuery")
            .field("core", &self.core)
            .field("config", &self.config)
            .field("windows", &self.windows)
            .field("preemptives", &self.preemptives)
            .field("waiting_packets", &self.waiting_packets.len())
            .finish_non_exhaustive()
    }
}

impl<S: Store + 'static> WindowedRemoteQuery<S> {
    pub fn new(
        store: Rc<S>,
        source: Rc<dyn Source<WindowedRemoteQuery<S>>>,
        config: WindowConfig,
        sort: Value,
        filter: Value,
    ) -> Self {
        let query_config = QueryConfig {
            auto_refresh: config.auto_refresh,
        };
        Self {
            core: QueryCore::new(store, query_config, sort, filter),
            source,
            config,
            windows: Vec::new(),
            preemptives: Vec::new(),
            waiting_packets: Vec::new(),
            index_of_requested: Vec::new(),
            index_of_in_flight: Vec::new(),
            fetches: 0,
            explicit_id_fetch: false,
        }
    }

    pub fn config(&self) -> &WindowConfig {
        &self.config
    }

    /// Number of windows, or `None` while the length is unknown.
    pub fn window_count(&self) -> Option<usize> {
        self.core
            .length()
            .map(|length| length.div_ceil(self.config.window_size.max(1)))
    }

    pub fn window_state(&self, index: usize) -> WindowState {
        self.windows.get(index).copied().unwrap_or_default()
    }

    /// True once every id in the list is known.
    pub fn all_ids_are_loaded(&self) -> bool {
        match self.window_count() {
            Some(count) => (0..count).all(|i| self.window_state(i).contains(WindowState::READY)),
            None => false,
        }
    }

    /// Local predictions the server has not confirmed yet.
    pub fn pending_predictions(&self) -> &[IndexedUpdate<S::Key>] {
        &self.preemptives
    }

    fn window_size(&self) -> usize {
        self.config.window_size.max(1)
    }

    fn set_window_state(&mut self, index: usize, state: WindowState) {
        if index >= self.windows.len() {
            self.windows.resize(index + 1, WindowState::EMPTY);
        }
        self.windows[index] = state;
    }

    /// Asks for the ids of window `index` and the `prefetch` windows either side of it (the
    /// configured amount if `None`), and for the records of window `index` if `fetch_records`.
    pub fn fetch_window(&mut self, index: usize, fetch_records: bool, prefetch: Option<usize>) {
        if self.core.is_destroyed() {
            return;
        }
        if self.is(Status::OBSOLETE) {
            self.refresh(false, None);
        }

        let prefetch = prefetch.unwrap_or(self.config.prefetch);
        let first = index.saturating_sub(prefetch);
        let mut last = index + prefetch + 1;
        if let Some(count) = self.window_count() {
            last = last.min(count);
        }

        let mut do_fetch = false;
        for i in first..last {
            let mut state = self.window_state(i);
            if state == WindowState::EMPTY {
                state = WindowState::REQUESTED;
                do_fetch = true;
            }
            if i == index && fetch_records && !state.records_requested() {
                if state.contains(WindowState::READY) && self.check_if_window_is_fetched(i) {
                    state |= WindowState::RECORDS_READY;
                } else {
                    state |= WindowState::RECORDS_REQUESTED;
                    do_fetch = true;
                }
            }
            self.set_window_state(i, state);
        }

        if do_fetch {
            self.refresh(true, None);
        }
    }

    /// Whether every record in the window is present and current in the store.
    pub fn check_if_window_is_fetched(&self, index: usize) -> bool {
        let size = self.window_size();
        let length = self.core.length().unwrap_or(0);
        let store = self.core.store();
        (index * size..((index + 1) * size).min(length)).all(|i| {
            match self.core.list.get(i).and_then(Option::as_ref) {
                Some(key) => !store
                    .status(key)
                    .intersects(Status::EMPTY | Status::OBSOLETE),
                None => false,
            }
        })
    }

    /// Re-checks the READY flag of every window overlapping `[start, end)` and forgets windows past
    /// the end of the list.
    fn recalculate_fetched_windows(&mut self, start: usize, end: usize) {
        let Some(count) = self.window_count() else {
            return;
        };
        self.windows.truncate(count);
        let size = self.window_size();
        let length = self.core.length().unwrap_or(0);
        let end = end.min(length);
        if start >= end {
            return;
        }
        for window in start / size..end.div_ceil(size) {
            let ready = (window * size..((window + 1) * size).min(length))
                .all(|i| self.core.list.get(i).is_some_and(Option::is_some));
            let state = self.window_state(window);
            let state = if ready {
                state | WindowState::READY
            } else {
                state - (WindowState::READY | WindowState::RECORDS_READY)
            };
            self.set_window_state(window, state);
        }
    }

    /// Fetches ids and records for every window a range observer is watching.
    pub fn fetch_observed_windows(&mut self) {
        let length = self.core.length().unwrap_or(0);
        let size = self.window_size();
        let ranges: Vec<Range<usize>> = self.core.observers.observed_ranges().collect();
        for range in ranges {
            let end = range.end.min(length);
            let start = range.start.min(end);
            if start == end {
                continue;
            }
            for window in start / size..=(end - 1) / size {
                self.fetch_window(window, true, None);
            }
        }
    }

    /// Called by the source as it starts a fetch. Turns the requested windows into index ranges and
    /// marks them as loading.
    pub fn source_will_fetch_query(&mut self) -> FetchRequest {
        let refresh = self.core.take_refresh_requested();
        let status = self.core.status();
        self.core
            .set_status((status | Status::LOADING) - (Status::OBSOLETE | Status::DIRTY));

        let fetch_all_ids = self.explicit_id_fetch || !self.config.optimise_fetching;
        self.explicit_id_fetch = false;

        let size = self.window_size();
        let length = self.core.length();
        let margin = size * self.config.prefetch;
        let observed: Vec<Range<usize>> = self.core.observers.observed_ranges().collect();
        let mut ids = Vec::new();
        let mut records = Vec::new();

        for window in 0..self.windows.len() {
            let mut state = self.windows[window];
            if !state.intersects(WindowState::REQUESTED | WindowState::RECORDS_REQUESTED) {
                continue;
            }
            let start = window * size;
            let count = match length {
                Some(length) => size.min(length.saturating_sub(start)),
                None => size,
            };
            if state.contains(WindowState::RECORDS_REQUESTED) {
                state -= WindowState::REQUESTED | WindowState::RECORDS_REQUESTED;
                state |= WindowState::RECORDS_LOADING;
                if !state.contains(WindowState::READY) {
                    state |= WindowState::LOADING;
                }
                push_range(&mut records, start, count);
            } else if fetch_all_ids
                || observed
                    .iter()
                    .any(|range| intersects(range, &(start.saturating_sub(margin)..start + size + margin)))
            {
                state -= WindowState::REQUESTED;
                state |= WindowState::LOADING;
                push_range(&mut ids, start, count);
            } else {
                log::trace!("Not fetching unobserved window {window} of {}", self.core.id());
                state -= WindowState::REQUESTED;
            }
            self.windows[window] = state;
        }

        self.fetches += 1;
        let fetch = self.fetches;
        let mut index_of = Vec::new();
        for lookup in std::mem::take(&mut self.index_of_requested) {
            index_of.push(lookup.id.clone());
            self.index_of_in_flight.push((fetch, lookup));
        }

        FetchRequest {
            ids,
            records,
            index_of,
            refresh,
            settle: FetchSettle { fetch },
        }
    }

    pub(crate) fn source_did_settle_fetch(&mut self, fetch: u64) {
        if self.core.is_destroyed() {
            log::debug!("Ignoring settled fetch for destroyed {}", self.core.id());
            return;
        }
        for state in &mut self.windows {
            if state.contains(WindowState::RECORDS_LOADING) {
                if state.contains(WindowState::READY) {
                    *state |= WindowState::RECORDS_READY;
                }
                *state -= WindowState::RECORDS_LOADING;
            }
            *state -= WindowState::LOADING;
        }
        let status = self.core.status();
        self.core.set_status(status - Status::LOADING);

        let (settled, pending): (Vec<_>, Vec<_>) = std::mem::take(&mut self.index_of_in_flight)
            .into_iter()
            .partition(|(carried_by, _)| *carried_by <= fetch);
        self.index_of_in_flight = pending;
        for (_, lookup) in settled {
            (lookup.callback)(self.core.index_of(&lookup.key, lookup.from));
        }
    }

    /// Writes a slice of ids into the list.
    pub fn source_did_fetch_id_list(&mut self, packet: IdListPacket) {
        if self.core.is_destroyed() {
            log::debug!("Ignoring id list for destroyed {}", self.core.id());
            return;
        }
        if !self.core.matches(&packet.sort, &packet.filter) {
            log::debug!(
                "Ignoring id list for a previous sort or filter of {}",
                self.core.id()
            );
            return;
        }

        let mut replace_all = false;
        if packet.state != self.core.state() {
            if !self.core.state().is_empty() && self.config.can_get_delta_updates {
                log::debug!(
                    "Id list for state {} while {} is at {}; fetching the delta first",
                    packet.state,
                    self.core.id(),
                    self.core.state()
                );
                self.waiting_packets.push(packet);
                let status = self.core.status();
                self.core.set_status(status | Status::OBSOLETE);
                self.refresh(false, None);
                return;
            }
            if !self.core.state().is_empty() {
                log::info!(
                    "{} moved from state {} to {}; replacing the whole list",
                    self.core.id(),
                    self.core.state(),
                    packet.state
                );
            }
            self.core.list.clear();
            self.windows.clear();
            self.preemptives.clear();
            self.core.set_state(packet.state.clone());
            replace_all = true;
        }

        let mut keys: Vec<S::Key> = packet.ids.iter().map(|id| self.core.to_key(id)).collect();
        let mut position = packet.position;
        let mut total = packet.total;

        if !self.preemptives.is_empty() {
            let all = compose_all(&self.preemptives);
            if self.config.can_get_delta_updates {
                for &index in all.removed_indexes.iter().rev() {
                    if index < position {
                        position -= 1;
                    } else if index - position < keys.len() {
                        keys.remove(index - position);
                    }
                }
                for (&index, key) in all.added_indexes.iter().zip(&all.added_keys) {
                    if index <= position {
                        position += 1;
                    } else if index - position < keys.len() {
                        keys.insert(index - position, key.clone());
                    }
                }
                total = (total + all.added_keys.len()).saturating_sub(all.removed_keys.len());
            } else {
                log::debug!(
                    "Undoing {} unverifiable predictions on {}",
                    self.preemptives.len(),
                    self.core.id()
                );
                self.preemptives.clear();
                self.apply_update(all.invert());
                if self.core.is_destroyed() || self.core.state() != packet.state {
                    return;
                }
            }
        }

        keys.truncate(total.saturating_sub(position));
        let end = position + keys.len();
        if self.core.list.len() < end {
            self.core.list.resize(end, None);
        }
        for (offset, key) in keys.into_iter().enumerate() {
            self.core.list[position + offset] = Some(key);
        }
        self.core.list.truncate(total);

        let old_length = self.core.length().unwrap_or(0);
        self.core.set_length(Some(total));
        self.recalculate_fetched_windows(position, end);

        let status = self.core.status();
        let mut new_status =
            Status::READY | (status & (Status::OBSOLETE | Status::LOADING | Status::DIRTY));
        if replace_all {
            new_status -= Status::DIRTY;
        }
        self.core.set_status(new_status);

        if replace_all {
            self.core.range_did_change(0..old_length.max(total));
        } else {
            self.core.range_did_change(position..end);
        }
        ids_were_loaded(self);
    }

    /// Reconciles the server's delta with the list and any outstanding predictions.
    pub fn source_did_fetch_update(&mut self, delta: QueryDelta) {
        if self.core.is_destroyed() {
            log::debug!("Ignoring delta for destroyed {}", self.core.id());
            return;
        }
        let status = self.core.status();
        self.core.set_status(status - Status::LOADING);

        if !self.core.matches(&delta.sort, &delta.filter) {
            log::debug!(
                "Ignoring delta for a previous sort or filter of {}",
                self.core.id()
            );
            return;
        }

        if delta.new_state == self.core.state() {
            if !self.preemptives.is_empty() && !status.contains(Status::DIRTY) {
                log::debug!(
                    "Server state of {} unchanged; dropping {} predictions",
                    self.core.id(),
                    self.preemptives.len()
                );
                self.preemptives.clear();
            }
            return;
        }

        if delta.old_state != self.core.state() {
            log::debug!(
                "Delta from {} does not apply to {} at {}",
                delta.old_state,
                self.core.id(),
                self.core.state()
            );
            let status = self.core.status();
            self.core.set_status(status | Status::OBSOLETE);
            return;
        }

        let raw = RawUpdate {
            removed: delta.removed.iter().map(|id| self.core.to_key(id)).collect(),
            added: delta
                .added
                .iter()
                .map(|(index, id)| (*index, self.core.to_key(id)))
                .collect(),
            total: delta.total,
            up_to: delta.up_to.as_deref().map(|id| self.core.to_key(id)),
        };
        self.core.set_state(delta.new_state);
        let length = self.core.length().unwrap_or(0);

        if self.preemptives.is_empty() {
            let update = raw.normalise(&self.core.list, length);
            self.apply_update(update);
            return;
        }

        let mut composed: Vec<IndexedUpdate<S::Key>> = Vec::with_capacity(self.preemptives.len());
        for preemptive in &self.preemptives {
            let next = match composed.last() {
                Some(previous) => previous.compose(preemptive),
                None => preemptive.clone(),
            };
            composed.push(next);
        }
        let all = composed[composed.len() - 1].clone();
        let update = raw.normalise_through(&self.core.list, length, &all);

        match composed.iter().position(|prefix| prefix.same_changes(&update)) {
            Some(confirmed) => {
                log::debug!(
                    "Server confirmed {} predictions on {}",
                    confirmed + 1,
                    self.core.id()
                );
                self.preemptives.drain(..=confirmed);
                if !self.preemptives.is_empty() && !status.contains(Status::DIRTY) {
                    let rest = compose_all(&self.preemptives);
                    self.preemptives.clear();
                    self.apply_update(rest.invert());
                } else {
                    self.apply_waiting_packets();
                }
            }
            None => {
                log::info!(
                    "Server disagreed with {} predictions on {}; replacing them",
                    self.preemptives.len(),
                    self.core.id()
                );
                self.preemptives.clear();
                self.apply_update(all.invert().compose(&update));
            }
        }
    }

    /// Performs the list surgery for `update`, then replays any id packets now applicable.
    pub fn apply_update(&mut self, update: IndexedUpdate<S::Key>) {
        let old_length = self.core.length().unwrap_or(0);
        let first_change = match update.apply_to(&mut self.core.list) {
            Ok(first_change) => first_change.min(old_length),
            Err(err) => {
                log::warn!("{err} for {}; starting over", self.core.id());
                reset_query(self, true);
                return;
            }
        };
        let length = update.total;
        self.core.list.truncate(length);
        self.core.set_length(Some(length));
        self.recalculate_fetched_windows(first_change, length);

        let changed_end = old_length.max(length);
        if first_change < changed_end {
            self.core.range_did_change(first_change..changed_end);
        }
        self.core.fire(QueryEvent::Updated(QueryUpdate {
            removed: update.removed_keys,
            removed_indexes: update.removed_indexes,
            added: update.added_keys,
            added_indexes: update.added_indexes,
        }));
        self.apply_waiting_packets();
    }

    /// Applies parked id packets that are for the current state. The rest are dropped and the
    /// observed windows fetched again.
    pub fn apply_waiting_packets(&mut self) {
        if self.waiting_packets.is_empty() {
            return;
        }
        let mut dropped = false;
        for packet in std::mem::take(&mut self.waiting_packets) {
            if packet.state == self.core.state() {
                self.source_did_fetch_id_list(packet);
            } else {
                dropped = true;
            }
        }
        if dropped {
            self.fetch_observed_windows();
        }
    }

    /// Applies a local prediction immediately and asks the server to confirm it.
    ///
    /// Removed keys that are not loaded are ignored (the list is truncated at the first hole
    /// instead). Added indexes must lie within the updated list.
    pub fn client_did_generate_update(&mut self, update: RawUpdate<S::Key>) -> Result<(), QueryError> {
        if self.core.is_destroyed() {
            return Err(QueryError::Destroyed);
        }
        let Some(length) = self.core.length() else {
            return Err(QueryError::NotReady);
        };
        let update = update.normalise(&self.core.list, length);
        if let Some(&index) = update.added_indexes.iter().find(|&&index| index >= update.total) {
            return Err(QueryError::AddedIndexOutOfRange {
                index,
                total: update.total,
            });
        }
        if update.is_noop() {
            log::debug!("Prediction for {} changes nothing", self.core.id());
            return Ok(());
        }

        self.apply_update(update.clone());
        self.preemptives.push(update);
        let status = self.core.status();
        self.core.set_status(status | Status::DIRTY);
        self.refresh(true, None);
        Ok(())
    }
}

/// Appends a range, merging it into the previous one if they touch.
fn push_range(ranges: &mut Vec<RangeRequest>, start: usize, count: usize) {
    if count == 0 {
        return;
    }
    if let Some(last) = ranges.last_mut() {
        if last.start + last.count == start {
            last.count += count;
            return;
        }
    }
    ranges.push(RangeRequest { start, count });
}

fn compose_all<K: Clone + PartialEq>(updates: &[IndexedUpdate<K>]) -> IndexedUpdate<K> {
    let mut iter = updates.iter();
    let Some(first) = iter.next() else {
        return IndexedUpdate::unchanged(0);
    };
    iter.fold(first.clone(), |all, next| all.compose(next))
}

impl<S: Store + 'static> Sequence for WindowedRemoteQuery<S> {
    type Key = S::Key;
    type Record = S::Record;

    fn length(&self) -> Option<usize> {
        self.core.length()
    }

    fn get_object_at(&mut self, index: usize, skip_fetch: bool) -> Lookup<S::Record> {
        object_at(self, index, skip_fetch)
    }

    /// A miss while ids are still missing asks the server for the key's position.
    fn index_of_key(
        &mut self,
        key: &S::Key,
        from: usize,
        callback: Option<IndexCallback>,
    ) -> Option<usize> {
        let index = self.core.index_of(key, from);
        let Some(callback) = callback else {
            return index;
        };
        if index.is_some() || self.all_ids_are_loaded() {
            callback(index);
            return index;
        }
        match self.core.store().id_for_key(key) {
            Some(id) => {
                self.index_of_requested.push(IndexOfLookup {
                    id,
                    key: key.clone(),
                    from,
                    callback,
                });
                self.fetch(None);
            }
            None => callback(None),
        }
        index
    }

    fn get_keys_for_range(
        &mut self,
        start: usize,
        end: usize,
        callback: RangeCallback<S::Key>,
    ) -> bool {
        let size = self.window_size();
        let Some(length) = self.core.length() else {
            // Where `start` falls is unknown until the length is, so begin at the top.
            self.core.wait_for_range(start, end, callback);
            self.explicit_id_fetch = true;
            self.fetch_window(0, false, Some(0));
            return true;
        };

        let end = end.min(length);
        let start = start.min(end);
        let mut complete = true;
        if start < end {
            for window in start / size..=(end - 1) / size {
                if !self.window_state(window).contains(WindowState::READY) {
                    complete = false;
                    self.explicit_id_fetch = true;
                    self.fetch_window(window, false, Some(0));
                }
            }
        }

        if complete {
            self.core.send_range(start, end, callback);
            false
        } else {
            self.core.wait_for_range(start, end, callback);
            true
        }
    }
}

impl<S: Store + 'static> Query for WindowedRemoteQuery<S> {
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

    /// Fetches the records of the window containing `index`, and the ids of the neighbouring
    /// window if `index` is close to its edge.
    fn fetch_data_for_object_at(&mut self, index: usize) -> bool {
        let size = self.window_size();
        let window = index / size;
        let offset = index % size;
        self.fetch_window(window, true, None);
        if offset < self.config.trigger_point && window > 0 {
            self.fetch_window(window - 1, false, None);
        }
        if offset + self.config.trigger_point >= size {
            self.fetch_window(window + 1, false, None);
        }
        true
    }

    fn will_reset(&mut self) {
        self.windows.clear();
        self.preemptives.clear();
        self.waiting_packets.clear();
        self.explicit_id_fetch = false;
    }

    fn will_destroy(&mut self) {
        self.preemptives.clear();
        self.waiting_packets.clear();
        self.index_of_requested.clear();
        self.index_of_in_flight.clear();
    }
}
