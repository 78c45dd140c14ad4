use std::cell::RefCell;
use std::rc::Rc;

use remote_query::memory::{MemoryStore, RecordingSource};
use remote_query::{
    FetchRequest, IdListPacket, Query, QueryDelta, RangeObservable, RawUpdate, Sequence,
    WindowConfig, WindowState, WindowedRemoteQuery,
};
use serde_json::json;

type Windowed = WindowedRemoteQuery<MemoryStore>;

fn windowed(config: WindowConfig) -> (Rc<RecordingSource>, Windowed) {
    let store = Rc::new(MemoryStore::new());
    let source = Rc::new(RecordingSource::new());
    let query = WindowedRemoteQuery::new(store, source.clone(), config, json!("date"), json!(null));
    (source, query)
}

/// Plays the server: answers every recorded request from `server` at `state` until the query stops
/// asking, then settles the fetches.
fn serve(source: &RecordingSource, query: &mut Windowed, server: &[String], state: &str) {
    let mut settled: Vec<FetchRequest> = Vec::new();
    loop {
        let requests = source.take_requests();
        if requests.is_empty() {
            break;
        }
        for request in requests {
            for range in request.ids.iter().chain(&request.records) {
                let end = (range.start + range.count).min(server.len());
                let start = range.start.min(end);
                query.source_did_fetch_id_list(IdListPacket {
                    sort: query.sort().clone(),
                    filter: query.filter().clone(),
                    state: state.to_owned(),
                    ids: server[start..end].to_vec(),
                    position: start,
                    total: server.len(),
                });
            }
            settled.push(request);
        }
    }
    for request in settled {
        request.settle.run(query);
    }
}

fn ids(prefix: &str, count: usize) -> Vec<String> {
    (0..count).map(|i| format!("{prefix}{i}")).collect()
}

fn list(query: &Windowed) -> Vec<String> {
    query
        .core()
        .list()
        .iter()
        .map(|key| key.clone().unwrap_or_else(|| "_".to_owned()))
        .collect()
}

fn delta(query: &Windowed, old_state: &str, new_state: &str) -> QueryDelta {
    QueryDelta {
        sort: query.sort().clone(),
        filter: query.filter().clone(),
        old_state: old_state.to_owned(),
        new_state: new_state.to_owned(),
        removed: Vec::new(),
        added: Vec::new(),
        total: None,
        up_to: None,
    }
}

#[test]
fn test_load_everything_then_follow_a_delta() {
    let config = WindowConfig {
        window_size: 10,
        ..WindowConfig::default()
    };
    let (source, mut query) = windowed(config);
    let mut server = ids("m", 45);

    let answer = Rc::new(RefCell::new(None));
    let slot = Rc::clone(&answer);
    let pending = query.get_keys_for_all_objects(Box::new(move |keys, start, end| {
        *slot.borrow_mut() = Some((keys.len(), start, end));
    }));
    assert!(pending);

    serve(&source, &mut query, &server, "s1");
    assert_eq!(*answer.borrow(), Some((45, 0, 45)));
    assert!(query.all_ids_are_loaded());
    assert_eq!(list(&query), server);
    assert!(!query.window_state(4).contains(WindowState::LOADING));

    let mut change = delta(&query, "s1", "s2");
    change.removed = vec!["m3".to_owned()];
    change.added = vec![(0, "n".to_owned())];
    change.total = Some(45);
    query.source_did_fetch_update(change);

    server.remove(3);
    server.insert(0, "n".to_owned());
    assert_eq!(list(&query), server);
    assert_eq!(query.state(), "s2");
    assert!(query.all_ids_are_loaded());
}

#[test]
fn test_confirmed_prefix_undoes_predictions_the_server_left_out() {
    let (source, mut query) = windowed(WindowConfig::default());
    let server = ids("k", 10);
    query.fetch_window(0, false, None);
    serve(&source, &mut query, &server, "s1");
    assert_eq!(query.length(), Some(10));

    for key in ["k1", "k2"] {
        let update = RawUpdate {
            removed: vec![key.to_owned()],
            ..RawUpdate::default()
        };
        query.client_did_generate_update(update).unwrap();
    }
    assert_eq!(query.pending_predictions().len(), 2);
    assert_eq!(query.length(), Some(8));

    // Both predictions were made before the last fetch began, yet the server only removed k1.
    let mut change = delta(&query, "s1", "s2");
    change.removed = vec!["k1".to_owned()];
    change.total = Some(9);
    query.source_did_fetch_update(change);

    assert!(query.pending_predictions().is_empty());
    assert_eq!(query.length(), Some(9));
    let mut expected = server.clone();
    expected.remove(1);
    assert_eq!(list(&query), expected);
}

#[test]
fn test_predicted_insertion_is_confirmed() {
    let (source, mut query) = windowed(WindowConfig::default());
    let server = ids("k", 10);
    query.fetch_window(0, false, None);
    serve(&source, &mut query, &server, "s1");

    let update = RawUpdate {
        added: vec![(0, "new".to_owned())],
        ..RawUpdate::default()
    };
    query.client_did_generate_update(update).unwrap();
    assert_eq!(list(&query)[0], "new");

    let updates = Rc::new(RefCell::new(0));
    let count = Rc::clone(&updates);
    query.register_listener(move |_, event| {
        if matches!(event, remote_query::QueryEvent::Updated(_)) {
            *count.borrow_mut() += 1;
        }
    });

    let mut change = delta(&query, "s1", "s2");
    change.added = vec![(0, "new".to_owned())];
    change.total = Some(11);
    query.source_did_fetch_update(change);

    assert!(query.pending_predictions().is_empty());
    assert_eq!(*updates.borrow(), 0);
    assert_eq!(query.length(), Some(11));
    assert_eq!(list(&query)[0], "new");
}

#[test]
fn test_without_deltas_a_new_state_replaces_the_list() {
    let config = WindowConfig {
        can_get_delta_updates: false,
        ..WindowConfig::default()
    };
    let (source, mut query) = windowed(config);
    query.fetch_window(0, false, None);
    serve(&source, &mut query, &ids("a", 10), "s1");

    let changed = Rc::new(RefCell::new(Vec::new()));
    let log = Rc::clone(&changed);
    query.add_range_observer(0..5, move |range| log.borrow_mut().push(range));

    query.source_did_fetch_id_list(IdListPacket {
        sort: query.sort().clone(),
        filter: query.filter().clone(),
        state: "s2".to_owned(),
        ids: ids("b", 4),
        position: 0,
        total: 4,
    });

    assert_eq!(query.state(), "s2");
    assert_eq!(list(&query), ids("b", 4));
    assert_eq!(*changed.borrow(), vec![0..10]);
    assert!(query.all_ids_are_loaded());
}
