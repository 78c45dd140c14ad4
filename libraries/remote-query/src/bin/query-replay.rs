use std::path::PathBuf;
use std::rc::Rc;

use anyhow::{Context, Result};
use remote_query::memory::{MemoryStore, RecordingSource};
use remote_query::{
    FetchRequest, IdListPacket, Query, QueryDelta, RawUpdate, Sequence, WindowConfig,
    WindowedRemoteQuery,
};
use serde::Deserialize;
use serde_json::Value;

#[derive(Deserialize)]
struct Script {
    #[serde(default)]
    config: WindowConfig,
    #[serde(default)]
    sort: Value,
    #[serde(default)]
    filter: Value,
    steps: Vec<Step>,
}

#[derive(Deserialize)]
#[serde(rename_all = "snake_case")]
enum Step {
    /// A slice of ids from the server. Sort and filter default to the query's own.
    IdList {
        state: String,
        ids: Vec<String>,
        #[serde(default)]
        position: usize,
        total: usize,
    },
    /// A server delta between two state tokens.
    Delta {
        old_state: String,
        new_state: String,
        #[serde(default)]
        removed: Vec<String>,
        #[serde(default)]
        added: Vec<(usize, String)>,
        #[serde(default)]
        total: Option<usize>,
        #[serde(default)]
        up_to: Option<String>,
    },
    /// A local prediction.
    Predict(RawUpdate<String>),
    FetchWindow {
        index: usize,
        #[serde(default)]
        records: bool,
    },
    GetObjectAt(usize),
    /// Settles every fetch the query has asked for so far.
    Settle,
    SetSort(Value),
    SetFilter(Value),
}

type Replayed = WindowedRemoteQuery<MemoryStore>;

fn play(query: &mut Replayed, step: Step, pending: &mut Vec<FetchRequest>) {
    match step {
        Step::IdList {
            state,
            ids,
            position,
            total,
        } => {
            let packet = IdListPacket {
                sort: query.sort().clone(),
                filter: query.filter().clone(),
                state,
                ids,
                position,
                total,
            };
            query.source_did_fetch_id_list(packet);
        }
        Step::Delta {
            old_state,
            new_state,
            removed,
            added,
            total,
            up_to,
        } => {
            let delta = QueryDelta {
                sort: query.sort().clone(),
                filter: query.filter().clone(),
                old_state,
                new_state,
                removed,
                added,
                total,
                up_to,
            };
            query.source_did_fetch_update(delta);
        }
        Step::Predict(update) => {
            if let Err(e) = query.client_did_generate_update(update) {
                println!("  prediction rejected: {e}");
            }
        }
        Step::FetchWindow { index, records } => query.fetch_window(index, records, None),
        Step::GetObjectAt(index) => {
            let lookup = query.get_object_at(index, false);
            println!("  object at {index}: {lookup:?}");
        }
        Step::Settle => {
            for request in pending.drain(..) {
                request.settle.run(query);
            }
        }
        Step::SetSort(sort) => query.set_sort(sort),
        Step::SetFilter(filter) => query.set_filter(filter),
    }
}

fn print_query(query: &Replayed) {
    let list: Vec<&str> = query
        .core()
        .list()
        .iter()
        .map(|key| key.as_deref().unwrap_or("_"))
        .collect();
    println!("  status:  {:?}", query.status());
    println!("  state:   {:?}", query.state());
    println!("  length:  {:?}", query.length());
    println!("  list:    [{}]", list.join(", "));
    if let Some(count) = query.window_count() {
        let windows: Vec<String> = (0..count)
            .map(|i| format!("{:?}", query.window_state(i)))
            .collect();
        println!("  windows: {}", windows.join(" "));
    }
    let predictions = query.pending_predictions().len();
    if predictions > 0 {
        println!("  pending predictions: {predictions}");
    }
}

fn main() -> Result<()> {
    env_logger::init();

    let args: Vec<String> = std::env::args().collect();
    if args.len() != 2 {
        eprintln!("Usage: {} <path-to-script.json>", args[0]);
        std::process::exit(1);
    }
    let path = PathBuf::from(&args[1]);
    let text = std::fs::read_to_string(&path)
        .with_context(|| format!("Failed to read '{}'", path.display()))?;
    let script: Script = serde_json::from_str(&text)
        .with_context(|| format!("Failed to parse '{}'", path.display()))?;

    let store = Rc::new(MemoryStore::new());
    let source = Rc::new(RecordingSource::new());
    let mut query = WindowedRemoteQuery::new(
        store,
        source.clone(),
        script.config,
        script.sort,
        script.filter,
    );
    let mut pending = Vec::new();

    println!("Replaying {} steps from {}", script.steps.len(), path.display());
    for (number, step) in script.steps.into_iter().enumerate() {
        println!();
        println!("Step {}:", number + 1);
        play(&mut query, step, &mut pending);
        for request in source.take_requests() {
            println!(
                "  fetch requested: ids {:?} records {:?} index_of {:?} refresh {}",
                request.ids, request.records, request.index_of, request.refresh
            );
            pending.push(request);
        }
        print_query(&query);
    }

    Ok(())
}
