#[path = "1-status.rs"]
mod status;
pub use status::*;

#[path = "2-indexed-update.rs"]
mod indexed_update;
pub use indexed_update::*;

#[path = "3-events.rs"]
mod events;
pub use events::{ListenerKey, ObserverKey, QueryEvent, QueryUpdate};
pub(crate) use events::{Observers, intersects};

#[path = "4-query.rs"]
mod query;
pub use query::{
    ALL_OBJECTS, AutoRefresh, FetchCallback, FetchedQuery, IndexCallback, Lookup, Query,
    QueryConfig, QueryCore, RangeCallback, RangeObservable, Sequence,
};
pub(crate) use query::{ids_were_loaded, object_at, reset_query};

#[path = "5-remote-query.rs"]
mod remote_query;
pub use remote_query::RemoteQuery;

#[path = "6-windowed-query.rs"]
mod windowed_query;
pub use windowed_query::{
    FetchRequest, FetchSettle, IdListPacket, QueryDelta, RangeRequest, WindowConfig,
    WindowedRemoteQuery,
};
