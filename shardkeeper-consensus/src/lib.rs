//! Leader-elected, quorum-replicated metadata log and its materialized view.

pub mod engine;
pub mod log;
pub mod rpc;
pub mod snapshot;
pub mod view;

pub use engine::{ConsensusEngine, Role};
pub use log::SegmentLog;
pub use rpc::{
    AppendEntries, AppendEntriesResponse, ConsensusTransport, InstallSnapshot, InstallSnapshotResponse, LogEntry,
    LogIndex, RequestVote, RequestVoteResponse, Term,
};
pub use snapshot::SnapshotData;
pub use view::MaterializedView;
