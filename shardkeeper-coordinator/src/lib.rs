//! The coordinator ("SuperNode", spec §2, §4.7): cluster view, placement, and the
//! end-to-end Upload/Download/Delete/Search/List/Status flows, plus the background
//! failure detector and replication worker it owns.

pub mod coordinator;
pub mod delete;
pub mod download;
pub mod lifecycle;
pub mod reads;
pub mod replication_view;
pub mod router;
pub mod status;
pub mod upload;

pub use coordinator::Coordinator;
pub use lifecycle::RunningCoordinator;
pub use replication_view::RemoteReplicationView;
pub use router::LeaderRouter;
