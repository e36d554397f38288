//! Hybrid LRU+LFU admission/eviction cache for a single storage node.

pub mod cache;
pub mod scoring;
pub mod writeback;

pub use cache::{AdmitResult, HybridCache, PinGuard};
pub use writeback::{PersistHook, WritebackQueue};
