//! State Management Module
//!
//! Asset records, the content-addressed blob store behind them, and the
//! catalog that ties the two together with lineage and atomic delete.

pub mod asset;
pub mod catalog;
pub mod store;

pub use asset::{AppliedManipulation, AssetDraft, AssetOrigin, AudioAsset, WatermarkState};
pub use catalog::{Catalog, LineageEntry, StorageUsage, Tombstone};
pub use store::{content_key, BlobStore, FileStore, MemoryStore};
