//! Asset catalog
//!
//! The catalog owns every asset record and the blob store holding their
//! bytes. All mutations take the write lock, so record and delete are
//! serialized; readers take the read lock and never see a half-applied
//! delete. With a manifest path the catalog persists to `catalog.json`,
//! rewritten through a temp file and rename on every mutation.

use std::collections::{HashMap, HashSet};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use chrono::{DateTime, Utc};
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::asset::{AssetDraft, AudioAsset};
use super::store::{BlobStore, FileStore, MemoryStore};
use crate::error::{Result, WmError};

pub const MANIFEST_FILE: &str = "catalog.json";
pub const BLOB_DIR: &str = "blobs";
const MANIFEST_VERSION: u32 = 1;

/// What remains of a deleted asset
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tombstone {
    pub id: Uuid,
    pub filename: String,
    pub source_asset_id: Option<Uuid>,
    pub deleted_at: DateTime<Utc>,
}

/// One step of a lineage chain
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum LineageEntry {
    Live(AudioAsset),
    Deleted(Tombstone),
}

impl LineageEntry {
    pub fn id(&self) -> Uuid {
        match self {
            LineageEntry::Live(asset) => asset.id,
            LineageEntry::Deleted(tombstone) => tombstone.id,
        }
    }
}

/// Storage usage statistics
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StorageUsage {
    pub asset_count: usize,
    pub blob_count: usize,
    pub total_size_bytes: u64,
    pub total_size_mb: f64,
}

/// On-disk form of the catalog
#[derive(Debug, Default, Serialize, Deserialize)]
struct Manifest {
    version: u32,
    next_sequence: u64,
    assets: Vec<AudioAsset>,
    #[serde(default)]
    tombstones: Vec<Tombstone>,
}

#[derive(Debug, Default)]
struct CatalogState {
    next_sequence: u64,
    assets: HashMap<Uuid, AudioAsset>,
    tombstones: HashMap<Uuid, Tombstone>,
}

impl CatalogState {
    fn from_manifest(manifest: Manifest) -> Self {
        Self {
            next_sequence: manifest.next_sequence,
            assets: manifest.assets.into_iter().map(|a| (a.id, a)).collect(),
            tombstones: manifest.tombstones.into_iter().map(|t| (t.id, t)).collect(),
        }
    }

    fn to_manifest(&self) -> Manifest {
        let mut assets: Vec<AudioAsset> = self.assets.values().cloned().collect();
        assets.sort_by_key(|a| a.sequence);
        let mut tombstones: Vec<Tombstone> = self.tombstones.values().cloned().collect();
        tombstones.sort_by_key(|t| t.deleted_at);
        Manifest {
            version: MANIFEST_VERSION,
            next_sequence: self.next_sequence,
            assets,
            tombstones,
        }
    }

    fn knows(&self, id: &Uuid) -> bool {
        self.assets.contains_key(id) || self.tombstones.contains_key(id)
    }

    fn parent_of(&self, id: &Uuid) -> Option<Uuid> {
        self.assets
            .get(id)
            .and_then(|a| a.source_asset_id)
            .or_else(|| self.tombstones.get(id).and_then(|t| t.source_asset_id))
    }

    fn references(&self, storage_key: &str) -> usize {
        self.assets
            .values()
            .filter(|a| a.storage_key == storage_key)
            .count()
    }
}

/// Persistent record of every artifact
pub struct Catalog {
    manifest_path: Option<PathBuf>,
    store: Box<dyn BlobStore>,
    state: RwLock<CatalogState>,
}

impl Catalog {
    /// Open the catalog under `root`, creating it if needed
    ///
    /// Blobs live in `root/blobs`, the manifest in `root/catalog.json`.
    pub fn open(root: &Path) -> Result<Self> {
        fs::create_dir_all(root)?;
        let store = FileStore::open(root.join(BLOB_DIR))?;
        Self::with_store(Box::new(store), Some(root.join(MANIFEST_FILE)))
    }

    /// A catalog that lives only in memory
    pub fn in_memory() -> Self {
        Self {
            manifest_path: None,
            store: Box::new(MemoryStore::new()),
            state: RwLock::new(CatalogState::default()),
        }
    }

    /// Build a catalog over any store, loading `manifest_path` if it exists
    pub fn with_store(store: Box<dyn BlobStore>, manifest_path: Option<PathBuf>) -> Result<Self> {
        let state = match &manifest_path {
            Some(path) if path.exists() => {
                let content = fs::read_to_string(path)?;
                let manifest: Manifest = serde_json::from_str(&content)?;
                if manifest.version > MANIFEST_VERSION {
                    return Err(WmError::internal(format!(
                        "catalog version {} is newer than supported version {}",
                        manifest.version, MANIFEST_VERSION
                    )));
                }
                let state = CatalogState::from_manifest(manifest);
                for asset in state.assets.values() {
                    if !store.contains(&asset.storage_key)? {
                        warn!(
                            "Asset {} references missing blob {}",
                            asset.id, asset.storage_key
                        );
                    }
                }
                info!(
                    "Loaded catalog with {} assets from {}",
                    state.assets.len(),
                    path.display()
                );
                state
            }
            _ => CatalogState::default(),
        };

        Ok(Self {
            manifest_path,
            store,
            state: RwLock::new(state),
        })
    }

    fn read_state(&self) -> Result<RwLockReadGuard<'_, CatalogState>> {
        self.state
            .read()
            .map_err(|_| WmError::internal("catalog lock poisoned"))
    }

    fn write_state(&self) -> Result<RwLockWriteGuard<'_, CatalogState>> {
        self.state
            .write()
            .map_err(|_| WmError::internal("catalog lock poisoned"))
    }

    /// Write the manifest through a temp file and rename
    fn persist(&self, state: &CatalogState) -> Result<()> {
        let path = match &self.manifest_path {
            Some(path) => path,
            None => return Ok(()),
        };
        let content = serde_json::to_string_pretty(&state.to_manifest())?;
        let temp = path.with_extension("json.tmp");
        {
            let mut file = fs::File::create(&temp)?;
            file.write_all(content.as_bytes())?;
            file.sync_all()?;
        }
        fs::rename(&temp, path)?;
        Ok(())
    }

    fn validate(&self, state: &CatalogState, asset: &AudioAsset) -> Result<()> {
        if state.knows(&asset.id) {
            return Err(WmError::internal(format!(
                "asset id {} has already been used",
                asset.id
            )));
        }
        if let Some(source) = asset.source_asset_id {
            if source == asset.id {
                return Err(WmError::internal(format!(
                    "asset {} cannot derive from itself",
                    asset.id
                )));
            }
            if !state.knows(&source) {
                return Err(WmError::NotFound {
                    id: source.to_string(),
                });
            }
            // Walk up the chain; reaching the new id would close a cycle
            let mut seen = HashSet::new();
            let mut cursor = Some(source);
            while let Some(id) = cursor {
                if id == asset.id || !seen.insert(id) {
                    return Err(WmError::internal(format!(
                        "recording {} would create a lineage cycle",
                        asset.id
                    )));
                }
                cursor = state.parent_of(&id);
            }
        }
        if !self.store.contains(&asset.storage_key)? {
            return Err(WmError::internal(format!(
                "storage key {} has no bytes in the store",
                asset.storage_key
            )));
        }
        Ok(())
    }

    fn record_locked(&self, state: &mut CatalogState, mut asset: AudioAsset) -> Result<AudioAsset> {
        self.validate(state, &asset)?;

        asset.sequence = state.next_sequence;
        state.next_sequence += 1;
        state.assets.insert(asset.id, asset.clone());

        if let Err(err) = self.persist(state) {
            state.assets.remove(&asset.id);
            state.next_sequence -= 1;
            return Err(err);
        }
        debug!("Recorded asset {} ({})", asset.id, asset.filename);
        Ok(asset)
    }

    /// Record an asset whose bytes are already in the store
    ///
    /// # Errors
    /// * `NotFound` - If the source asset was never recorded
    /// * `InternalProcessingFailure` - Reused id, lineage cycle, missing bytes
    pub fn record(&self, asset: AudioAsset) -> Result<AudioAsset> {
        let mut state = self.write_state()?;
        self.record_locked(&mut state, asset)
    }

    /// Store `bytes` and record the asset described by `draft`
    ///
    /// If recording fails the bytes are removed again, unless another asset
    /// already referenced identical content.
    pub fn commit(&self, bytes: &[u8], draft: AssetDraft) -> Result<AudioAsset> {
        let mut state = self.write_state()?;
        let key = self.store.write(bytes)?;
        let asset = draft.into_asset(key.clone(), bytes.len() as u64);

        match self.record_locked(&mut state, asset) {
            Ok(asset) => Ok(asset),
            Err(err) => {
                if state.references(&key) == 0 {
                    if let Err(cleanup) = self.store.remove(&key) {
                        warn!("Failed to remove uncommitted blob {}: {}", key, cleanup);
                    }
                }
                Err(err)
            }
        }
    }

    /// # Errors
    /// * `NotFound` - If no live asset has this id
    pub fn get(&self, id: Uuid) -> Result<AudioAsset> {
        self.read_state()?
            .assets
            .get(&id)
            .cloned()
            .ok_or_else(|| WmError::NotFound { id: id.to_string() })
    }

    /// Earliest live asset whose bytes hash to `storage_key`
    pub fn find_by_key(&self, storage_key: &str) -> Result<Option<AudioAsset>> {
        Ok(self
            .read_state()?
            .assets
            .values()
            .filter(|a| a.storage_key == storage_key)
            .min_by_key(|a| a.sequence)
            .cloned())
    }

    /// All live assets, oldest first
    pub fn list(&self) -> Result<Vec<AudioAsset>> {
        let mut assets: Vec<AudioAsset> = self.read_state()?.assets.values().cloned().collect();
        assets.sort_by(|a, b| {
            a.created_at
                .cmp(&b.created_at)
                .then(a.sequence.cmp(&b.sequence))
        });
        Ok(assets)
    }

    pub fn len(&self) -> Result<usize> {
        Ok(self.read_state()?.assets.len())
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    /// Record and bytes for one asset, read under a single lock
    pub fn read_asset(&self, id: Uuid) -> Result<(AudioAsset, Vec<u8>)> {
        let state = self.read_state()?;
        let asset = state
            .assets
            .get(&id)
            .cloned()
            .ok_or_else(|| WmError::NotFound { id: id.to_string() })?;
        let bytes = self.store.read(&asset.storage_key)?;
        Ok((asset, bytes))
    }

    pub fn read_bytes(&self, id: Uuid) -> Result<Vec<u8>> {
        Ok(self.read_asset(id)?.1)
    }

    /// Remove an asset and, if nothing else shares them, its bytes
    ///
    /// The manifest is written first. If the bytes then cannot be removed,
    /// the entry is restored and the manifest written again, so the
    /// catalog and store never disagree.
    ///
    /// # Errors
    /// * `NotFound` - If no live asset has this id
    pub fn delete(&self, id: Uuid) -> Result<AudioAsset> {
        let mut state = self.write_state()?;
        let asset = state
            .assets
            .remove(&id)
            .ok_or_else(|| WmError::NotFound { id: id.to_string() })?;
        state.tombstones.insert(
            id,
            Tombstone {
                id,
                filename: asset.filename.clone(),
                source_asset_id: asset.source_asset_id,
                deleted_at: Utc::now(),
            },
        );

        let restore = |state: &mut CatalogState| {
            state.tombstones.remove(&id);
            state.assets.insert(id, asset.clone());
        };

        if let Err(err) = self.persist(&state) {
            restore(&mut *state);
            return Err(err);
        }

        if state.references(&asset.storage_key) == 0 {
            if let Err(err) = self.store.remove(&asset.storage_key) {
                restore(&mut *state);
                if let Err(persist_err) = self.persist(&state) {
                    warn!("Failed to restore catalog after delete error: {}", persist_err);
                }
                return Err(err);
            }
        }

        info!("Deleted asset {} ({})", id, asset.filename);
        Ok(asset)
    }

    /// The chain from `id` up to its root
    ///
    /// Ends with a [`LineageEntry::Deleted`] marker when an ancestor has
    /// been deleted.
    pub fn lineage(&self, id: Uuid) -> Result<Vec<LineageEntry>> {
        let state = self.read_state()?;
        let mut chain = Vec::new();
        let mut seen = HashSet::new();
        let mut cursor = Some(id);

        while let Some(current) = cursor {
            if !seen.insert(current) {
                return Err(WmError::internal(format!(
                    "lineage of {} contains a cycle",
                    id
                )));
            }
            if let Some(asset) = state.assets.get(&current) {
                cursor = asset.source_asset_id;
                chain.push(LineageEntry::Live(asset.clone()));
            } else if let Some(tombstone) = state.tombstones.get(&current).filter(|_| !chain.is_empty()) {
                chain.push(LineageEntry::Deleted(tombstone.clone()));
                break;
            } else if chain.is_empty() {
                return Err(WmError::NotFound { id: id.to_string() });
            } else {
                return Err(WmError::internal(format!(
                    "asset {} has an unknown ancestor {}",
                    id, current
                )));
            }
        }
        Ok(chain)
    }

    /// Current storage usage
    pub fn usage(&self) -> Result<StorageUsage> {
        let state = self.read_state()?;
        let keys = self.store.keys()?;
        let mut total_size_bytes = 0u64;
        for key in &keys {
            total_size_bytes += self.store.size_of(key)?;
        }
        Ok(StorageUsage {
            asset_count: state.assets.len(),
            blob_count: keys.len(),
            total_size_bytes,
            total_size_mb: total_size_bytes as f64 / (1024.0 * 1024.0),
        })
    }

    /// Remove blobs no asset references
    ///
    /// Returns the total bytes freed.
    pub fn sweep_orphans(&self) -> Result<u64> {
        let state = self.write_state()?;
        let referenced: HashSet<&str> = state
            .assets
            .values()
            .map(|a| a.storage_key.as_str())
            .collect();

        let mut bytes_freed = 0u64;
        for key in self.store.keys()? {
            if referenced.contains(key.as_str()) {
                continue;
            }
            bytes_freed += self.store.size_of(&key)?;
            self.store.remove(&key)?;
            debug!("Swept orphaned blob {}", key);
        }
        if bytes_freed > 0 {
            info!("Swept {} bytes of orphaned blobs", bytes_freed);
        }
        Ok(bytes_freed)
    }

    pub fn store(&self) -> &dyn BlobStore {
        self.store.as_ref()
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::signal::generate_test_tone;
    use crate::state::asset::{AssetOrigin, WatermarkState};
    use crate::watermark::WatermarkMethod;
    use tempfile::TempDir;

    fn upload(catalog: &Catalog, name: &str, bytes: &[u8]) -> AudioAsset {
        let tone = generate_test_tone(440.0, 1.0, 16_000, 0.5);
        catalog.commit(bytes, AssetDraft::upload(name, &tone)).unwrap()
    }

    fn derive(catalog: &Catalog, source: &AudioAsset, bytes: &[u8]) -> AudioAsset {
        let tone = generate_test_tone(440.0, 1.0, 16_000, 0.5);
        let draft = AssetDraft::embedded("wm.wav", &tone, source, WatermarkMethod::Neural, None);
        catalog.commit(bytes, draft).unwrap()
    }

    #[test]
    fn test_commit_and_get() {
        let catalog = Catalog::in_memory();
        let asset = upload(&catalog, "a.wav", b"aaa");
        assert_eq!(catalog.get(asset.id).unwrap(), asset);
        assert_eq!(catalog.read_bytes(asset.id).unwrap(), b"aaa");
        assert_eq!(asset.size_bytes, 3);
        assert_eq!(asset.origin, AssetOrigin::Upload);
    }

    #[test]
    fn test_get_unknown_is_not_found() {
        let catalog = Catalog::in_memory();
        assert!(matches!(
            catalog.get(Uuid::new_v4()),
            Err(WmError::NotFound { .. })
        ));
    }

    #[test]
    fn test_list_is_ordered() {
        let catalog = Catalog::in_memory();
        let a = upload(&catalog, "a.wav", b"1");
        let b = upload(&catalog, "b.wav", b"2");
        let c = upload(&catalog, "c.wav", b"3");
        let ids: Vec<Uuid> = catalog.list().unwrap().iter().map(|x| x.id).collect();
        assert_eq!(ids, vec![a.id, b.id, c.id]);
    }

    #[test]
    fn test_unknown_source_rejected_and_bytes_compensated() {
        let catalog = Catalog::in_memory();
        let tone = generate_test_tone(440.0, 1.0, 16_000, 0.5);
        let mut draft = AssetDraft::upload("x.wav", &tone);
        draft.source_asset_id = Some(Uuid::new_v4());

        let err = catalog.commit(b"orphan", draft).unwrap_err();
        assert!(matches!(err, WmError::NotFound { .. }));
        assert!(catalog.store().keys().unwrap().is_empty());
    }

    #[test]
    fn test_duplicate_id_rejected() {
        let catalog = Catalog::in_memory();
        let asset = upload(&catalog, "a.wav", b"aaa");
        let err = catalog.record(asset).unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::InternalProcessingFailure);
    }

    #[test]
    fn test_record_requires_bytes() {
        let catalog = Catalog::in_memory();
        let tone = generate_test_tone(440.0, 1.0, 16_000, 0.5);
        let asset = AssetDraft::upload("a.wav", &tone).into_asset("0".repeat(64), 0);
        assert!(catalog.record(asset).is_err());
    }

    #[test]
    fn test_delete_removes_entry_and_bytes() {
        let catalog = Catalog::in_memory();
        let asset = upload(&catalog, "a.wav", b"aaa");
        catalog.delete(asset.id).unwrap();

        assert!(catalog.get(asset.id).is_err());
        assert!(catalog.read_bytes(asset.id).is_err());
        assert!(catalog.list().unwrap().is_empty());
        assert!(!catalog.store().contains(&asset.storage_key).unwrap());
        assert!(matches!(
            catalog.delete(asset.id),
            Err(WmError::NotFound { .. })
        ));
    }

    #[test]
    fn test_shared_bytes_survive_until_last_reference() {
        let catalog = Catalog::in_memory();
        let a = upload(&catalog, "a.wav", b"same");
        let b = upload(&catalog, "b.wav", b"same");
        assert_eq!(a.storage_key, b.storage_key);

        catalog.delete(a.id).unwrap();
        assert_eq!(catalog.read_bytes(b.id).unwrap(), b"same");
        catalog.delete(b.id).unwrap();
        assert!(!catalog.store().contains(&b.storage_key).unwrap());
    }

    #[test]
    fn test_deleted_id_cannot_be_reused() {
        let catalog = Catalog::in_memory();
        let asset = upload(&catalog, "a.wav", b"aaa");
        catalog.delete(asset.id).unwrap();
        catalog.store().write(b"aaa").unwrap();
        assert!(catalog.record(asset).is_err());
    }

    #[test]
    fn test_lineage_chain() {
        let catalog = Catalog::in_memory();
        let root = upload(&catalog, "root.wav", b"r");
        let child = derive(&catalog, &root, b"c");
        let grandchild = derive(&catalog, &child, b"g");

        let chain: Vec<Uuid> = catalog
            .lineage(grandchild.id)
            .unwrap()
            .iter()
            .map(|e| e.id())
            .collect();
        assert_eq!(chain, vec![grandchild.id, child.id, root.id]);
        assert_eq!(grandchild.watermark_method, WatermarkState::Neural);
    }

    #[test]
    fn test_lineage_ends_at_tombstone() {
        let catalog = Catalog::in_memory();
        let root = upload(&catalog, "root.wav", b"r");
        let child = derive(&catalog, &root, b"c");
        catalog.delete(root.id).unwrap();

        let chain = catalog.lineage(child.id).unwrap();
        assert_eq!(chain.len(), 2);
        assert!(matches!(chain[1], LineageEntry::Deleted(ref t) if t.id == root.id));

        // A deleted source can still parent new derivations
        let tone = generate_test_tone(440.0, 1.0, 16_000, 0.5);
        let mut draft = AssetDraft::upload("late.wav", &tone);
        draft.source_asset_id = Some(root.id);
        assert!(catalog.commit(b"late", draft).is_ok());
    }

    #[test]
    fn test_lineage_of_deleted_asset_is_not_found() {
        let catalog = Catalog::in_memory();
        let root = upload(&catalog, "root.wav", b"r");
        catalog.delete(root.id).unwrap();
        assert!(matches!(
            catalog.lineage(root.id),
            Err(WmError::NotFound { .. })
        ));
    }

    #[test]
    fn test_persistence_across_reopen() {
        let temp_dir = TempDir::new().unwrap();
        let (kept, deleted) = {
            let catalog = Catalog::open(temp_dir.path()).unwrap();
            let kept = upload(&catalog, "keep.wav", b"keep");
            let deleted = upload(&catalog, "gone.wav", b"gone");
            catalog.delete(deleted.id).unwrap();
            (kept, deleted)
        };

        let catalog = Catalog::open(temp_dir.path()).unwrap();
        assert_eq!(catalog.list().unwrap(), vec![kept.clone()]);
        assert_eq!(catalog.read_bytes(kept.id).unwrap(), b"keep");
        assert!(catalog.get(deleted.id).is_err());

        // Sequence numbering continues
        let next = upload(&catalog, "next.wav", b"next");
        assert_eq!(next.sequence, 2);
    }

    #[test]
    fn test_manifest_is_pretty_json() {
        let temp_dir = TempDir::new().unwrap();
        let catalog = Catalog::open(temp_dir.path()).unwrap();
        upload(&catalog, "a.wav", b"a");
        let content = fs::read_to_string(temp_dir.path().join(MANIFEST_FILE)).unwrap();
        assert!(content.contains("\n  \"version\": 1"));
        assert!(!temp_dir.path().join("catalog.json.tmp").exists());
    }

    #[test]
    fn test_usage_and_sweep() {
        let temp_dir = TempDir::new().unwrap();
        let catalog = Catalog::open(temp_dir.path()).unwrap();
        upload(&catalog, "a.wav", &[0u8; 1024]);
        catalog.store().write(&[1u8; 2048]).unwrap();

        let usage = catalog.usage().unwrap();
        assert_eq!(usage.asset_count, 1);
        assert_eq!(usage.blob_count, 2);
        assert_eq!(usage.total_size_bytes, 3072);
        assert!((usage.total_size_mb - 0.00293).abs() < 0.001);

        assert_eq!(catalog.sweep_orphans().unwrap(), 2048);
        assert_eq!(catalog.usage().unwrap().blob_count, 1);
        assert_eq!(catalog.sweep_orphans().unwrap(), 0);
    }

    #[test]
    fn test_catalog_is_send_and_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<Catalog>();
    }
}
