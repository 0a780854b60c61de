//! Catalogs and the manager that mutates them.
//!
//! A catalog's index and metadata live together in an immutable
//! [`CatalogSnapshot`]. Mutations build a new snapshot off to the side and
//! swap it in with a single pointer store, so readers always see a matching
//! (index, metadata) pair. A per-catalog async mutex serializes mutations,
//! including the artifact writes that follow them. The lock is handed to
//! the blocking write itself, so it stays held until the write finishes even
//! if the mutating caller stops waiting.

use std::sync::{Arc, RwLock};

use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{debug, error, info};

use skillmatch_core::config::is_valid_catalog_name;
use skillmatch_core::error::{Result, SkillmatchError};
use skillmatch_core::types::{CatalogStats, Record};

use crate::context::SkillmatchContext;
use crate::embedding::check_dimension;
use crate::index::FlatIndex;
use crate::metadata::MetadataStore;

/// Immutable (index, metadata) pair. Slot `i` of the index is entry `i` of
/// the metadata.
///
/// `generation` counts mutations since the catalog was first created and
/// stamps the artifacts written from this snapshot.
#[derive(Debug, Clone)]
pub struct CatalogSnapshot {
    index: FlatIndex,
    metadata: MetadataStore,
    generation: u64,
}

impl CatalogSnapshot {
    pub fn empty(dimension: usize) -> Self {
        Self {
            index: FlatIndex::new(dimension),
            metadata: MetadataStore::new(),
            generation: 0,
        }
    }

    pub(crate) fn new(index: FlatIndex, metadata: MetadataStore, generation: u64) -> Self {
        debug_assert_eq!(
            index.len(),
            metadata.len(),
            "index and metadata lengths diverged"
        );
        Self {
            index,
            metadata,
            generation,
        }
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn index(&self) -> &FlatIndex {
        &self.index
    }

    pub fn metadata(&self) -> &MetadataStore {
        &self.metadata
    }

    pub fn len(&self) -> usize {
        self.metadata.len()
    }

    pub fn is_empty(&self) -> bool {
        self.metadata.is_empty()
    }
}

/// One named collection of records with its embedding index.
#[derive(Debug)]
pub struct Catalog {
    name: String,
    state: RwLock<Arc<CatalogSnapshot>>,
    write_lock: Arc<Mutex<()>>,
}

impl Catalog {
    fn new(name: &str, snapshot: CatalogSnapshot) -> Self {
        Self {
            name: name.to_string(),
            state: RwLock::new(Arc::new(snapshot)),
            write_lock: Arc::new(Mutex::new(())),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Current state. The returned snapshot never changes underneath the
    /// caller, even if a mutation completes meanwhile.
    pub fn snapshot(&self) -> Arc<CatalogSnapshot> {
        Arc::clone(&self.state.read().unwrap_or_else(|e| e.into_inner()))
    }

    pub fn len(&self) -> usize {
        self.snapshot().len()
    }

    pub fn is_empty(&self) -> bool {
        self.snapshot().is_empty()
    }

    fn swap(&self, next: Arc<CatalogSnapshot>) {
        *self.state.write().unwrap_or_else(|e| e.into_inner()) = next;
    }

    async fn lock_for_write(&self) -> OwnedMutexGuard<()> {
        Arc::clone(&self.write_lock).lock_owned().await
    }
}

/// The only component that mutates catalogs.
#[derive(Debug, Clone)]
pub struct CatalogManager {
    ctx: Arc<SkillmatchContext>,
}

impl CatalogManager {
    pub fn new(ctx: Arc<SkillmatchContext>) -> Self {
        Self { ctx }
    }

    pub fn context(&self) -> &Arc<SkillmatchContext> {
        &self.ctx
    }

    /// Register a catalog, reading persisted artifacts when present.
    ///
    /// Missing artifacts yield an empty catalog. Loading an already
    /// registered catalog returns the live instance.
    pub fn load(&self, name: &str) -> Result<Arc<Catalog>> {
        if let Some(existing) = self.ctx.catalog(name) {
            return Ok(existing);
        }
        if !is_valid_catalog_name(name) {
            return Err(SkillmatchError::InvalidArgument(format!(
                "invalid catalog name '{}'",
                name
            )));
        }

        let dimension = self.ctx.dimension();
        let snapshot = match self.ctx.store() {
            Some(store) => match store.load(name, dimension)? {
                Some(stored) => {
                    CatalogSnapshot::new(stored.index, stored.metadata, stored.generation)
                }
                None => CatalogSnapshot::empty(dimension),
            },
            None => CatalogSnapshot::empty(dimension),
        };

        info!(catalog = name, records = snapshot.len(), dimension, "Catalog ready");
        Ok(self.ctx.register(Catalog::new(name, snapshot)))
    }

    /// Embed `records` and append them to the catalog, creating the catalog
    /// on first use. Returns the number of records appended.
    ///
    /// Empty input is a no-op. If embedding or indexing fails the catalog
    /// keeps its previous state. A `Persistence` error means the records
    /// are live in memory but were not written to disk.
    pub async fn append_records(&self, name: &str, records: &[Record]) -> Result<usize> {
        if records.is_empty() {
            debug!(catalog = name, "append_records called with no records");
            return Ok(0);
        }

        let catalog = self.load(name)?;
        let guard = catalog.lock_for_write().await;

        let current = catalog.snapshot();
        let vectors = self.embed_records(records).await?;

        let mut index = current.index.clone();
        index.add(&vectors)?;
        let mut metadata = current.metadata.clone();
        metadata.append(records);

        let next = Arc::new(CatalogSnapshot::new(index, metadata, current.generation + 1));
        catalog.swap(Arc::clone(&next));
        info!(
            catalog = name,
            added = records.len(),
            total = next.len(),
            "Records appended"
        );

        self.persist(name, next, guard).await?;
        Ok(records.len())
    }

    /// Replace the catalog's contents with `records`.
    ///
    /// The new state is built completely before it replaces the old one, so
    /// a failed rebuild leaves the catalog untouched. Returns the new record
    /// count.
    pub async fn rebuild(&self, name: &str, records: &[Record]) -> Result<usize> {
        let catalog = self
            .ctx
            .catalog(name)
            .ok_or_else(|| SkillmatchError::CatalogNotFound(name.to_string()))?;
        let guard = catalog.lock_for_write().await;
        let generation = catalog.snapshot().generation + 1;

        let vectors = self.embed_records(records).await?;

        let mut index = FlatIndex::new(self.ctx.dimension());
        index.add(&vectors)?;
        let metadata = MetadataStore::from_records(records.to_vec());

        let next = Arc::new(CatalogSnapshot::new(index, metadata, generation));
        catalog.swap(Arc::clone(&next));
        info!(catalog = name, total = next.len(), "Catalog rebuilt");

        self.persist(name, next, guard).await?;
        Ok(records.len())
    }

    /// Record count and dimension of one catalog.
    pub fn stats(&self, name: &str) -> Result<CatalogStats> {
        let catalog = self
            .ctx
            .catalog(name)
            .ok_or_else(|| SkillmatchError::CatalogNotFound(name.to_string()))?;
        Ok(self.stats_for(&catalog))
    }

    /// Stats for every registered catalog, sorted by name.
    pub fn stats_all(&self) -> Vec<CatalogStats> {
        self.ctx
            .catalog_names()
            .iter()
            .filter_map(|name| self.ctx.catalog(name))
            .map(|catalog| self.stats_for(&catalog))
            .collect()
    }

    pub fn catalog_names(&self) -> Vec<String> {
        self.ctx.catalog_names()
    }

    fn stats_for(&self, catalog: &Catalog) -> CatalogStats {
        let snapshot = catalog.snapshot();
        CatalogStats {
            catalog: catalog.name().to_string(),
            record_count: snapshot.len(),
            dimension: snapshot.index().dimension(),
            model: self.ctx.embedder().model_name().to_string(),
        }
    }

    async fn embed_records(&self, records: &[Record]) -> Result<Vec<Vec<f32>>> {
        let texts: Vec<String> = records.iter().map(Record::embedding_text).collect();
        let vectors = self.ctx.embedder().embed_batch_boxed(&texts).await?;

        if vectors.len() != records.len() {
            return Err(SkillmatchError::Embedding(format!(
                "embedder returned {} vectors for {} texts",
                vectors.len(),
                records.len()
            )));
        }
        let dimension = self.ctx.dimension();
        for vector in &vectors {
            check_dimension(vector, dimension)?;
        }
        Ok(vectors)
    }

    /// Write the snapshot to disk, if this context persists at all.
    ///
    /// Takes the catalog's write guard and releases it only when the write
    /// is done, so writes for one catalog land in mutation order.
    async fn persist(
        &self,
        name: &str,
        snapshot: Arc<CatalogSnapshot>,
        guard: OwnedMutexGuard<()>,
    ) -> Result<()> {
        let Some(store) = self.ctx.store().cloned() else {
            return Ok(());
        };
        let catalog = name.to_string();

        let result = tokio::task::spawn_blocking(move || {
            let _guard = guard;
            store.save(
                &catalog,
                snapshot.generation(),
                snapshot.index(),
                snapshot.metadata(),
            )
        })
        .await
        .map_err(|e| SkillmatchError::Persistence(format!("persist task failed: {}", e)))
        .and_then(|inner| inner);

        if let Err(e) = &result {
            error!(
                catalog = name,
                error = %e,
                "Failed to persist catalog; in-memory state is authoritative until restart"
            );
        }
        result.map_err(|e| match e {
            SkillmatchError::Persistence(_) => e,
            other => SkillmatchError::Persistence(other.to_string()),
        })
    }
}
