//! Process-scoped state shared by the catalog manager and search service.
//!
//! One `SkillmatchContext` is built at startup. It owns the single embedder
//! instance and the name-to-catalog map; everything else receives it as an
//! `Arc` rather than reaching for globals.

use std::collections::{BTreeSet, HashMap};
use std::path::Path;
use std::sync::{Arc, RwLock};

use tracing::{error, info, warn};

use skillmatch_core::config::{expand_home, SearchConfig, SkillmatchConfig};
use skillmatch_core::error::Result;

use crate::catalog::{Catalog, CatalogManager};
use crate::embedding::{DynEmbeddingService, HashEmbedding, OnnxEmbeddingService};
use crate::persistence::CatalogStore;

pub struct SkillmatchContext {
    embedder: Arc<dyn DynEmbeddingService>,
    catalogs: RwLock<HashMap<String, Arc<Catalog>>>,
    store: Option<CatalogStore>,
    search: SearchConfig,
}

impl std::fmt::Debug for SkillmatchContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SkillmatchContext")
            .field("model", &self.embedder.model_name())
            .field("dimension", &self.embedder.dimensions())
            .field("catalogs", &self.catalog_names())
            .field("store", &self.store)
            .finish()
    }
}

impl SkillmatchContext {
    pub fn new(
        embedder: Arc<dyn DynEmbeddingService>,
        store: Option<CatalogStore>,
        search: SearchConfig,
    ) -> Self {
        Self {
            embedder,
            catalogs: RwLock::new(HashMap::new()),
            store,
            search,
        }
    }

    /// A context that never touches disk. Used by tests and tools.
    pub fn in_memory(embedder: Arc<dyn DynEmbeddingService>) -> Self {
        Self::new(embedder, None, SearchConfig::default())
    }

    /// Build the context described by `config` and load its catalogs.
    ///
    /// Uses the ONNX model when `embedding.model_dir` is set, otherwise the
    /// hashing embedder at `embedding.dimension`. Loads the configured
    /// catalogs plus every catalog with artifacts on disk. A catalog whose
    /// artifacts cannot be loaded is logged and left unregistered.
    pub fn open(config: &SkillmatchConfig) -> Result<Arc<Self>> {
        config.validate()?;

        let embedder: Arc<dyn DynEmbeddingService> = match &config.embedding.model_dir {
            Some(dir) => Arc::new(OnnxEmbeddingService::from_directory(
                &expand_home(dir),
                &config.embedding.model_name,
            )?),
            None => {
                info!(
                    dimension = config.embedding.dimension,
                    "No model directory configured, using hashing embedder"
                );
                Arc::new(HashEmbedding::new(config.embedding.dimension))
            }
        };

        let store = config
            .catalogs
            .persist
            .then(|| CatalogStore::new(config.catalog_dir()));

        let ctx = Arc::new(Self::new(embedder, store, config.search.clone()));
        let manager = CatalogManager::new(Arc::clone(&ctx));

        let mut names: BTreeSet<String> = config.catalogs.names.iter().cloned().collect();
        if let Some(store) = ctx.store() {
            match store.stored_catalogs() {
                Ok(found) => names.extend(found),
                Err(e) => warn!(error = %e, "Could not list persisted catalogs"),
            }
        }
        for name in &names {
            if let Err(e) = manager.load(name) {
                error!(
                    catalog = %name,
                    error = %e,
                    "Failed to load catalog; it stays unavailable until its artifacts are repaired"
                );
            }
        }
        Ok(ctx)
    }

    pub fn embedder(&self) -> &Arc<dyn DynEmbeddingService> {
        &self.embedder
    }

    pub fn dimension(&self) -> usize {
        self.embedder.dimensions()
    }

    pub fn store(&self) -> Option<&CatalogStore> {
        self.store.as_ref()
    }

    pub fn store_dir(&self) -> Option<&Path> {
        self.store.as_ref().map(CatalogStore::dir)
    }

    pub fn search_config(&self) -> &SearchConfig {
        &self.search
    }

    /// Registered catalog by name.
    pub fn catalog(&self, name: &str) -> Option<Arc<Catalog>> {
        self.catalogs
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(name)
            .cloned()
    }

    /// Registered catalog names, sorted.
    pub fn catalog_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .catalogs
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .keys()
            .cloned()
            .collect();
        names.sort();
        names
    }

    /// Register `catalog` unless one with the same name already exists.
    /// Returns whichever instance ends up registered.
    pub(crate) fn register(&self, catalog: Catalog) -> Arc<Catalog> {
        let mut catalogs = self.catalogs.write().unwrap_or_else(|e| e.into_inner());
        Arc::clone(
            catalogs
                .entry(catalog.name().to_string())
                .or_insert_with(|| Arc::new(catalog)),
        )
    }
}
