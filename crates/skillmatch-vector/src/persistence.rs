//! On-disk artifacts for catalogs.
//!
//! Each catalog is stored as two files in the catalog directory:
//! `<name>.index` (bincode, wrapping [`FlatIndex::to_bytes`]) and
//! `<name>.meta.json` (records in slot order). Both carry the generation of
//! the snapshot they were written from, and a pair is only loaded when the
//! generations agree.
//!
//! A save stages both files as uniquely named temp files before touching
//! the committed ones, then renames the index and the metadata into place.
//! The replaced index is kept as `<name>.index.prev` until the metadata
//! rename succeeds, so a commit interrupted between the two renames loads
//! as the previous pair.

use std::collections::BTreeSet;
use std::fs;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;
use tracing::{debug, info, warn};

use skillmatch_core::config::is_valid_catalog_name;
use skillmatch_core::error::{Result, SkillmatchError};
use skillmatch_core::types::Record;

use crate::index::FlatIndex;
use crate::metadata::MetadataStore;

const INDEX_EXT: &str = ".index";
const PREV_INDEX_EXT: &str = ".index.prev";
const METADATA_EXT: &str = ".meta.json";

#[derive(Serialize, Deserialize)]
struct IndexArtifact {
    generation: u64,
    index: Vec<u8>,
}

#[derive(Serialize)]
struct MetadataArtifactRef<'a> {
    generation: u64,
    records: &'a [Record],
}

#[derive(Deserialize)]
struct MetadataArtifact {
    generation: u64,
    records: Vec<Record>,
}

/// A catalog read back from disk.
#[derive(Debug)]
pub struct PersistedCatalog {
    pub index: FlatIndex,
    pub metadata: MetadataStore,
    pub generation: u64,
}

/// Reads and writes catalog artifacts under one directory.
#[derive(Debug, Clone)]
pub struct CatalogStore {
    dir: PathBuf,
}

impl CatalogStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn index_path(&self, catalog: &str) -> PathBuf {
        self.dir.join(format!("{}{}", catalog, INDEX_EXT))
    }

    pub fn metadata_path(&self, catalog: &str) -> PathBuf {
        self.dir.join(format!("{}{}", catalog, METADATA_EXT))
    }

    fn prev_index_path(&self, catalog: &str) -> PathBuf {
        self.dir.join(format!("{}{}", catalog, PREV_INDEX_EXT))
    }

    /// Write both artifacts, stamped with `generation`.
    ///
    /// Staging failures leave the committed pair untouched.
    pub fn save(
        &self,
        catalog: &str,
        generation: u64,
        index: &FlatIndex,
        metadata: &MetadataStore,
    ) -> Result<()> {
        fs::create_dir_all(&self.dir).map_err(|e| {
            SkillmatchError::Persistence(format!("create {}: {}", self.dir.display(), e))
        })?;

        let index_bytes = bincode::serialize(&IndexArtifact {
            generation,
            index: index.to_bytes()?,
        })?;
        let metadata_bytes = serde_json::to_vec_pretty(&MetadataArtifactRef {
            generation,
            records: metadata.records(),
        })?;

        let staged_index = self.stage(catalog, &index_bytes)?;
        let staged_metadata = self.stage(catalog, &metadata_bytes)?;

        let index_path = self.index_path(catalog);
        let prev_path = self.prev_index_path(catalog);
        if prev_path.exists() {
            // The last commit stopped before its metadata landed. The kept
            // index still matches the committed metadata.
            warn!(catalog, "Previous save was interrupted; keeping its fallback index");
        } else if index_path.exists() {
            fs::rename(&index_path, &prev_path).map_err(|e| {
                SkillmatchError::Persistence(format!(
                    "rename {} -> {}: {}",
                    index_path.display(),
                    prev_path.display(),
                    e
                ))
            })?;
        }

        commit(staged_index, &index_path)?;
        commit(staged_metadata, &self.metadata_path(catalog))?;

        if let Err(e) = fs::remove_file(&prev_path) {
            if e.kind() != ErrorKind::NotFound {
                warn!(catalog, error = %e, "Could not remove fallback index");
            }
        }

        info!(
            catalog,
            generation,
            records = metadata.len(),
            dir = %self.dir.display(),
            "Catalog persisted"
        );
        Ok(())
    }

    /// Load a catalog's artifacts.
    ///
    /// Returns `Ok(None)` when either artifact is absent. Unreadable
    /// artifacts, an index and metadata of different generations, lengths
    /// that disagree, or an index whose dimension differs from
    /// `expected_dimension` are errors.
    pub fn load(&self, catalog: &str, expected_dimension: usize) -> Result<Option<PersistedCatalog>> {
        let metadata_path = self.metadata_path(catalog);
        let prev_path = self.prev_index_path(catalog);
        let candidates: Vec<PathBuf> = [self.index_path(catalog), prev_path.clone()]
            .into_iter()
            .filter(|p| p.exists())
            .collect();

        match (metadata_path.exists(), candidates.is_empty()) {
            (true, false) => {}
            (false, true) => {
                debug!(catalog, "No persisted artifacts");
                return Ok(None);
            }
            (metadata_exists, _) => {
                let present = if metadata_exists { &metadata_path } else { &candidates[0] };
                warn!(
                    catalog,
                    present = %present.display(),
                    "Only one catalog artifact found; starting empty"
                );
                return Ok(None);
            }
        }

        let metadata: MetadataArtifact = serde_json::from_slice(&read_artifact(&metadata_path)?)
            .map_err(|e| {
                SkillmatchError::Persistence(format!("{}: {}", metadata_path.display(), e))
            })?;

        let mut seen = Vec::new();
        let mut matched = None;
        for path in &candidates {
            let artifact: IndexArtifact = bincode::deserialize(&read_artifact(path)?)
                .map_err(|e| SkillmatchError::Persistence(format!("{}: {}", path.display(), e)))?;
            if artifact.generation == metadata.generation {
                matched = Some((path, artifact));
                break;
            }
            seen.push(artifact.generation);
        }
        let Some((index_path, artifact)) = matched else {
            return Err(SkillmatchError::Persistence(format!(
                "catalog '{}' metadata is generation {} but index files hold {:?}",
                catalog, metadata.generation, seen
            )));
        };
        if *index_path == prev_path {
            warn!(
                catalog,
                generation = metadata.generation,
                "Recovered catalog from an interrupted save"
            );
        }

        let index = FlatIndex::from_bytes(&artifact.index).map_err(|e| {
            SkillmatchError::Persistence(format!("{}: {}", index_path.display(), e))
        })?;

        if index.dimension() != expected_dimension {
            return Err(SkillmatchError::DimensionMismatch {
                expected: expected_dimension,
                actual: index.dimension(),
            });
        }
        if index.len() != metadata.records.len() {
            return Err(SkillmatchError::Persistence(format!(
                "catalog '{}' has {} vectors but {} metadata entries",
                catalog,
                index.len(),
                metadata.records.len()
            )));
        }

        info!(
            catalog,
            generation = metadata.generation,
            records = metadata.records.len(),
            "Loaded persisted catalog"
        );
        Ok(Some(PersistedCatalog {
            index,
            metadata: MetadataStore::from_records(metadata.records),
            generation: metadata.generation,
        }))
    }

    /// Names of catalogs with committed metadata on disk, sorted.
    pub fn stored_catalogs(&self) -> Result<Vec<String>> {
        let entries = match fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => {
                return Err(SkillmatchError::Persistence(format!(
                    "list {}: {}",
                    self.dir.display(),
                    e
                )))
            }
        };

        let mut names = BTreeSet::new();
        for entry in entries {
            let entry = entry.map_err(|e| {
                SkillmatchError::Persistence(format!("list {}: {}", self.dir.display(), e))
            })?;
            let file_name = entry.file_name();
            let Some(stem) = file_name.to_str().and_then(|n| n.strip_suffix(METADATA_EXT)) else {
                continue;
            };
            if is_valid_catalog_name(stem) {
                names.insert(stem.to_string());
            }
        }
        Ok(names.into_iter().collect())
    }

    /// Write `bytes` to a fresh temp file beside the artifacts.
    fn stage(&self, catalog: &str, bytes: &[u8]) -> Result<NamedTempFile> {
        let prefix = format!(".{}.", catalog);
        let mut file = tempfile::Builder::new()
            .prefix(&prefix)
            .suffix(".tmp")
            .tempfile_in(&self.dir)
            .map_err(|e| {
                SkillmatchError::Persistence(format!("stage in {}: {}", self.dir.display(), e))
            })?;

        let written = file.write_all(bytes);
        written
            .and_then(|()| file.as_file().sync_all())
            .map_err(|e| {
                SkillmatchError::Persistence(format!("write {}: {}", file.path().display(), e))
            })?;
        Ok(file)
    }
}

fn commit(staged: NamedTempFile, path: &Path) -> Result<()> {
    staged.persist(path).map(|_| ()).map_err(|e| {
        SkillmatchError::Persistence(format!(
            "rename {} -> {}: {}",
            e.file.path().display(),
            path.display(),
            e.error
        ))
    })
}

fn read_artifact(path: &Path) -> Result<Vec<u8>> {
    fs::read(path)
        .map_err(|e| SkillmatchError::Persistence(format!("read {}: {}", path.display(), e)))
}
