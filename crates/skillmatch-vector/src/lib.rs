//! Skillmatch Vector crate - embedding, flat L2 index, catalogs, and search.
//!
//! Matches free-text queries such as career goals against catalogs of
//! skills and learning resources. A [`SkillmatchContext`] owns the shared
//! embedder and the catalogs; [`CatalogManager`] mutates catalogs and
//! [`SearchService`] answers queries.

pub mod catalog;
pub mod context;
pub mod embedding;
pub mod index;
pub mod metadata;
pub mod persistence;
pub mod search;

pub use catalog::{Catalog, CatalogManager, CatalogSnapshot};
pub use context::SkillmatchContext;
pub use embedding::{DynEmbeddingService, EmbeddingService, HashEmbedding, OnnxEmbeddingService};
pub use index::{FlatIndex, Neighbor};
pub use metadata::MetadataStore;
pub use persistence::CatalogStore;
pub use search::{SearchFilters, SearchService};
