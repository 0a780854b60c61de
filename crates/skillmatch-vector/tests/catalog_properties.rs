//! End-to-end behaviour of catalogs and search through the public API.
//!
//! Every test builds its own context; persisted tests use a temp directory.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use skillmatch_core::config::{SearchConfig, SkillmatchConfig};
use skillmatch_core::error::{Result, SkillmatchError};
use skillmatch_core::types::Record;
use skillmatch_vector::{
    CatalogManager, CatalogStore, EmbeddingService, HashEmbedding, SearchService,
    SkillmatchContext,
};

// =============================================================================
// Helpers
// =============================================================================

/// Hash embedder that fails on any text containing "FAIL".
#[derive(Default)]
struct FlakyEmbedding {
    inner: HashEmbedding,
    calls: AtomicUsize,
}

impl EmbeddingService for FlakyEmbedding {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if text.contains("FAIL") {
            return Err(SkillmatchError::Embedding("model unavailable".to_string()));
        }
        self.inner.embed(text).await
    }

    fn dimensions(&self) -> usize {
        EmbeddingService::dimensions(&self.inner)
    }

    fn model_name(&self) -> &str {
        "flaky"
    }
}

fn in_memory() -> (CatalogManager, SearchService) {
    let ctx = Arc::new(SkillmatchContext::in_memory(Arc::new(HashEmbedding::default())));
    (CatalogManager::new(Arc::clone(&ctx)), SearchService::new(ctx))
}

fn persisted(dir: &std::path::Path) -> (CatalogManager, SearchService) {
    let ctx = Arc::new(SkillmatchContext::new(
        Arc::new(HashEmbedding::default()),
        Some(CatalogStore::new(dir)),
        SearchConfig::default(),
    ));
    (CatalogManager::new(Arc::clone(&ctx)), SearchService::new(ctx))
}

fn config_in(dir: &std::path::Path) -> SkillmatchConfig {
    let mut config = SkillmatchConfig::default();
    config.general.data_dir = dir.to_string_lossy().into_owned();
    config
}

fn opened(config: &SkillmatchConfig) -> (CatalogManager, SearchService) {
    let ctx = SkillmatchContext::open(config).unwrap();
    (CatalogManager::new(Arc::clone(&ctx)), SearchService::new(ctx))
}

fn skills() -> Vec<Record> {
    vec![
        Record::new(1, "Python").with_description("Scripting, data analysis and web backends"),
        Record::new(2, "Java").with_description("Object oriented programming on the JVM"),
        Record::new(3, "SQL").with_description("Relational database queries"),
        Record::new(4, "Docker").with_description("Containers and images"),
        Record::new(5, "React").with_description("Frontend web components"),
        Record::new(6, "Machine Learning").with_description("Models trained from data"),
    ]
}

const QUERIES: &[&str] = &[
    "python programming",
    "web frontend",
    "data analysis with SQL",
    "containers for deployment",
    "learning from data",
];

fn ids_and_scores(results: &[skillmatch_core::types::SearchResult]) -> Vec<(i64, f64)> {
    results
        .iter()
        .map(|r| (r.record_id, r.similarity_score))
        .collect()
}

// =============================================================================
// Properties
// =============================================================================

#[tokio::test]
async fn lengths_match_after_every_mutation() {
    let (manager, _) = in_memory();
    manager.load("skills").unwrap();

    let all = skills();
    manager.append_records("skills", &all[..2]).await.unwrap();
    manager.append_records("skills", &all[2..]).await.unwrap();
    manager.rebuild("skills", &all[1..4]).await.unwrap();

    let snapshot = manager.load("skills").unwrap().snapshot();
    assert_eq!(snapshot.index().len(), snapshot.metadata().len());
    assert_eq!(snapshot.len(), 3);
}

#[tokio::test]
async fn save_then_load_reproduces_search_results() {
    let dir = tempfile::tempdir().unwrap();

    let before = {
        let (manager, search) = persisted(dir.path());
        manager.load("skills").unwrap();
        manager.rebuild("skills", &skills()).await.unwrap();

        let mut out = Vec::new();
        for q in QUERIES {
            for k in [1, 3, 10] {
                out.push(ids_and_scores(&search.search("skills", q, k).await.unwrap()));
            }
        }
        out
    };

    let (manager, search) = persisted(dir.path());
    manager.load("skills").unwrap();
    assert_eq!(manager.stats("skills").unwrap().record_count, 6);

    let mut after = Vec::new();
    for q in QUERIES {
        for k in [1, 3, 10] {
            after.push(ids_and_scores(&search.search("skills", q, k).await.unwrap()));
        }
    }
    assert_eq!(before, after);
}

#[tokio::test]
async fn embed_batch_preserves_order() {
    let embedder = HashEmbedding::default();
    let texts: Vec<String> = ["a first text", "b second text", "c third"]
        .iter()
        .map(|s| s.to_string())
        .collect();
    let batch = embedder.embed_batch(&texts).await.unwrap();
    for (i, text) in texts.iter().enumerate() {
        assert_eq!(batch[i], embedder.embed(text).await.unwrap());
    }
}

#[tokio::test]
async fn scores_decrease_as_distance_grows() {
    let (manager, search) = in_memory();
    manager.append_records("skills", &skills()).await.unwrap();

    for q in QUERIES {
        let results = search.search("skills", q, 6).await.unwrap();
        assert_eq!(results.len(), 6);
        for pair in results.windows(2) {
            assert!(pair[0].distance <= pair[1].distance);
            if pair[0].distance < pair[1].distance {
                assert!(pair[0].similarity_score > pair[1].similarity_score);
            } else {
                assert_eq!(pair[0].similarity_score, pair[1].similarity_score);
            }
        }
    }
}

#[tokio::test]
async fn rebuild_then_append_matches_single_rebuild() {
    let all = skills();

    let (incremental, search_a) = in_memory();
    incremental.load("skills").unwrap();
    incremental.rebuild("skills", &all[..4]).await.unwrap();
    incremental.append_records("skills", &all[4..]).await.unwrap();

    let (bulk, search_b) = in_memory();
    bulk.load("skills").unwrap();
    bulk.rebuild("skills", &all).await.unwrap();

    for q in QUERIES {
        let a = search_a.search("skills", q, 6).await.unwrap();
        let b = search_b.search("skills", q, 6).await.unwrap();
        assert_eq!(ids_and_scores(&a), ids_and_scores(&b));
    }
}

#[tokio::test]
async fn rebuild_twice_is_idempotent() {
    let (manager, search) = in_memory();
    manager.load("skills").unwrap();

    manager.rebuild("skills", &skills()).await.unwrap();
    let first = search.search("skills", "web programming", 6).await.unwrap();
    manager.rebuild("skills", &skills()).await.unwrap();
    let second = search.search("skills", "web programming", 6).await.unwrap();

    assert_eq!(ids_and_scores(&first), ids_and_scores(&second));
}

#[tokio::test]
async fn fresh_catalog_returns_no_results() {
    let (manager, search) = in_memory();
    manager.load("skills").unwrap();
    assert!(search.search("skills", "anything", 5).await.unwrap().is_empty());
}

#[tokio::test]
async fn missing_artifacts_load_as_empty_catalog() {
    let dir = tempfile::tempdir().unwrap();
    let (manager, search) = persisted(&dir.path().join("never-created"));
    manager.load("resources").unwrap();
    assert_eq!(manager.stats("resources").unwrap().record_count, 0);
    assert!(search.search("resources", "python", 5).await.unwrap().is_empty());
}

// =============================================================================
// Scenarios
// =============================================================================

#[tokio::test]
async fn python_query_prefers_python_record() {
    let (manager, search) = in_memory();
    manager
        .append_records("skills", &[Record::new(1, "Python"), Record::new(2, "Java")])
        .await
        .unwrap();

    let top = search.search("skills", "Python programming", 1).await.unwrap();
    assert_eq!(top.len(), 1);
    assert_eq!(top[0].record_id, 1);

    let both = search.search("skills", "Python programming", 2).await.unwrap();
    let java = both.iter().find(|r| r.record_id == 2).unwrap();
    assert!(top[0].similarity_score > java.similarity_score);
}

#[tokio::test]
async fn empty_append_leaves_stats_unchanged() {
    let (manager, _) = in_memory();
    manager.append_records("skills", &skills()).await.unwrap();
    let before = manager.stats("skills").unwrap();

    manager.append_records("skills", &[]).await.unwrap();
    assert_eq!(manager.stats("skills").unwrap(), before);
}

#[tokio::test]
async fn embedding_failure_mid_rebuild_leaves_catalog_unchanged() {
    let embedder = Arc::new(FlakyEmbedding::default());
    let ctx = Arc::new(SkillmatchContext::in_memory(embedder.clone()));
    let manager = CatalogManager::new(Arc::clone(&ctx));
    let search = SearchService::new(ctx);

    manager.append_records("skills", &skills()).await.unwrap();
    let stats_before = manager.stats("skills").unwrap();
    let results_before = search.search("skills", "python", 3).await.unwrap();

    let mut replacement = skills();
    replacement.insert(2, Record::new(99, "FAIL halfway"));
    let calls_before = embedder.calls.load(Ordering::SeqCst);

    let err = manager.rebuild("skills", &replacement).await.unwrap_err();
    assert!(matches!(err, SkillmatchError::Embedding(_)));
    // Failed on the third text, after embedding two.
    assert_eq!(embedder.calls.load(Ordering::SeqCst) - calls_before, 3);

    assert_eq!(manager.stats("skills").unwrap(), stats_before);
    let results_after = search.search("skills", "python", 3).await.unwrap();
    assert_eq!(ids_and_scores(&results_before), ids_and_scores(&results_after));
}

#[tokio::test]
async fn admin_operations_on_unknown_catalog_fail() {
    let (manager, search) = in_memory();
    assert!(matches!(
        manager.rebuild("courses", &skills()).await,
        Err(SkillmatchError::CatalogNotFound(_))
    ));
    assert!(matches!(
        manager.stats("courses"),
        Err(SkillmatchError::CatalogNotFound(_))
    ));
    assert!(search.search("courses", "python", 3).await.unwrap().is_empty());
}

#[tokio::test]
async fn catalogs_are_independent() {
    let (manager, search) = in_memory();
    manager.append_records("skills", &skills()).await.unwrap();
    manager
        .append_records(
            "resources",
            &[Record::new(1, "Java Programming Masterclass").with_extra("url", "https://udemy.com")],
        )
        .await
        .unwrap();

    assert_eq!(manager.stats("skills").unwrap().record_count, 6);
    assert_eq!(manager.stats("resources").unwrap().record_count, 1);

    let hits = search.search("resources", "java", 10).await.unwrap();
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].display_fields.extra["url"], "https://udemy.com");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn readers_never_see_half_applied_mutations() {
    let (manager, search) = in_memory();
    manager.load("skills").unwrap();

    let writer = {
        let manager = manager.clone();
        tokio::spawn(async move {
            for batch in 0..20i64 {
                let records: Vec<Record> = (0..5)
                    .map(|i| Record::new(batch * 5 + i, format!("skill {} variant {}", batch, i)))
                    .collect();
                manager.append_records("skills", &records).await.unwrap();
            }
        })
    };

    let mut readers = Vec::new();
    for _ in 0..4 {
        let manager = manager.clone();
        let search = search.clone();
        readers.push(tokio::spawn(async move {
            for _ in 0..50 {
                let snapshot = manager.load("skills").unwrap().snapshot();
                assert_eq!(snapshot.index().len(), snapshot.metadata().len());
                assert_eq!(snapshot.len() % 5, 0);

                let results = search.search("skills", "skill variant", 100).await.unwrap();
                assert_eq!(results.len() % 5, 0);
                tokio::task::yield_now().await;
            }
        }));
    }

    writer.await.unwrap();
    for reader in readers {
        reader.await.unwrap();
    }
    assert_eq!(manager.stats("skills").unwrap().record_count, 100);
}

// =============================================================================
// Restarts
// =============================================================================

#[tokio::test]
async fn lazily_created_catalog_survives_restart() {
    let dir = tempfile::tempdir().unwrap();
    let config = config_in(dir.path());

    {
        let (manager, _) = opened(&config);
        let jobs = vec![
            Record::new(10, "Data Engineer").with_description("Pipelines, SQL and Python"),
            Record::new(11, "Frontend Developer").with_description("React and web components"),
        ];
        manager.append_records("jobs", &jobs).await.unwrap();
    }

    let (manager, search) = opened(&config);
    assert_eq!(manager.stats("jobs").unwrap().record_count, 2);
    let results = search.search("jobs", "Data Engineer", 1).await.unwrap();
    assert_eq!(results[0].record_id, 10);
}

#[tokio::test]
async fn blocked_metadata_write_reopens_previous_state() {
    let dir = tempfile::tempdir().unwrap();
    let config = config_in(dir.path());
    let all = skills();

    let (manager, _) = opened(&config);
    manager.append_records("skills", &all[..3]).await.unwrap();

    // Put a directory where the metadata file goes so its commit fails
    // after the new index is already in place.
    let store = CatalogStore::new(config.catalog_dir());
    let metadata_path = store.metadata_path("skills");
    let committed = std::fs::read(&metadata_path).unwrap();
    std::fs::remove_file(&metadata_path).unwrap();
    std::fs::create_dir(&metadata_path).unwrap();

    let err = manager.append_records("skills", &all[3..]).await.unwrap_err();
    assert!(err.is_persistence());
    assert_eq!(manager.stats("skills").unwrap().record_count, 6);
    drop(manager);

    std::fs::remove_dir(&metadata_path).unwrap();
    std::fs::write(&metadata_path, committed).unwrap();

    let (manager, search) = opened(&config);
    assert_eq!(manager.stats("skills").unwrap().record_count, 3);
    let ids: Vec<i64> = search
        .search("skills", "python programming", 10)
        .await
        .unwrap()
        .iter()
        .map(|r| r.record_id)
        .collect();
    assert_eq!(ids.len(), 3);
    assert!(ids.iter().all(|id| *id <= 3));

    manager.append_records("skills", &all[3..]).await.unwrap();
    let (manager, _) = opened(&config);
    assert_eq!(manager.stats("skills").unwrap().record_count, 6);
}

#[tokio::test]
async fn unreadable_catalog_does_not_block_the_others() {
    let dir = tempfile::tempdir().unwrap();
    let config = config_in(dir.path());

    {
        let (manager, _) = opened(&config);
        manager.rebuild("skills", &skills()).await.unwrap();
        manager.append_records("jobs", &skills()[..1]).await.unwrap();
    }
    let store = CatalogStore::new(config.catalog_dir());
    std::fs::write(store.index_path("jobs"), b"truncated").unwrap();

    let (manager, search) = opened(&config);
    assert!(matches!(
        manager.stats("jobs"),
        Err(SkillmatchError::CatalogNotFound(_))
    ));
    assert_eq!(manager.stats("skills").unwrap().record_count, 6);
    assert!(!search.search("skills", "python", 3).await.unwrap().is_empty());
}
