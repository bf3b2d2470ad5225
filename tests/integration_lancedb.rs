#![expect(
    clippy::tests_outside_test_module,
    reason = "integration tests are only compiled in test mode"
)]

/// Integration tests for the per-tenant LanceDB stores on a real temp directory
use docuchat::{
    cleanup::CleanupScheduler,
    config::Config,
    database::{DocumentIndex, LanceTenants, TenantIndexes},
    ingestion::chunk_metadata,
};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

const DIM: usize = 16;

fn tenants() -> (LanceTenants, TempDir) {
    let temp_dir = TempDir::new().expect("should create temp dir");
    let tenants = LanceTenants::new(temp_dir.path().join("vector_db"), "documents", DIM);
    (tenants, temp_dir)
}

/// A unit vector pointing mostly along `axis`, tilted slightly toward the next axis
fn topic_vector(axis: usize, tilt: f32) -> Vec<f32> {
    let mut vector = vec![0.0; DIM];
    vector[axis % DIM] = 1.0;
    vector[(axis + 1) % DIM] = tilt;
    let norm = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
    vector.iter().map(|x| x / norm).collect()
}

fn documentation_chunks() -> Vec<String> {
    [
        "Installation: add the crate to Cargo.toml and run cargo build.",
        "Configuration lives in config.toml next to the vector database.",
        "The chat endpoint answers questions from your uploaded documents.",
        "Cleanup removes every tenant store on a fixed interval.",
    ]
    .iter()
    .map(|s| (*s).to_string())
    .collect()
}

async fn ingest(index: &dyn DocumentIndex, user_id: &str, file_name: &str, chunks: &[String]) {
    let vectors: Vec<Vec<f32>> = (0..chunks.len()).map(|i| topic_vector(i, 0.1)).collect();
    let metadata = chunk_metadata(chunks, user_id);
    let inserted = index
        .insert(chunks, &vectors, &metadata, file_name, "txt")
        .await
        .expect("should insert chunks");
    assert_eq!(inserted, chunks.len());
}

#[tokio::test]
async fn tenants_are_isolated_on_disk() {
    let (tenants, temp_dir) = tenants();
    let alice = tenants.index_for("alice").expect("alice is a valid tenant");
    let bob = tenants.index_for("bob").expect("bob is a valid tenant");

    ingest(alice.as_ref(), "alice", "guide.txt", &documentation_chunks()).await;

    let alice_info = alice.table_info().await.expect("should read alice's table");
    let bob_info = bob.table_info().await.expect("should read bob's table");
    assert_eq!(alice_info.row_count, 4);
    assert!(bob_info.is_empty());
    assert_ne!(alice_info.db_path, bob_info.db_path);

    assert!(temp_dir.path().join("vector_db/alice").is_dir());
    assert!(temp_dir.path().join("vector_db/bob").is_dir());

    let hits = bob
        .search_similar(&topic_vector(0, 0.0), 10, 0.0)
        .await
        .expect("should search bob's empty table");
    assert!(hits.is_empty());
}

#[tokio::test]
async fn search_ranks_the_closest_chunk_first() {
    let (tenants, _temp_dir) = tenants();
    let index = tenants.index_for("alice").expect("valid tenant");
    let chunks = documentation_chunks();
    ingest(index.as_ref(), "alice", "guide.txt", &chunks).await;

    let hits = index
        .search_similar(&topic_vector(2, 0.05), 3, 0.0)
        .await
        .expect("should search");

    assert_eq!(hits.len(), 3);
    assert_eq!(hits[0].text, chunks[2]);
    assert_eq!(hits[0].chunk_index, 2);
    assert_eq!(hits[0].file_name, "guide.txt");
    assert_eq!(hits[0].metadata["total_chunks"], 4);
    assert!(
        hits.windows(2)
            .all(|pair| pair[0].similarity_score >= pair[1].similarity_score)
    );
}

#[tokio::test]
async fn reingesting_a_file_replaces_its_chunks() {
    let (tenants, _temp_dir) = tenants();
    let index = tenants.index_for("alice").expect("valid tenant");
    let chunks = documentation_chunks();
    ingest(index.as_ref(), "alice", "guide.txt", &chunks).await;
    ingest(index.as_ref(), "alice", "notes.txt", &chunks[..1]).await;

    let removed = index
        .delete_by_file("guide.txt")
        .await
        .expect("should delete");
    assert_eq!(removed, 4);
    ingest(index.as_ref(), "alice", "guide.txt", &chunks[..2]).await;

    let summary = index.files_summary().await.expect("should summarize");
    assert_eq!(summary.total_files, 2);
    assert_eq!(summary.total_chunks, 3);
    let guide = summary
        .files
        .iter()
        .find(|f| f.file_name == "guide.txt")
        .expect("guide.txt should be listed");
    assert_eq!(guide.chunk_count, 2);
    assert_eq!(guide.file_type, "txt");
    assert!(guide.created_at.is_some());
}

#[tokio::test]
async fn cleanup_wipes_tenants_and_stores_recover() {
    let (tenants, temp_dir) = tenants();
    let root = temp_dir.path().join("vector_db");
    let alice = tenants.index_for("alice").expect("valid tenant");
    ingest(alice.as_ref(), "alice", "guide.txt", &documentation_chunks()).await;
    tokio::fs::write(root.join("README.md"), b"tenant stores live here")
        .await
        .expect("should write marker");

    let report = CleanupScheduler::new(&root, Duration::from_secs(3600))
        .with_tenants(Arc::new(tenants.clone()))
        .run_once()
        .await;
    assert_eq!(report.items_removed, 1);
    assert_eq!(tenants.open_stores(), 0);
    assert!(root.join("README.md").exists());
    assert!(!root.join("alice").exists());

    let alice = tenants.index_for("alice").expect("valid tenant");
    let info = alice.table_info().await.expect("should recreate the table");
    assert!(info.is_empty());

    ingest(alice.as_ref(), "alice", "guide.txt", &documentation_chunks()[..1]).await;
    let info = alice.table_info().await.expect("should read table");
    assert_eq!(info.row_count, 1);
}

#[tokio::test]
async fn configured_dimension_is_used_for_new_tables() {
    let temp_dir = TempDir::new().expect("should create temp dir");
    let mut config = Config::default();
    config.base_dir = temp_dir.path().to_path_buf();
    config.openai.embedding_dimension = 8;

    let tenants = LanceTenants::from_config(&config);
    assert_eq!(tenants.root(), temp_dir.path().join("vector_db"));

    let index = tenants.index_for("carol").expect("valid tenant");
    let chunks = vec!["only chunk".to_string()];
    let mut vector = vec![0.0; 8];
    vector[3] = 1.0;
    index
        .insert(&chunks, &[vector], &chunk_metadata(&chunks, "carol"), "a.txt", "txt")
        .await
        .expect("should insert 8-dimensional vector");

    let info = index.table_info().await.expect("should read table");
    assert!(info.schema.contains("embedding"));

    // shorter query vectors are zero-padded
    let hits = index
        .search_similar(&[0.0, 0.0, 0.0, 1.0], 5, 0.0)
        .await
        .expect("should search");
    assert_eq!(hits.len(), 1);
    assert!(hits[0].similarity_score > 0.99);
}

#[test]
fn invalid_tenant_ids_never_reach_the_filesystem() {
    let (tenants, temp_dir) = tenants();

    assert!(tenants.index_for("../escape").is_err());
    assert!(tenants.index_for("").is_err());
    assert!(!temp_dir.path().join("escape").exists());
}

#[tokio::test]
async fn open_store_sees_writes_from_another_registry() {
    let (server_tenants, temp_dir) = tenants();
    let cli_tenants = LanceTenants::new(temp_dir.path().join("vector_db"), "documents", DIM);

    let cached = server_tenants.index_for("alice").expect("valid tenant");
    assert!(cached.table_info().await.expect("should create table").is_empty());

    let other = cli_tenants.index_for("alice").expect("valid tenant");
    ingest(other.as_ref(), "alice", "guide.txt", &documentation_chunks()[..2]).await;

    let info = cached.table_info().await.expect("should read table");
    assert_eq!(info.row_count, 2);
    assert_eq!(server_tenants.open_stores(), 1);
}
