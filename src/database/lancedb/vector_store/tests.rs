use super::*;
use serde_json::json;
use tempfile::TempDir;

const DIM: usize = 4;

fn create_test_store() -> (VectorStore, TempDir) {
    let temp_dir = TempDir::new().expect("should create temp dir");
    let store = VectorStore::new(temp_dir.path().join("tenant"), "documents", DIM);
    (store, temp_dir)
}

fn metadata_for(count: usize) -> Vec<serde_json::Value> {
    (0..count)
        .map(|i| json!({"chunk_index": i, "user_id": "tenant", "total_chunks": count}))
        .collect()
}

fn strings(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| (*s).to_string()).collect()
}

async fn insert_basis_file(store: &VectorStore, file_name: &str) {
    let chunks = strings(&["alpha", "beta", "almost alpha"]);
    let vectors = vec![
        vec![1.0, 0.0, 0.0, 0.0],
        vec![0.0, 1.0, 0.0, 0.0],
        vec![0.9, 0.1, 0.0, 0.0],
    ];
    store
        .insert(&chunks, &vectors, &metadata_for(3), file_name, "txt")
        .await
        .expect("should insert chunks");
}

#[tokio::test]
async fn lazily_transitions_to_table_ready() {
    let (store, _temp_dir) = create_test_store();
    assert_eq!(store.status().await, StoreStatus::Uninitialized);
    assert!(!store.db_path().exists());

    store.connect().await.expect("should connect");
    assert_eq!(store.status().await, StoreStatus::Connected);
    assert!(store.db_path().exists());

    let info = store.table_info().await.expect("should read table info");
    assert_eq!(store.status().await, StoreStatus::TableReady);
    assert_eq!(info.row_count, 0);
    assert_eq!(info.table_name, "documents");
    assert!(info.schema.contains("embedding"));
    assert!(info.schema.contains("chunk_index: Int32"));
}

#[tokio::test]
async fn mismatched_lengths_are_a_validation_error() {
    let (store, _temp_dir) = create_test_store();

    let result = store
        .insert(
            &strings(&["one", "two"]),
            &[vec![1.0, 0.0, 0.0, 0.0]],
            &metadata_for(2),
            "a.txt",
            "txt",
        )
        .await;

    assert!(matches!(result, Err(RagError::Validation(_))));
    assert_eq!(store.status().await, StoreStatus::Uninitialized);
}

#[tokio::test]
async fn insert_increases_row_count() {
    let (store, _temp_dir) = create_test_store();

    insert_basis_file(&store, "basis.txt").await;

    assert_eq!(store.count_rows().await.expect("should count rows"), 3);
}

#[tokio::test]
async fn empty_insert_is_a_no_op() {
    let (store, _temp_dir) = create_test_store();

    let inserted = store
        .insert(&[], &[], &[], "empty.txt", "txt")
        .await
        .expect("should accept empty insert");

    assert_eq!(inserted, 0);
}

#[tokio::test]
async fn search_orders_by_descending_similarity() {
    let (store, _temp_dir) = create_test_store();
    insert_basis_file(&store, "basis.txt").await;

    let hits = store
        .search_similar(&[1.0, 0.0, 0.0, 0.0], 10, 0.0)
        .await
        .expect("search should succeed");

    assert_eq!(hits.len(), 3);
    assert_eq!(hits[0].text, "alpha");
    assert_eq!(hits[1].text, "almost alpha");
    assert_eq!(hits[2].text, "beta");
    for pair in hits.windows(2) {
        assert!(pair[0].similarity_score >= pair[1].similarity_score);
    }
    for hit in &hits {
        assert!((hit.similarity_score - (1.0 - hit.distance)).abs() < 1e-6);
    }
}

#[tokio::test]
async fn threshold_filters_only_when_positive() {
    let (store, _temp_dir) = create_test_store();
    insert_basis_file(&store, "basis.txt").await;
    let query = [1.0, 0.0, 0.0, 0.0];

    let filtered = store
        .search_similar(&query, 10, 0.5)
        .await
        .expect("search should succeed");
    let unfiltered = store
        .search_similar(&query, 10, 0.0)
        .await
        .expect("search should succeed");

    assert_eq!(filtered.len(), 2);
    assert!(filtered.iter().all(|hit| hit.similarity_score >= 0.5));
    assert_eq!(unfiltered.len(), 3);
}

#[tokio::test]
async fn threshold_one_keeps_only_exact_matches() {
    let (store, _temp_dir) = create_test_store();
    insert_basis_file(&store, "basis.txt").await;

    let exact = store
        .search_similar(&[1.0, 0.0, 0.0, 0.0], 10, 1.0)
        .await
        .expect("search should succeed");
    let none = store
        .search_similar(&[0.0, 0.0, 1.0, 0.0], 10, 1.0)
        .await
        .expect("search should succeed");

    assert_eq!(exact.len(), 1);
    assert_eq!(exact[0].text, "alpha");
    assert_eq!(exact[0].similarity_score, 1.0);
    assert!(none.is_empty());
}

#[tokio::test]
async fn search_respects_limit() {
    let (store, _temp_dir) = create_test_store();
    insert_basis_file(&store, "basis.txt").await;

    let hits = store
        .search_similar(&[1.0, 0.0, 0.0, 0.0], 1, 0.0)
        .await
        .expect("search should succeed");

    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].text, "alpha");
}

#[tokio::test]
async fn short_query_vector_is_normalized() {
    let (store, _temp_dir) = create_test_store();
    insert_basis_file(&store, "basis.txt").await;

    let hits = store
        .search_similar(&[0.0, 1.0], 1, 0.0)
        .await
        .expect("search with short vector should succeed");

    assert_eq!(hits[0].text, "beta");
}

#[tokio::test]
async fn long_query_vector_is_truncated() {
    let (store, _temp_dir) = create_test_store();
    insert_basis_file(&store, "basis.txt").await;

    let hits = store
        .search_similar(&[0.0, 1.0, 0.0, 0.0, 7.0, 7.0], 1, 0.0)
        .await
        .expect("search with long vector should succeed");

    assert_eq!(hits[0].text, "beta");
    assert_eq!(hits[0].similarity_score, 1.0);
}

#[tokio::test]
async fn long_vectors_are_truncated_on_insert() {
    let (store, _temp_dir) = create_test_store();

    let inserted = store
        .insert(
            &strings(&["wide"]),
            &[vec![0.0, 0.0, 1.0, 0.0, 9.0, 9.0]],
            &metadata_for(1),
            "wide.txt",
            "txt",
        )
        .await
        .expect("should insert a vector longer than the table dimension");
    assert_eq!(inserted, 1);

    let hits = store
        .search_similar(&[0.0, 0.0, 1.0, 0.0], 1, 1.0)
        .await
        .expect("search should succeed");
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].text, "wide");
}

#[tokio::test]
async fn hits_carry_file_fields_and_metadata() {
    let (store, _temp_dir) = create_test_store();
    insert_basis_file(&store, "basis.txt").await;

    let hits = store
        .search_similar(&[0.0, 1.0, 0.0, 0.0], 1, 0.0)
        .await
        .expect("search should succeed");

    let hit = &hits[0];
    assert_eq!(hit.file_name, "basis.txt");
    assert_eq!(hit.file_type, "txt");
    assert_eq!(hit.chunk_index, 1);
    assert_eq!(hit.metadata["user_id"], "tenant");
    assert_eq!(hit.metadata["total_chunks"], 3);
    assert!(hit.created_at <= Utc::now());
}

#[tokio::test]
async fn delete_by_file_removes_only_that_file() {
    let (store, _temp_dir) = create_test_store();
    insert_basis_file(&store, "first.txt").await;
    insert_basis_file(&store, "second.txt").await;

    let removed = store
        .delete_by_file("first.txt")
        .await
        .expect("should delete file");

    assert_eq!(removed, 3);
    assert_eq!(store.count_rows().await.expect("should count rows"), 3);
    let missing = store
        .delete_by_file("first.txt")
        .await
        .expect("should delete nothing");
    assert_eq!(missing, 0);
}

#[tokio::test]
async fn delete_by_file_handles_quotes_in_names() {
    let (store, _temp_dir) = create_test_store();
    insert_basis_file(&store, "bob's notes.txt").await;

    let removed = store
        .delete_by_file("bob's notes.txt")
        .await
        .expect("should delete quoted file name");

    assert_eq!(removed, 3);
}

#[tokio::test]
async fn files_summary_groups_by_file_name() {
    let (store, _temp_dir) = create_test_store();
    insert_basis_file(&store, "b.txt").await;
    store
        .insert(
            &strings(&["only chunk"]),
            &[vec![0.0, 0.0, 1.0, 0.0]],
            &metadata_for(1),
            "a.pdf",
            "pdf",
        )
        .await
        .expect("should insert chunk");

    let summary = store.files_summary().await.expect("should summarize files");

    assert_eq!(summary.total_files, 2);
    assert_eq!(summary.total_chunks, 4);
    assert_eq!(summary.files[0].file_name, "a.pdf");
    assert_eq!(summary.files[0].file_type, "pdf");
    assert_eq!(summary.files[0].chunk_count, 1);
    assert_eq!(summary.files[1].file_name, "b.txt");
    assert_eq!(summary.files[1].chunk_count, 3);
    assert!(summary.files[1].created_at.is_some());
}

#[tokio::test]
async fn files_summary_of_empty_table() {
    let (store, _temp_dir) = create_test_store();

    let summary = store.files_summary().await.expect("should summarize files");

    assert_eq!(summary, FilesSummary::default());
}

#[tokio::test]
async fn reopening_with_other_dimension_fails() {
    let (store, temp_dir) = create_test_store();
    insert_basis_file(&store, "basis.txt").await;

    let reopened = VectorStore::new(temp_dir.path().join("tenant"), "documents", DIM + 4);
    let result = reopened.table_info().await;

    assert!(matches!(result, Err(RagError::Database(_))));
}

#[tokio::test]
async fn reopening_with_same_dimension_sees_existing_rows() {
    let (store, temp_dir) = create_test_store();
    insert_basis_file(&store, "basis.txt").await;

    let reopened = VectorStore::new(temp_dir.path().join("tenant"), "documents", DIM);
    let info = reopened.table_info().await.expect("should reopen table");

    assert_eq!(info.row_count, 3);
}

#[test]
fn literals_are_escaped() {
    assert_eq!(escape_literal("it's"), "it''s");
    assert_eq!(escape_literal("plain.txt"), "plain.txt");
}
