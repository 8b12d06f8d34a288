use embeddings_client::{EmbeddingProvider, MockEmbedder};

use super::super::search::search_vector;
use super::test_support::WorkspaceHarness;

const FRUIT_NOTE: &str = "kiwi is a small green fruit\n";
const ROCK_NOTE: &str = "granite is an igneous rock\n";
const WEATHER_NOTE: &str = "yesterday it rained all afternoon\n";

fn seeded(prefix: &str) -> (WorkspaceHarness, MockEmbedder) {
    let harness = WorkspaceHarness::new(prefix);
    harness.write_file("memory/fruit.md", FRUIT_NOTE);
    harness.write_file("memory/rock.md", ROCK_NOTE);
    harness.write_file("memory/weather.md", WEATHER_NOTE);

    (harness, MockEmbedder::with_dims("mock-model", 16))
}

/// The query vector for a note's exact chunk content: cosine 1 against that
/// chunk under the deterministic mock.
fn query_for(provider: &MockEmbedder, note: &str) -> Vec<f32> {
    provider.embed_query(note).expect("mock embedding succeeds")
}

#[test]
fn given_native_vector_search_when_querying_then_the_matching_note_ranks_first() {
    let (harness, provider) = seeded("mem-search-native");
    let mut store = harness.open_store();
    harness.reindex(&mut store, Some(&provider));
    assert!(store
        .vector_search_ready()
        .expect("readiness check succeeds"));

    let query = query_for(&provider, FRUIT_NOTE);
    let hits = search_vector(&mut store, &query, 3, Some("mock-model"), 240)
        .expect("search should succeed");

    assert_eq!(hits.len(), 3);
    assert_eq!(hits[0].file_path, "memory/fruit.md");
    assert!(hits[0].score > 0.999, "exact match scores ~1, got {}", hits[0].score);
    assert!(hits[0].score >= hits[1].score);
    assert!(hits[1].score >= hits[2].score);
    assert_eq!(hits[0].score, hits[0].vector_score);
}

#[test]
fn given_missing_vector_table_when_querying_then_the_fallback_ranks_identically() {
    let (harness, provider) = seeded("mem-search-fallback");
    let mut store = harness.open_store();
    harness.reindex(&mut store, Some(&provider));

    let query = query_for(&provider, FRUIT_NOTE);
    let native = search_vector(&mut store, &query, 2, Some("mock-model"), 240)
        .expect("native search should succeed");

    store.drop_vector_table().expect("drop should succeed");
    assert!(!store.vector_search_ready().expect("readiness check succeeds"));
    let fallback = search_vector(&mut store, &query, 2, Some("mock-model"), 240)
        .expect("fallback search should succeed");

    assert_eq!(fallback.len(), 2);
    assert_eq!(native[0].file_path, fallback[0].file_path);
    assert!((native[0].score - fallback[0].score).abs() < 1e-4);
}

#[test]
fn given_empty_query_or_zero_limit_when_searching_then_no_hits_are_returned() {
    let (harness, provider) = seeded("mem-search-empty");
    let mut store = harness.open_store();
    harness.reindex(&mut store, Some(&provider));

    let query = query_for(&provider, FRUIT_NOTE);
    assert!(search_vector(&mut store, &[], 5, None, 240)
        .expect("search should succeed")
        .is_empty());
    assert!(search_vector(&mut store, &query, 0, None, 240)
        .expect("search should succeed")
        .is_empty());
}

#[test]
fn given_limit_smaller_than_corpus_when_searching_then_only_top_k_return() {
    let (harness, provider) = seeded("mem-search-limit");
    let mut store = harness.open_store();
    harness.reindex(&mut store, Some(&provider));

    let query = query_for(&provider, ROCK_NOTE);
    let hits = search_vector(&mut store, &query, 1, Some("mock-model"), 240)
        .expect("search should succeed");

    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].file_path, "memory/rock.md");
}

#[test]
fn given_snippet_budget_when_searching_then_snippets_are_prefix_truncated() {
    let (harness, provider) = seeded("mem-search-snippet");
    let mut store = harness.open_store();
    harness.reindex(&mut store, Some(&provider));

    let query = query_for(&provider, WEATHER_NOTE);
    let hits = search_vector(&mut store, &query, 1, Some("mock-model"), 9)
        .expect("search should succeed");

    assert_eq!(hits[0].snippet, "yesterday");
}

#[test]
fn given_dimension_mismatch_when_falling_back_then_affected_chunks_score_zero() {
    let (harness, provider) = seeded("mem-search-dims");
    let mut store = harness.open_store();
    harness.reindex(&mut store, Some(&provider));
    store.drop_vector_table().expect("drop should succeed");

    // 8-dim query against 16-dim stored embeddings.
    let short_query = vec![1.0f32; 8];
    let hits = search_vector(&mut store, &short_query, 10, Some("mock-model"), 240)
        .expect("fallback search should succeed");

    assert_eq!(hits.len(), 3);
    assert!(hits.iter().all(|hit| hit.score == 0.0));
}
