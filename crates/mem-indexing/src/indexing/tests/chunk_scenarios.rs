use mem_storage::ChunkParams;

use super::test_support::WorkspaceHarness;

fn params(tokens: u32, overlap: u32, min_chars: u32, chars_per_token: u32) -> ChunkParams {
    ChunkParams {
        tokens,
        overlap,
        min_chars,
        chars_per_token,
    }
}

#[test]
fn given_overlap_settings_when_indexing_then_consecutive_chunks_share_tail_lines() {
    // max_chars = 40, overlap_chars = 20.
    let harness = WorkspaceHarness::with_chunking("mem-chunk-overlap", params(10, 5, 32, 4));
    let fruits = [
        "apple",
        "banana",
        "cherry",
        "durian",
        "elder",
        "fig",
        "grape",
        "honeydew",
    ];
    let body = fruits
        .iter()
        .enumerate()
        .map(|(index, fruit)| format!("line-{}: {fruit}", index + 1))
        .collect::<Vec<_>>()
        .join("\n");
    harness.write_file("memory/fruit.md", &body);

    let mut store = harness.open_store();
    harness.reindex(&mut store, None);

    let rows = harness.chunk_rows_for(&store, "memory/fruit.md");
    assert!(rows.len() >= 2, "expected overlapping chunks, got {rows:?}");

    for pair in rows.windows(2) {
        let last_line = pair[0]
            .content
            .lines()
            .last()
            .expect("chunk content is never empty");
        assert!(
            pair[1].content.contains(last_line),
            "chunk {:?} should repeat {last_line:?}",
            pair[1].content
        );
        assert!(pair[1].line_start <= pair[0].line_end);
    }
}

#[test]
fn given_a_long_single_line_when_indexing_then_every_chunk_respects_the_char_budget() {
    // max_chars = 32.
    let harness = WorkspaceHarness::with_chunking("mem-chunk-longline", params(5, 0, 32, 4));
    harness.write_file("memory/wall.md", &"a".repeat(65));

    let mut store = harness.open_store();
    harness.reindex(&mut store, None);

    let rows = harness.chunk_rows_for(&store, "memory/wall.md");
    assert!(rows.len() > 1, "a 65-char line must split at 32 chars");
    for row in &rows {
        assert!(row.content.chars().count() <= 32, "oversized: {row:?}");
        assert_eq!(row.line_start, 1);
        assert_eq!(row.line_end, 1);
    }
}

#[test]
fn given_identical_inputs_when_reindexing_then_chunk_ids_are_stable() {
    let harness = WorkspaceHarness::new("mem-chunk-stable");
    harness.write_file("MEMORY.md", "alpha\nbeta\ngamma\n");
    harness.write_file("memory/log.md", "first entry\nsecond entry\n");

    let mut store = harness.open_store();
    harness.reindex(&mut store, None);
    let first: Vec<String> = harness
        .chunk_rows_for(&store, "memory/log.md")
        .into_iter()
        .map(|row| row.id)
        .collect();

    harness.reindex(&mut store, None);
    let second: Vec<String> = harness
        .chunk_rows_for(&store, "memory/log.md")
        .into_iter()
        .map(|row| row.id)
        .collect();

    assert!(!first.is_empty());
    assert_eq!(first, second);
}

#[test]
fn given_indexed_file_when_inspecting_rows_then_line_ranges_are_one_based_and_ordered() {
    let harness = WorkspaceHarness::with_chunking("mem-chunk-lines", params(8, 0, 1, 4));
    let body = (1..=9)
        .map(|index| format!("row-{index}-aaaaaaaaaaaaaaaaaaaa"))
        .collect::<Vec<_>>()
        .join("\n");
    harness.write_file("memory/rows.md", &body);

    let mut store = harness.open_store();
    harness.reindex(&mut store, None);

    let rows = harness.chunk_rows_for(&store, "memory/rows.md");
    assert!(!rows.is_empty());
    for row in &rows {
        assert!(row.line_start >= 1);
        assert!(row.line_start <= row.line_end);
        assert_eq!(row.model, "", "no provider means an empty model column");
        assert_eq!(row.embedding_json, "[]");
    }
}
