use super::test_support::WorkspaceHarness;

#[test]
fn given_markdown_outside_the_memory_scope_when_reindexing_then_it_is_not_indexed() {
    let harness = WorkspaceHarness::new("mem-scope-outside");
    harness.write_file("MEMORY.md", "alpha\n");
    harness.write_file("memory/2026-01-01.md", "# 2026-01-01\n\nkiwi\n");
    harness.write_file("notes.md", "SHOULD_NOT_BE_INDEXED secret-phrase\n");

    let mut store = harness.open_store();
    harness.reindex(&mut store, None);

    assert_eq!(
        harness.indexed_paths(&store),
        vec!["MEMORY.md", "memory/2026-01-01.md"]
    );
    let leaked = harness.count(
        &store,
        "SELECT COUNT(*) FROM chunks WHERE content LIKE '%secret-phrase%'",
    );
    assert_eq!(leaked, 0, "out-of-scope file content must not be indexed");
}

#[test]
fn given_nested_memory_files_when_reindexing_then_descendants_are_indexed() {
    let harness = WorkspaceHarness::new("mem-scope-nested");
    harness.write_file("memory/projects/engine.md", "turbine notes\n");
    harness.write_file("memory/projects/archive/old.md", "legacy notes\n");
    harness.write_file("memory/projects/readme.txt", "not markdown\n");

    let mut store = harness.open_store();
    harness.reindex(&mut store, None);

    assert_eq!(
        harness.indexed_paths(&store),
        vec![
            "memory/projects/archive/old.md",
            "memory/projects/engine.md"
        ]
    );
}

#[test]
fn given_missing_long_memory_file_when_reindexing_then_only_the_memory_dir_is_indexed() {
    let harness = WorkspaceHarness::new("mem-scope-no-long");
    harness.write_file("memory/a.md", "short note\n");

    let mut store = harness.open_store();
    harness.reindex(&mut store, None);

    assert_eq!(harness.indexed_paths(&store), vec!["memory/a.md"]);
}

#[test]
fn given_empty_file_when_reindexing_then_no_chunk_rows_are_written() {
    let harness = WorkspaceHarness::new("mem-scope-empty");
    harness.write_file("MEMORY.md", "");
    harness.write_file("memory/blank.md", "\n\n   \n");

    let mut store = harness.open_store();
    harness.reindex(&mut store, None);

    assert_eq!(harness.count(&store, "SELECT COUNT(*) FROM chunks"), 0);
    assert_eq!(harness.vector_row_count(&store), 0);
    // Both files are still tracked so deletions are noticed later.
    assert_eq!(harness.count(&store, "SELECT COUNT(*) FROM files"), 2);
}
