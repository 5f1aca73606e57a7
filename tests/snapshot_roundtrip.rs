//! Persist → reload → search must equal search before persist, and an
//! incompatible snapshot must be discarded rather than silently mixed.

mod common;

use common::{core_config, fixture_registry, lexical_stack};
use kpath::{build_stack, BackendKind, SearchMode, SearchRequest};

#[tokio::test(flavor = "multi_thread")]
async fn reloaded_snapshot_reproduces_search_results() {
    let fixture = lexical_stack();
    fixture.stack.manager.build_all().await.expect("build");

    let req = SearchRequest::new("customer payment records", SearchMode::AgentsAndTools)
        .expect("valid query");
    let before = fixture
        .stack
        .planner
        .search(&req, None)
        .await
        .expect("search before reload");

    // Fresh stack over the same directories: the lexical artifacts and the
    // index snapshots both reload from disk.
    let reloaded = build_stack(&fixture.core, fixture.registry.clone()).expect("stack rebuilds");
    reloaded
        .manager
        .load_snapshots()
        .expect("snapshots load cleanly");

    let after = reloaded
        .planner
        .search(&req, None)
        .await
        .expect("search after reload");

    assert_eq!(before.len(), after.len());
    for (a, b) in before.iter().zip(&after) {
        assert_eq!(a.service_id, b.service_id);
        assert_eq!(a.rank, b.rank);
        assert!((a.score - b.score).abs() < 1e-6);
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn reloaded_manager_reports_built_status() {
    let fixture = lexical_stack();
    fixture.stack.manager.build_all().await.expect("build");

    let reloaded = build_stack(&fixture.core, fixture.registry.clone()).expect("stack rebuilds");
    reloaded.manager.load_snapshots().expect("snapshots load");

    let status = reloaded.manager.status();
    assert!(status.built);
    assert_eq!(status.state, "ready");
    assert_eq!(status.svc_count, 6);
    assert_eq!(status.tool_count, 7);
    assert!(status.last_built_at.is_some());
}

#[tokio::test(flavor = "multi_thread")]
async fn snapshot_from_other_backend_is_rejected() {
    let fixture = lexical_stack();
    fixture.stack.manager.build_all().await.expect("build");

    // Same directories, different embedding backend: the recorded model
    // identifier no longer matches, so the load must fail and leave the
    // manager unready (the server would schedule a rebuild here).
    let mut hashed_core = fixture.core.clone();
    hashed_core.backend = BackendKind::Hashed;
    let other = build_stack(&hashed_core, fixture.registry.clone()).expect("stack builds");

    assert!(matches!(
        other.manager.load_snapshots(),
        Err(kpath::SearchError::ModelMismatch(_))
    ));
    assert!(!other.manager.status().built);
}

#[tokio::test(flavor = "multi_thread")]
async fn missing_snapshot_requires_rebuild() {
    let dir = tempfile::TempDir::new().unwrap();
    let core = core_config(&dir, BackendKind::Hashed);
    let stack = build_stack(&core, fixture_registry()).expect("stack builds");

    assert!(matches!(
        stack.manager.load_snapshots(),
        Err(kpath::SearchError::IndexNotReady)
    ));

    // The documented recovery path: a full build makes the stack ready and
    // writes fresh snapshots that a subsequent load accepts.
    stack.manager.build_all().await.expect("build");
    let reloaded = build_stack(&core, fixture_registry()).expect("stack rebuilds");
    reloaded.manager.load_snapshots().expect("snapshots load");
    assert!(reloaded.manager.status().built);
}
