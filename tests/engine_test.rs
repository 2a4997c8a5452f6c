//! End-to-end behavior of the engine facade.

use std::time::Duration;

use approx::assert_relative_eq;
use proptest::prelude::*;
use vectordb_engine::{
    DistanceMetric, EngineConfig, EngineError, Filter, HnswParams, IndexKind, IndexState,
    IngestItem, Metadata, QueryRequest, RebuildPolicy, VectorEngine,
};

fn config(policy: RebuildPolicy) -> EngineConfig {
    EngineConfig {
        policy,
        // keep the worker out of the way; tests publish with rebuild_now
        rebuild_threshold: 1_000_000,
        rebuild_interval: Duration::from_secs(3600),
        initial_build_wait: Duration::from_millis(10),
        ..EngineConfig::in_memory(DistanceMetric::Euclidean)
    }
}

fn open(policy: RebuildPolicy) -> VectorEngine {
    VectorEngine::open(config(policy)).unwrap()
}

#[test]
fn test_abc_scenario() {
    let engine = VectorEngine::open(EngineConfig {
        dimension: Some(3),
        ..config(RebuildPolicy::FullRebuild)
    })
    .unwrap();
    engine.ingest("a", vec![0.0, 0.0, 0.0], Metadata::new()).unwrap();
    engine.ingest("b", vec![1.0, 0.0, 0.0], Metadata::new()).unwrap();
    engine.ingest("c", vec![10.0, 0.0, 0.0], Metadata::new()).unwrap();
    engine.rebuild_now().unwrap();

    let response = engine.search(vec![0.0, 0.0, 0.0], 2, None).unwrap();
    assert_eq!(response.ids(), vec!["a", "b"]);
    assert_relative_eq!(response.hits[0].distance, 0.0);
    assert_relative_eq!(response.hits[1].distance, 1.0);
    assert_eq!(response.state, IndexState::Ready);
}

#[test]
fn test_k_zero_is_invalid() {
    let engine = open(RebuildPolicy::FullRebuild);
    engine.ingest("a", vec![1.0, 2.0], Metadata::new()).unwrap();
    assert!(matches!(
        engine.search(vec![1.0, 2.0], 0, None),
        Err(EngineError::InvalidK { k: 0 })
    ));
}

#[test]
fn test_search_before_any_ingest_is_empty() {
    let engine = open(RebuildPolicy::FullRebuild);
    let response = engine.search(vec![1.0, 2.0, 3.0], 5, None).unwrap();
    assert!(response.is_empty());
    assert!(!response.ready);
    assert_eq!(response.state, IndexState::Empty);
    assert_eq!(engine.status().state, IndexState::Empty);
}

#[test]
fn test_removed_id_never_returned_after_rebuild() {
    let engine = open(RebuildPolicy::FullRebuild);
    engine.ingest("keep", vec![1.0, 0.0], Metadata::new()).unwrap();
    engine.ingest("drop", vec![0.0, 1.0], Metadata::new()).unwrap();
    engine.rebuild_now().unwrap();

    assert!(engine.remove("drop").unwrap());
    assert!(!engine.remove("drop").unwrap());
    engine.rebuild_now().unwrap();

    for query in [vec![0.0, 1.0], vec![1.0, 0.0], vec![0.5, 0.5]] {
        let response = engine.search(query, 10, None).unwrap();
        assert!(!response.ids().contains(&"drop"));
    }
    assert_eq!(engine.status().snapshot_records, 1);
}

#[test]
fn test_identical_reingest_bumps_version_only() {
    let engine = open(RebuildPolicy::FullRebuild);
    let metadata = Metadata::new().with("lang", "en");
    let v1 = engine.ingest("a", vec![1.0, 0.0], metadata.clone()).unwrap();
    engine.ingest("b", vec![0.0, 1.0], Metadata::new()).unwrap();
    engine.rebuild_now().unwrap();
    let before = engine.search(vec![0.9, 0.1], 2, None).unwrap();

    let v2 = engine.ingest("a", vec![1.0, 0.0], metadata).unwrap();
    assert!(v2 > v1);
    assert_eq!(engine.status().pending_deltas, 0);

    let after = engine.search(vec![0.9, 0.1], 2, None).unwrap();
    assert_eq!(before.ids(), after.ids());
    assert_eq!(before.hits[0].distance, after.hits[0].distance);
    assert_eq!(engine.get("a").unwrap().version, v2);
}

#[test]
fn test_get_and_not_found() {
    let engine = open(RebuildPolicy::FullRebuild);
    engine
        .ingest("a", vec![1.0, 0.0], Metadata::new().with("n", 3i64))
        .unwrap();
    let record = engine.get("a").unwrap();
    assert_eq!(record.vector.as_slice(), &[1.0, 0.0]);
    assert!(matches!(engine.get("zzz"), Err(EngineError::NotFound { .. })));
}

#[test]
fn test_overlay_policy_sees_writes_without_rebuild() {
    let engine = open(RebuildPolicy::IncrementalOverlay);
    engine.ingest("seed", vec![100.0, 100.0], Metadata::new()).unwrap();
    engine.rebuild_now().unwrap();

    for i in 0..20 {
        let v = vec![i as f32, (i * 3 % 7) as f32];
        engine.ingest(&format!("v{}", i), v.clone(), Metadata::new()).unwrap();
        // exact-match recall immediately after ingest
        let response = engine.search(v, 1, None).unwrap();
        assert_eq!(response.ids(), vec![format!("v{}", i).as_str()]);
    }
}

#[test]
fn test_filtered_search() {
    let engine = open(RebuildPolicy::FullRebuild);
    let items = (0..12)
        .map(|i| {
            IngestItem::new(
                format!("doc{:02}", i),
                vec![i as f32, 0.0],
                Metadata::new()
                    .with("lang", if i % 3 == 0 { "fr" } else { "en" })
                    .with("year", 2000 + i as i64),
            )
        })
        .collect();
    engine.ingest_batch(items).unwrap();
    engine.rebuild_now().unwrap();

    let fr = engine
        .query(
            &QueryRequest::new(vec![0.0, 0.0], 3)
                .with_filter(Filter::eq("lang", "fr"))
                .with_overfetch(12),
        )
        .unwrap();
    assert_eq!(fr.ids(), vec!["doc00", "doc03", "doc06"]);

    let recent = engine
        .search(
            vec![0.0, 0.0],
            2,
            Some(Filter::And(vec![
                Filter::Gt("year".to_string(), 2004i64.into()),
                Filter::Not(Box::new(Filter::eq("lang", "fr"))),
            ])),
        )
        .unwrap();
    // k=2 with no over-fetch ranks only doc00 and doc01, neither passes
    assert!(recent.is_empty());
    assert!(recent.ready);
}

#[test]
fn test_rebuild_failure_keeps_serving_previous_snapshot() {
    let engine = VectorEngine::open(EngineConfig {
        max_index_records: Some(2),
        ..config(RebuildPolicy::FullRebuild)
    })
    .unwrap();
    engine.ingest("a", vec![0.0], Metadata::new()).unwrap();
    engine.ingest("b", vec![1.0], Metadata::new()).unwrap();
    engine.rebuild_now().unwrap();

    engine.ingest("c", vec![2.0], Metadata::new()).unwrap();
    let err = engine.rebuild_now().unwrap_err();
    assert!(matches!(err, EngineError::RebuildFailed(_)));

    let status = engine.status();
    assert_eq!(status.state, IndexState::Ready);
    assert_eq!(status.snapshot_records, 2);
    assert!(status.last_rebuild_error.is_some());
    assert!(status.stats.rebuild_failures >= 1);

    let response = engine.search(vec![0.0], 5, None).unwrap();
    assert_eq!(response.ids(), vec!["a", "b"]);
}

#[test]
fn test_hnsw_engine_exact_match() {
    let engine = VectorEngine::open(EngineConfig {
        index: IndexKind::Hnsw(HnswParams::new(8, 64, 64)),
        ..config(RebuildPolicy::FullRebuild)
    })
    .unwrap();
    for i in 0..200 {
        let v = vec![(i % 13) as f32, (i / 13) as f32, (i % 7) as f32];
        engine.ingest(&format!("p{}", i), v, Metadata::new()).unwrap();
    }
    engine.rebuild_now().unwrap();

    let response = engine.search(vec![5.0, 3.0, 2.0], 1, None).unwrap();
    // p44: 44 % 13 = 5, 44 / 13 = 3, 44 % 7 = 2
    assert_eq!(response.ids(), vec!["p44"]);
}

#[test]
fn test_unbounded_k_returns_everything() {
    for index in [IndexKind::Exact, IndexKind::Hnsw(HnswParams::new(8, 64, 64))] {
        for policy in [RebuildPolicy::FullRebuild, RebuildPolicy::IncrementalOverlay] {
            let engine = VectorEngine::open(EngineConfig {
                index,
                ..config(policy)
            })
            .unwrap();
            engine.ingest("a", vec![0.0, 0.0], Metadata::new()).unwrap();
            engine.ingest("b", vec![1.0, 0.0], Metadata::new()).unwrap();
            engine.rebuild_now().unwrap();
            engine.ingest("c", vec![2.0, 0.0], Metadata::new()).unwrap();

            let response = engine.search(vec![0.0, 0.0], usize::MAX, None).unwrap();
            let expected = match policy {
                RebuildPolicy::FullRebuild => vec!["a", "b"],
                RebuildPolicy::IncrementalOverlay => vec!["a", "b", "c"],
            };
            assert_eq!(response.ids(), expected, "{} {:?}", index.name(), policy);

            let request = QueryRequest::new(vec![0.0, 0.0], usize::MAX).with_overfetch(usize::MAX);
            assert_eq!(engine.query(&request).unwrap().ids(), expected);
        }
    }
}

#[test]
fn test_background_initial_build() {
    let engine = VectorEngine::open(EngineConfig {
        initial_build_wait: Duration::from_secs(5),
        ..config(RebuildPolicy::FullRebuild)
    })
    .unwrap();
    engine.ingest("a", vec![1.0, 1.0], Metadata::new()).unwrap();

    // the first ingest kicks the worker; the query waits for it
    let response = engine.search(vec![1.0, 1.0], 1, None).unwrap();
    assert_eq!(response.ids(), vec!["a"]);
    assert!(response.ready);
}

#[test]
fn test_status_counts() {
    let engine = open(RebuildPolicy::FullRebuild);
    engine.ingest("a", vec![1.0], Metadata::new()).unwrap();
    engine.ingest("b", vec![2.0], Metadata::new()).unwrap();
    engine.rebuild_now().unwrap();
    engine.search(vec![1.0], 1, None).unwrap();

    let status = engine.status();
    assert_eq!(status.record_count, 2);
    assert!(status.snapshot_age.is_some());
    assert!(!status.degraded);
    assert_eq!(status.stats.total_ingests, 2);
    assert_eq!(status.stats.total_queries, 1);
    assert_eq!(status.stats.last_rebuild_records, 2);
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn prop_dimension_mismatch_never_mutates(
        stored in 1usize..8,
        offered in 1usize..8,
    ) {
        prop_assume!(stored != offered);
        let engine = open(RebuildPolicy::FullRebuild);
        engine.ingest("base", vec![0.5; stored], Metadata::new()).unwrap();
        let seq_before = engine.get("base").unwrap().version;

        let ingest = engine.ingest("other", vec![0.5; offered], Metadata::new());
        let is_ingest_mismatch = matches!(ingest, Err(EngineError::DimensionMismatch { .. }));
        prop_assert!(is_ingest_mismatch);
        let search = engine.search(vec![0.5; offered], 1, None);
        let is_search_mismatch = matches!(search, Err(EngineError::DimensionMismatch { .. }));
        prop_assert!(is_search_mismatch);

        prop_assert_eq!(engine.status().record_count, 1);
        prop_assert!(engine.get("other").is_err());
        let next = engine.ingest("base", vec![0.25; stored], Metadata::new()).unwrap();
        prop_assert_eq!(next, seq_before + 1);
    }
}
