use super::{cube, init_logging, signal_of, uniform_events};
use crate::api::{CancellationToken, EventWorkspace};
use crate::core::common::{BoxId, MdStoreError};
use crate::core::config::WorkspaceConfig;
use crate::core::dimension::Dimension;
use crate::core::event::Event;
use crate::core::geometry::Extents;
use crate::core::storage::engine::{DiskBackend, InMemoryDiskBackend};
use approx::assert_relative_eq;
use std::sync::Arc;

/// Backend that cancels a token the first time a block is written to it.
#[derive(Debug, Default)]
struct CancelOnWrite {
    inner: InMemoryDiskBackend,
    token: CancellationToken,
}

impl DiskBackend for CancelOnWrite {
    fn allocate(&self, size: u64) -> Result<u64, MdStoreError> {
        self.inner.allocate(size)
    }

    fn write(&self, offset: u64, bytes: &[u8]) -> Result<(), MdStoreError> {
        self.token.cancel();
        self.inner.write(offset, bytes)
    }

    fn read(&self, offset: u64, len: u64) -> Result<Vec<u8>, MdStoreError> {
        self.inner.read(offset, len)
    }

    fn free(&self, offset: u64) -> Result<(), MdStoreError> {
        self.inner.free(offset)
    }

    fn bytes_in_use(&self) -> u64 {
        self.inner.bytes_in_use()
    }

    fn describe(&self) -> String {
        "cancel-on-write test backend".to_string()
    }
}

fn square_workspace(threshold: usize, max_depth: u32) -> EventWorkspace {
    init_logging();
    EventWorkspace::create(2, cube(2, 10.0), threshold, 2, max_depth).unwrap()
}

fn leaf_counts(ws: &EventWorkspace) -> Vec<(u32, u64)> {
    ws.leaf_ids()
        .unwrap()
        .into_iter()
        .map(|id| {
            let summary = ws.box_summary(id).unwrap();
            (summary.depth, summary.n_points)
        })
        .collect()
}

#[test]
fn test_create_rejects_bad_dimensionality() {
    init_logging();
    assert!(matches!(
        EventWorkspace::create(0, Vec::new(), 10, 2, 5),
        Err(MdStoreError::Dimensionality { requested: 0, max: 9 })
    ));
    assert!(matches!(
        EventWorkspace::create(10, cube(9, 1.0), 10, 2, 5),
        Err(MdStoreError::Dimensionality { requested: 10, .. })
    ));
    assert!(EventWorkspace::create(9, cube(9, 1.0), 10, 2, 5).is_ok());
}

#[test]
fn test_create_rejects_bad_configuration() {
    init_logging();
    assert!(matches!(
        EventWorkspace::create(3, cube(2, 1.0), 10, 2, 5),
        Err(MdStoreError::Configuration(_))
    ));
    assert!(matches!(
        EventWorkspace::create(2, cube(2, 1.0), 10, 1, 5),
        Err(MdStoreError::Configuration(_))
    ));
    assert!(matches!(
        EventWorkspace::create(2, cube(2, 1.0), 0, 2, 5),
        Err(MdStoreError::Configuration(_))
    ));
    let inverted = vec![Dimension::new("x", 1.0, 0.0, 10)];
    assert!(matches!(
        EventWorkspace::create(1, inverted, 10, 2, 5),
        Err(MdStoreError::Configuration(_))
    ));
}

#[test]
fn test_add_events_rejects_invalid_events() {
    let ws = square_workspace(100, 5);
    let batch = vec![
        Event::new(&[1.0, 1.0], 1.0, 1.0).unwrap(),
        Event::new(&[10.0, 1.0], 1.0, 1.0).unwrap(), // upper bound is exclusive
        Event::new(&[-0.5, 1.0], 1.0, 1.0).unwrap(),
        Event::new(&[f64::NAN, 1.0], 1.0, 1.0).unwrap(),
        Event::new(&[1.0, 1.0, 1.0], 1.0, 1.0).unwrap(),
        Event::new(&[0.0, 9.999], 2.0, 1.0).unwrap(),
    ];
    assert_eq!(ws.add_events(&batch).unwrap(), 2);
    assert_eq!(ws.n_points().unwrap(), 2);
    assert_eq!(ws.stats().unwrap().rejected_events, 4);
    assert_relative_eq!(ws.total_signal().unwrap(), 3.0);
    assert_relative_eq!(ws.total_error_squared().unwrap(), 2.0);
}

#[test]
fn test_split_all_conserves_signal_and_bounds_leaves() {
    let ws = square_workspace(50, 8);
    let events = uniform_events(5000, 7, ws.dimensions());
    assert_eq!(ws.add_events(&events).unwrap(), 5000);
    let before = ws.total_signal().unwrap();

    let splits = ws.split_all_if_needed().unwrap();
    assert!(splits > 0);
    assert_relative_eq!(ws.total_signal().unwrap(), before);
    assert_relative_eq!(before, signal_of(&events));

    let leaf_signal: f64 =
        ws.leaf_ids().unwrap().iter().map(|&id| ws.box_summary(id).unwrap().signal).sum();
    assert_relative_eq!(leaf_signal, before, max_relative = 1e-9);

    for (depth, count) in leaf_counts(&ws) {
        assert!(count <= 50 || depth == 8, "leaf at depth {depth} holds {count}");
    }
    let report = ws.check_invariants().unwrap();
    assert!(report.is_ok(), "{:?}", report.violations);
}

#[test]
fn test_split_all_is_idempotent() {
    let ws = square_workspace(20, 6);
    ws.add_events(&uniform_events(1000, 11, ws.dimensions())).unwrap();
    ws.split_all_if_needed().unwrap();

    let ids_before = ws.controller().allocated_ids();
    let boxes_before = ws.n_boxes();
    let leaves_before = leaf_counts(&ws);

    assert_eq!(ws.split_all_if_needed().unwrap(), 0);
    assert_eq!(ws.controller().allocated_ids(), ids_before);
    assert_eq!(ws.n_boxes(), boxes_before);
    assert_eq!(leaf_counts(&ws), leaves_before);
}

#[test]
fn test_boundary_events_go_to_upper_slab() {
    let ws = square_workspace(1, 1);
    let batch = vec![
        Event::new(&[5.0, 5.0], 1.0, 1.0).unwrap(),
        Event::new(&[5.0, 0.0], 2.0, 1.0).unwrap(),
        Event::new(&[0.0, 5.0], 4.0, 1.0).unwrap(),
    ];
    ws.add_events(&batch).unwrap();
    ws.split_all_if_needed().unwrap();

    let root = ws.box_summary(BoxId::ROOT).unwrap();
    assert_eq!(root.children, vec![BoxId(1), BoxId(2), BoxId(3), BoxId(4)]);
    let signals: Vec<f64> = root.children.iter().map(|&id| ws.box_summary(id).unwrap().signal).collect();
    assert_eq!(signals, vec![0.0, 2.0, 4.0, 1.0]);
}

#[test]
fn test_region_query_matches_intersecting_boxes() {
    let ws = square_workspace(4, 1);
    let batch: Vec<Event> = [[1.0, 1.0], [6.0, 1.0], [1.0, 6.0], [6.0, 6.0], [2.0, 2.0]]
        .iter()
        .map(|p| Event::new(p, 1.0, 1.0).unwrap())
        .collect();
    ws.add_events(&batch).unwrap();
    ws.split_all_if_needed().unwrap();

    let query = |ranges: &[(f64, f64)]| ws.get_boxes_in_region(&Extents::from_ranges(ranges)).unwrap();
    assert_eq!(query(&[(0.0, 4.0), (0.0, 4.0)]), vec![BoxId(0), BoxId(1)]);
    assert_eq!(
        query(&[(4.0, 6.0), (4.0, 6.0)]),
        vec![BoxId(0), BoxId(1), BoxId(2), BoxId(3), BoxId(4)]
    );
    // The open upper face of child 1 at x = 5 does not touch a region starting there.
    assert_eq!(query(&[(5.0, 6.0), (0.0, 1.0)]), vec![BoxId(0), BoxId(2)]);
    // A closed region touching the lower face does.
    assert_eq!(query(&[(-1.0, 0.0), (-1.0, 0.0)]), vec![BoxId(0), BoxId(1)]);
    assert!(query(&[(20.0, 30.0), (0.0, 1.0)]).is_empty());

    assert!(matches!(
        ws.get_boxes_in_region(&Extents::from_ranges(&[(0.0, 1.0)])),
        Err(MdStoreError::InvalidInput { .. })
    ));
}

#[test]
fn test_depth_limit_is_soft() {
    let ws = square_workspace(4, 0);
    ws.add_events(&uniform_events(10, 1, ws.dimensions())).unwrap();
    assert_eq!(ws.split_all_if_needed().unwrap(), 0);

    let root = ws.box_summary(BoxId::ROOT).unwrap();
    assert!(root.is_leaf);
    assert!(root.at_max_depth);
    assert_eq!(root.n_points, 10);
    assert_eq!(ws.stats().unwrap().leaves_at_max_depth, 1);
}

#[test]
fn test_events_iteration_covers_subtree() {
    let ws = square_workspace(10, 6);
    let events = uniform_events(400, 3, ws.dimensions());
    ws.add_events(&events).unwrap();
    ws.split_all_if_needed().unwrap();

    let all = ws.events(BoxId::ROOT).unwrap();
    let collected = all.to_vec().unwrap();
    assert_eq!(collected.len(), 400);
    assert_relative_eq!(signal_of(&collected), signal_of(&events));
    // Restartable.
    assert_eq!(all.iter().count(), 400);

    let first_child = ws.box_summary(BoxId::ROOT).unwrap().children[0];
    let child = ws.box_summary(first_child).unwrap();
    let below: Vec<Event> = ws.events(first_child).unwrap().to_vec().unwrap();
    assert_eq!(below.len() as u64, child.n_points);
    assert!(below.iter().all(|e| child.extents.contains_point(e.coords())));

    assert!(matches!(ws.events(BoxId(100_000)), Err(MdStoreError::BoxNotFound(_))));
}

#[test]
fn test_split_on_insert_keeps_leaves_small() {
    init_logging();
    let config = WorkspaceConfig::builder()
        .split_threshold(16)
        .max_depth(10)
        .split_on_insert(true)
        .build()
        .unwrap();
    let ws = EventWorkspace::with_config(cube(3, 1.0), config, Arc::new(InMemoryDiskBackend::new())).unwrap();
    ws.add_events(&uniform_events(2000, 5, ws.dimensions())).unwrap();

    assert!(ws.n_boxes() > 1);
    for (depth, count) in leaf_counts(&ws) {
        assert!(count <= 16 || depth == 10);
    }
    assert_eq!(ws.split_all_if_needed().unwrap(), 0);
    assert!(ws.check_invariants().unwrap().is_ok());
}

#[test]
fn test_cancelled_insertion_reports_committed() {
    let ws = square_workspace(100, 5);
    let events = uniform_events(100, 9, ws.dimensions());
    let token = CancellationToken::new();
    assert_eq!(ws.add_events_cancellable(&events, &token).unwrap(), 100);

    token.cancel();
    match ws.add_events_cancellable(&events, &token) {
        Err(MdStoreError::Cancelled { committed }) => assert_eq!(committed, 0),
        other => panic!("expected cancellation, got {other:?}"),
    }
    assert_eq!(ws.n_points().unwrap(), 100);
}

#[test]
fn test_cancellation_inside_a_batch_keeps_committed_prefix() {
    init_logging();
    let config = WorkspaceConfig::builder()
        .split_threshold(1000)
        .max_resident_events(Some(5))
        .cancellation_check_interval(10)
        .build()
        .unwrap();
    let backend = Arc::new(CancelOnWrite::default());
    let token = backend.token.clone();
    let ws = EventWorkspace::with_config(cube(2, 1.0), config, Arc::clone(&backend) as Arc<dyn DiskBackend>)
        .unwrap();
    let events = uniform_events(100, 13, ws.dimensions());

    // The check at event 10 evicts the root, which cancels; the check at 20 observes it.
    let committed = match ws.add_events_cancellable(&events, &token) {
        Err(MdStoreError::Cancelled { committed }) => committed,
        other => panic!("expected cancellation, got {other:?}"),
    };
    assert_eq!(committed, 20);
    let stats = ws.stats().unwrap();
    assert_eq!(stats.total_events, committed as u64);
    assert_eq!(ws.n_points().unwrap(), committed as u64);
    assert_relative_eq!(ws.total_signal().unwrap(), signal_of(&events[..committed]));
    assert!(ws.check_invariants().unwrap().is_ok());

    // The rest of the batch can be resubmitted without losing or doubling anything.
    assert_eq!(ws.add_events(&events[committed..]).unwrap(), 100 - committed);
    assert_eq!(ws.n_points().unwrap(), 100);
    assert_relative_eq!(ws.total_signal().unwrap(), signal_of(&events));
    assert_eq!(ws.events(BoxId::ROOT).unwrap().to_vec().unwrap().len(), 100);
}

#[test]
fn test_add_transformed_inserts_every_record() {
    init_logging();
    let config = WorkspaceConfig::builder().cancellation_check_interval(10).build().unwrap();
    let ws = EventWorkspace::with_config(cube(1, 1.0), config, Arc::new(InMemoryDiskBackend::new())).unwrap();

    let mut seen = 0;
    let result = ws.add_transformed(0..25, |i| {
        seen += 1;
        Event::new(&[f64::from(i) / 25.0], 1.0, 1.0)
    });
    assert_eq!(result.unwrap(), 25);
    assert_eq!(seen, 25);
    assert_eq!(ws.n_points().unwrap(), 25);
}

#[test]
fn test_transform_errors_stop_insertion() {
    let ws = square_workspace(100, 5);
    let result = ws.add_transformed(vec![[1.0, 1.0], [2.0, 2.0]], |raw| {
        if raw[0] > 1.5 {
            Err(MdStoreError::invalid_input("bad record"))
        } else {
            Event::new(&raw, 1.0, 1.0)
        }
    });
    assert!(matches!(result, Err(MdStoreError::InvalidInput { .. })));
}

#[test]
fn test_million_event_square() {
    init_logging();
    let ws = EventWorkspace::create(2, cube(2, 10.0), 1000, 2, 10).unwrap();
    let mut rng_seed = 100;
    for _ in 0..10 {
        let batch: Vec<Event> = uniform_events(100_000, rng_seed, ws.dimensions())
            .into_iter()
            .map(|e| Event::new(e.coords(), 1.0, 1.0).unwrap())
            .collect();
        assert_eq!(ws.add_events(&batch).unwrap(), 100_000);
        ws.split_all_if_needed().unwrap();
        rng_seed += 1;
    }

    assert_relative_eq!(ws.total_signal().unwrap(), 1e6);
    assert_eq!(ws.n_points().unwrap(), 1_000_000);
    for (depth, count) in leaf_counts(&ws) {
        assert!(count <= 1000 || depth == 10);
    }
    let stats = ws.stats().unwrap();
    assert!(stats.deepest_box >= 5 && stats.deepest_box <= 7, "deepest box {}", stats.deepest_box);
    assert!(ws.check_invariants().unwrap().is_ok());
}
