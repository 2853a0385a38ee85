//! Integration tests: full reimport runs against the in-memory collaborators.

#![allow(clippy::unwrap_used)]

use std::cell::Cell;
use std::collections::BTreeMap;
use std::convert::Infallible;
use std::time::{Duration, SystemTime};

use basemap_reconcile::attributes::{Direction, DirectionPair, Jurisdiction};
use basemap_reconcile::memory::{
    CrossSourceMapping, MemoryFeatureSource, MemoryMappings, MemoryNetwork,
};
use basemap_reconcile::{
    AttributeMapper, BoundingBox, ChangeCause, Collaborators, Edge, EdgeAttributes, EdgeId,
    EdgeProperties, FeatureSource, ImportedFeature, Layer, MappedAttributes, Node, NodeId, Point,
    Polyline, Provenance, ReconcileConfig, ReconcileError, Reimport, ReimportEvent,
    ReimportStatistics, Segment, Sided, Span,
};

// --- Fixtures ---

/// Takes the name from the raw attributes; every layer starts unknown.
struct NameMapper;

impl AttributeMapper for NameMapper {
    type Error = Infallible;

    fn map_attributes(&self, feature: &ImportedFeature) -> Result<MappedAttributes, Self::Error> {
        Ok(MappedAttributes {
            properties: EdgeProperties {
                name: feature.raw.get("name").cloned(),
                category: None,
            },
            attributes: EdgeAttributes::unknown(false),
        })
    }
}

/// Counts calls so tests can check nothing was read.
#[derive(Default)]
struct CountingSource {
    inner: MemoryFeatureSource,
    calls: Cell<usize>,
}

impl FeatureSource for CountingSource {
    type Error = Infallible;

    fn partitions(&self) -> Result<Vec<BoundingBox>, Self::Error> {
        self.calls.set(self.calls.get() + 1);
        self.inner.partitions()
    }

    fn read_features(&self, partition: &BoundingBox) -> Result<Vec<ImportedFeature>, Self::Error> {
        self.calls.set(self.calls.get() + 1);
        self.inner.read_features(partition)
    }
}

fn line(points: &[(f64, f64)]) -> Polyline {
    Polyline::new(points.iter().map(|&(x, y)| Point::new(x, y)).collect())
}

fn node(id: u64, x: f64, y: f64) -> Node {
    Node {
        id: NodeId(id),
        point: Point::new(x, y),
        provenance: Provenance::BaseMap,
    }
}

fn authority(name: &str) -> Jurisdiction {
    Jurisdiction::Authority(name.to_string())
}

fn layer<T>(parts: Vec<(f64, f64, T)>) -> Layer<T> {
    Layer::try_from_segments(
        parts
            .into_iter()
            .map(|(from, to, value)| Segment {
                span: Span { from, to },
                value,
            })
            .collect(),
    )
    .unwrap()
}

fn edge(id: u64, tid: &str, from: &Node, to: &Node) -> Edge {
    Edge {
        id: EdgeId(id),
        from: from.id,
        to: to.id,
        geometry: Polyline::new(vec![from.point, to.point]),
        provenance: Provenance::BaseMap,
        technical_id: Some(tid.into()),
        properties: EdgeProperties::default(),
        attributes: EdgeAttributes::unknown(false),
    }
}

fn with_ab_jurisdiction(mut e: Edge) -> Edge {
    e.attributes.jurisdiction = Sided::mirrored(layer(vec![
        (0.0, 0.5, authority("A")),
        (0.5, 1.0, authority("B")),
    ]));
    e
}

fn feature(tid: &str, points: &[(f64, f64)]) -> ImportedFeature {
    ImportedFeature {
        technical_id: tid.into(),
        geometry: line(points),
        raw: BTreeMap::new(),
    }
}

fn timestamp() -> SystemTime {
    SystemTime::UNIX_EPOCH + Duration::from_secs(1_700_000_000)
}

struct Outcome {
    result: Result<ReimportStatistics, ReconcileError>,
    events: Vec<ReimportEvent>,
}

fn run_with(
    network: &mut MemoryNetwork,
    mappings: &mut MemoryMappings,
    source: &MemoryFeatureSource,
    config: ReconcileConfig,
) -> Outcome {
    let mut events = Vec::new();
    let result = Reimport::new(config).unwrap().at(timestamp()).run(Collaborators {
        source,
        mapper: &NameMapper,
        network,
        mappings,
        events: &mut events,
    });
    Outcome { result, events }
}

fn run(network: &mut MemoryNetwork, features: Vec<ImportedFeature>) -> Outcome {
    let source = MemoryFeatureSource::grid(features, 1000.0);
    run_with(network, &mut MemoryMappings::new(), &source, ReconcileConfig::default())
}

fn assert_layer(got: &Layer<Jurisdiction>, want: &[(f64, f64, Jurisdiction)]) {
    let segments = got.segments();
    assert_eq!(segments.len(), want.len(), "segments: {segments:?}");
    for (s, (from, to, value)) in segments.iter().zip(want) {
        assert!((s.span.from - from).abs() < 1e-9, "{s:?}");
        assert!((s.span.to - to).abs() < 1e-9, "{s:?}");
        assert_eq!(&s.value, value);
    }
}

// --- Scenarios ---

#[test_log::test]
fn stretched_edge_keeps_boundary_at_physical_point() {
    let (n1, n2) = (node(1, 0.0, 0.0), node(2, 100.0, 0.0));
    let mut network =
        MemoryNetwork::from_parts([n1, n2], [with_ab_jurisdiction(edge(1, "1", &n1, &n2))]);

    let outcome = run(&mut network, vec![feature("1", &[(0.0, 0.0), (150.0, 0.0)])]);
    let stats = outcome.result.unwrap();

    let e = network.edge_with_technical_id("1").unwrap();
    assert_eq!(e.geometry, line(&[(0.0, 0.0), (150.0, 0.0)]));
    assert_eq!(e.from, NodeId(1));
    assert_eq!(e.to, NodeId(3));
    assert_layer(
        &e.attributes.jurisdiction.left,
        &[(0.0, 1.0 / 3.0, authority("A")), (1.0 / 3.0, 1.0, authority("B"))],
    );
    assert!(e.attributes.is_full_coverage());

    assert_eq!(stats.topological, 1);
    assert_eq!(stats.simple_updates, 1);
    assert_eq!(stats.created_nodes, 1);
    assert_eq!(stats.deleted_nodes, 1, "old far node is orphaned");
    assert_eq!(network.views_refreshed(), 1);

    assert_eq!(outcome.events.len(), 2);
    assert!(matches!(
        &outcome.events[0],
        ReimportEvent::EdgeChanged {
            edge: EdgeId(1),
            cause: ChangeCause::StronglyAltered,
            previous,
            ..
        } if *previous == line(&[(0.0, 0.0), (100.0, 0.0)])
    ));
    assert!(matches!(
        outcome.events[1],
        ReimportEvent::NodeDeleted { node: NodeId(2), cause: ChangeCause::Orphaned, .. }
    ));
    assert!(outcome.events.iter().all(|e| e.timestamp() == timestamp()));
}

#[test_log::test]
fn split_inserts_node_and_shares_layers() {
    let (n1, n2) = (node(1, 0.0, 0.0), node(2, 100.0, 0.0));
    let mut network =
        MemoryNetwork::from_parts([n1, n2], [with_ab_jurisdiction(edge(1, "2", &n1, &n2))]);

    let outcome = run(
        &mut network,
        vec![
            feature("2", &[(0.0, 0.0), (60.0, 0.0)]),
            feature("4", &[(60.0, 0.0), (100.0, 0.0)]),
        ],
    );
    let stats = outcome.result.unwrap();

    assert_eq!(stats.splits, 1);
    assert_eq!(stats.simple_updates, 0);
    assert_eq!(stats.created_edges, 1);
    assert_eq!(stats.created_nodes, 1);
    assert_eq!(network.edge_count(), 2);
    assert_eq!(network.node_count(), 3);

    let split_node = network
        .nodes()
        .find(|n| n.point == Point::new(60.0, 0.0))
        .copied()
        .unwrap();
    let shortened = network.edge_with_technical_id("2").unwrap();
    assert_eq!((shortened.from, shortened.to), (NodeId(1), split_node.id));
    assert_layer(
        &shortened.attributes.jurisdiction.left,
        &[(0.0, 0.5 / 0.6, authority("A")), (0.5 / 0.6, 1.0, authority("B"))],
    );

    let added = network.edge_with_technical_id("4").unwrap();
    assert_eq!((added.from, added.to), (split_node.id, NodeId(2)));
    assert_layer(&added.attributes.jurisdiction.left, &[(0.0, 1.0, authority("B"))]);
    assert_layer(&added.attributes.jurisdiction.right, &[(0.0, 1.0, authority("B"))]);

    assert_eq!(outcome.events.len(), 1);
    assert!(matches!(
        outcome.events[0],
        ReimportEvent::EdgeChanged { edge: EdgeId(1), cause: ChangeCause::Split, .. }
    ));
}

#[test_log::test]
fn split_is_found_when_pieces_arrive_in_different_partitions() {
    let (n1, n2) = (node(1, 0.0, 0.0), node(2, 100.0, 0.0));
    let mut network =
        MemoryNetwork::from_parts([n1, n2], [with_ab_jurisdiction(edge(1, "2", &n1, &n2))]);
    // "2" is delivered by the first partition, "4" only by the second.
    let source = MemoryFeatureSource::with_partitions(
        vec![
            feature("2", &[(0.0, 0.0), (60.0, 0.0)]),
            feature("4", &[(60.0, 0.0), (100.0, 0.0)]),
        ],
        vec![
            BoundingBox::new(Point::new(-1.0, -1.0), Point::new(50.0, 1.0)),
            BoundingBox::new(Point::new(50.0, -1.0), Point::new(101.0, 1.0)),
        ],
    );

    let outcome = run_with(
        &mut network,
        &mut MemoryMappings::new(),
        &source,
        ReconcileConfig::default(),
    );
    let stats = outcome.result.unwrap();

    assert_eq!(stats.partitions, 2);
    assert_eq!(stats.features_read, 2);
    assert_eq!(stats.splits, 1);
    assert_eq!(stats.simple_updates, 0);
    assert_eq!(stats.created_edges, 1);
    assert_eq!(stats.created_nodes, 1);

    let shortened = network.edge_with_technical_id("2").unwrap();
    assert_layer(
        &shortened.attributes.jurisdiction.left,
        &[(0.0, 0.5 / 0.6, authority("A")), (0.5 / 0.6, 1.0, authority("B"))],
    );
    let added = network.edge_with_technical_id("4").unwrap();
    assert_eq!(added.from, shortened.to);
    assert_layer(&added.attributes.jurisdiction.left, &[(0.0, 1.0, authority("B"))]);
    assert_layer(&added.attributes.jurisdiction.right, &[(0.0, 1.0, authority("B"))]);

    assert!(matches!(
        outcome.events[..],
        [ReimportEvent::EdgeChanged { edge: EdgeId(1), cause: ChangeCause::Split, .. }]
    ));
}

#[test_log::test]
fn empty_network_is_refused_before_reading() {
    let operator = Node {
        provenance: Provenance::Operator,
        ..node(1, 0.0, 0.0)
    };
    let other = Node {
        provenance: Provenance::Operator,
        ..node(2, 10.0, 0.0)
    };
    let mut foreign = edge(1, "1", &operator, &other);
    foreign.provenance = Provenance::Operator;
    let mut network = MemoryNetwork::from_parts([operator, other], [foreign]);
    let source = CountingSource {
        inner: MemoryFeatureSource::grid(vec![feature("1", &[(0.0, 0.0), (10.0, 0.0)])], 100.0),
        calls: Cell::new(0),
    };

    let mut events = Vec::new();
    let result = Reimport::new(ReconcileConfig::default()).unwrap().run(Collaborators {
        source: &source,
        mapper: &NameMapper,
        network: &mut network,
        mappings: &mut MemoryMappings::new(),
        events: &mut events,
    });

    assert!(matches!(result, Err(ReconcileError::EmptyNetwork(Provenance::BaseMap))));
    assert_eq!(source.calls.get(), 0);
    assert_eq!(network.views_refreshed(), 0);
    assert!(events.is_empty());
}

#[test_log::test]
fn reversed_geometry_swaps_sides_and_directions() {
    let (n1, n2) = (node(1, 0.0, 0.0), node(2, 100.0, 0.0));
    let mut e = edge(1, "1", &n1, &n2);
    e.attributes.two_sided = true;
    e.attributes.jurisdiction.left =
        layer(vec![(0.0, 0.25, authority("A")), (0.25, 1.0, authority("B"))]);
    e.attributes.jurisdiction.right = layer(vec![(0.0, 1.0, authority("R"))]);
    e.attributes.direction = DirectionPair {
        left: Direction::WithStationing,
        right: Direction::Closed,
    };
    let mut network = MemoryNetwork::from_parts([n1, n2], [e]);

    let outcome = run(&mut network, vec![feature("1", &[(100.0, 0.0), (0.0, 0.0)])]);
    let stats = outcome.result.unwrap();

    let e = network.edge_with_technical_id("1").unwrap();
    assert_eq!((e.from, e.to), (NodeId(2), NodeId(1)));
    assert_layer(&e.attributes.jurisdiction.left, &[(0.0, 1.0, authority("R"))]);
    assert_layer(
        &e.attributes.jurisdiction.right,
        &[(0.0, 0.75, authority("B")), (0.75, 1.0, authority("A"))],
    );
    assert_eq!(e.attributes.direction.left, Direction::Closed);
    assert_eq!(e.attributes.direction.right, Direction::AgainstStationing);
    assert_eq!(stats.reversed, 1);
    assert_eq!(stats.created_nodes, 0);
    assert!(outcome.events.is_empty());
}

#[test_log::test]
fn second_run_with_same_snapshot_changes_nothing() {
    let (n1, n2) = (node(1, 0.0, 0.0), node(2, 100.0, 0.0));
    let mut network =
        MemoryNetwork::from_parts([n1, n2], [with_ab_jurisdiction(edge(1, "2", &n1, &n2))]);
    let mut named = feature("2", &[(0.0, 0.0), (60.0, 0.0)]);
    named.raw.insert("name".to_string(), "Uferweg".to_string());
    let snapshot = vec![named, feature("4", &[(60.0, 0.0), (100.0, 0.0)])];

    run(&mut network, snapshot.clone()).result.unwrap();
    let after_first = serde_json::to_value(&network).unwrap();

    let outcome = run(&mut network, snapshot);
    let stats = outcome.result.unwrap();
    assert_eq!(stats.unchanged, 2);
    assert_eq!(stats.topological, 0);
    assert_eq!(stats.created_edges, 0);
    assert_eq!(stats.deleted_edges + stats.deleted_nodes, 0);
    assert!(outcome.events.is_empty());
    assert_eq!(serde_json::to_value(&network).unwrap(), after_first);
}

#[test_log::test]
fn absent_edges_are_deleted_only_near_processed_partitions() {
    let nodes = [
        node(1, 0.0, 0.0),
        node(2, 100.0, 0.0),
        node(3, 200.0, 0.0),
        node(4, 300.0, 0.0),
        node(5, 5000.0, 0.0),
        node(6, 5100.0, 0.0),
    ];
    let edges = [
        edge(1, "1", &nodes[0], &nodes[1]),
        edge(2, "9", &nodes[2], &nodes[3]),
        edge(3, "7", &nodes[4], &nodes[5]),
    ];
    let mut network = MemoryNetwork::from_parts(nodes, edges);
    let mut mappings = MemoryMappings::new();
    mappings.insert(CrossSourceMapping {
        edge: EdgeId(2),
        foreign_edge: "ext-17".to_string(),
        span: Span::FULL,
    });

    let source = MemoryFeatureSource::grid(vec![feature("1", &[(0.0, 0.0), (100.0, 0.0)])], 1000.0);
    let outcome = run_with(&mut network, &mut mappings, &source, ReconcileConfig::default());
    let stats = outcome.result.unwrap();

    assert_eq!(stats.unchanged, 1);
    assert_eq!(stats.deleted_edges, 1);
    assert_eq!(stats.deleted_nodes, 2);
    assert_eq!(stats.invalidated_mappings, 1);
    assert!(mappings.is_empty());
    assert!(network.edge_with_technical_id("9").is_none());
    assert!(network.edge_with_technical_id("7").is_some(), "outside every partition");

    let causes: Vec<ChangeCause> = outcome.events.iter().map(ReimportEvent::cause).collect();
    assert_eq!(
        causes,
        vec![ChangeCause::AbsentFromSnapshot, ChangeCause::Orphaned, ChangeCause::Orphaned]
    );
}

#[test_log::test]
fn feature_spanning_partitions_is_processed_once() {
    let (n1, n2) = (node(1, 0.0, 0.0), node(2, 100.0, 0.0));
    let mut network = MemoryNetwork::from_parts([n1, n2], [edge(1, "1", &n1, &n2)]);
    let source = MemoryFeatureSource::grid(vec![feature("1", &[(0.0, 0.0), (100.0, 0.0)])], 50.0);
    assert_eq!(source.partitions().unwrap().len(), 3);

    let outcome = run_with(
        &mut network,
        &mut MemoryMappings::new(),
        &source,
        ReconcileConfig::default(),
    );
    let stats = outcome.result.unwrap();
    assert_eq!(stats.partitions, 3);
    assert_eq!(stats.features_read, 1);
    assert_eq!(stats.unchanged, 1);
    assert_eq!(stats.deleted_edges, 0);
}

#[test_log::test]
fn malformed_features_are_counted_not_raised() {
    let (n1, n2) = (node(1, 0.0, 0.0), node(2, 100.0, 0.0));
    let mut network = MemoryNetwork::from_parts([n1, n2], [edge(1, "1", &n1, &n2)]);

    let outcome = run(
        &mut network,
        vec![
            feature("1", &[(0.0, 0.0), (100.0, 0.0)]),
            feature("5", &[(40.0, 40.0), (40.0, 40.0)]),
            feature("6", &[(10.0, 10.0), (20.0, 20.0), (10.0, 10.0)]),
            feature("8", &[(0.0, 50.0), (30.0, 50.0)]),
        ],
    );
    let stats = outcome.result.unwrap();
    assert_eq!(stats.validation_errors, 2);
    assert_eq!(stats.created_edges, 1);
    assert_eq!(stats.unchanged, 1);
    assert_eq!(network.edge_count(), 2);
}

#[test_log::test]
fn new_edge_snaps_onto_existing_node() {
    let (n1, n2) = (node(1, 0.0, 0.0), node(2, 100.0, 0.0));
    let mut network = MemoryNetwork::from_parts([n1, n2], [edge(1, "1", &n1, &n2)]);

    let outcome = run(
        &mut network,
        vec![
            feature("1", &[(0.0, 0.0), (100.0, 0.0)]),
            feature("3", &[(100.1, 0.1), (100.0, 80.0)]),
        ],
    );
    let stats = outcome.result.unwrap();
    let added = network.edge_with_technical_id("3").unwrap();
    assert_eq!(added.from, NodeId(2));
    assert_eq!(added.to, NodeId(3));
    assert_eq!(stats.created_nodes, 1);
}

#[test]
fn invalid_config_is_rejected() {
    let config = ReconcileConfig {
        snap_tolerance: 0.0,
        ..ReconcileConfig::default()
    };
    assert!(matches!(Reimport::new(config), Err(ReconcileError::InvalidConfig(_))));
}
