// tests/graph_validation.rs

use std::collections::HashMap;

use nodevisor::dag::DependencyGraph;
use nodevisor::errors::{NodevisorError, ValidationError};
use nodevisor::service::ServiceDescriptor;
use nodevisor_test_utils::fakes::{EventLog, FakeService};

fn service(id: &str, deps: &[&str]) -> ServiceDescriptor {
    ServiceDescriptor::new(FakeService::new(id, &EventLog::new()).depends_on(deps))
}

fn graph(services: Vec<ServiceDescriptor>) -> DependencyGraph {
    let mut g = DependencyGraph::new();
    for s in services {
        g.register(s);
    }
    g
}

/// Every consecutive pair of the reported cycle must be a real
/// "depends on" edge, and the cycle must be closed.
fn assert_is_cycle(cycle: &[String], deps: &HashMap<&str, Vec<&str>>) {
    assert!(cycle.len() >= 3, "cycle too short: {cycle:?}");
    assert_eq!(cycle.first(), cycle.last(), "cycle not closed: {cycle:?}");
    for pair in cycle.windows(2) {
        let from = pair[0].as_str();
        let to = pair[1].as_str();
        assert!(
            deps.get(from).is_some_and(|d| d.contains(&to)),
            "{from} does not depend on {to} (cycle {cycle:?})"
        );
    }
}

#[test]
fn finalize_orders_dependencies_first() {
    let g = graph(vec![
        service("bootstrap", &["etcd", "trustd"]),
        service("etcd", &[]),
        service("trustd", &["etcd"]),
        service("apid", &[]),
    ])
    .finalize()
    .expect("valid graph");

    let order = g.release_order();
    let pos = |id: &str| order.iter().position(|x| x == id).unwrap();

    assert_eq!(order.len(), 4);
    assert!(pos("etcd") < pos("trustd"));
    assert!(pos("trustd") < pos("bootstrap"));
    assert!(pos("etcd") < pos("bootstrap"));

    let mut roots: Vec<&str> = g.roots().collect();
    roots.sort();
    assert_eq!(roots, vec!["apid", "etcd"]);

    assert_eq!(g.dependents_of("etcd"), &["bootstrap".to_string(), "trustd".to_string()]);
    assert_eq!(g.dependencies_of("bootstrap"), &["etcd".to_string(), "trustd".to_string()]);
    assert!(g.dependents_of("bootstrap").is_empty());
}

#[test]
fn empty_graph_is_valid() {
    let g = DependencyGraph::new().finalize().unwrap();
    assert!(g.is_empty());
    assert_eq!(g.roots().count(), 0);
}

#[test]
fn duplicate_id_is_rejected() {
    let err = graph(vec![service("etcd", &[]), service("etcd", &[])])
        .finalize()
        .unwrap_err();
    assert_eq!(err, ValidationError::DuplicateId("etcd".into()));
}

#[test]
fn unknown_dependency_is_rejected() {
    let err = graph(vec![service("bootstrap", &["etcd"])])
        .finalize()
        .unwrap_err();
    assert_eq!(
        err,
        ValidationError::UnknownDependency {
            service: "bootstrap".into(),
            dependency: "etcd".into(),
        }
    );
}

#[test]
fn self_dependency_is_rejected() {
    let err = graph(vec![service("etcd", &["etcd"])]).finalize().unwrap_err();
    assert_eq!(err, ValidationError::SelfDependency("etcd".into()));
}

#[test]
fn two_service_cycle_names_both_ids() {
    let err = graph(vec![service("A", &["B"]), service("B", &["A"])])
        .finalize()
        .unwrap_err();

    let ValidationError::CyclicDependency(cycle) = &err else {
        panic!("expected a cycle error, got {err:?}");
    };
    assert!(cycle.contains(&"A".to_string()));
    assert!(cycle.contains(&"B".to_string()));

    let deps = HashMap::from([("A", vec!["B"]), ("B", vec!["A"])]);
    assert_is_cycle(cycle, &deps);

    let msg = err.to_string();
    assert!(msg.contains("A") && msg.contains("B") && msg.contains("->"), "{msg}");
}

#[test]
fn longer_cycle_is_reported_in_dependency_order() {
    let err = graph(vec![
        service("root", &[]),
        service("a", &["root", "c"]),
        service("b", &["a"]),
        service("c", &["b"]),
        service("leaf", &["c"]),
    ])
    .finalize()
    .unwrap_err();

    let ValidationError::CyclicDependency(cycle) = err else {
        panic!("expected a cycle error");
    };
    assert_eq!(cycle.len(), 4, "{cycle:?}");
    assert!(!cycle.contains(&"root".to_string()));
    assert!(!cycle.contains(&"leaf".to_string()));

    let deps = HashMap::from([
        ("root", vec![]),
        ("a", vec!["root", "c"]),
        ("b", vec!["a"]),
        ("c", vec!["b"]),
        ("leaf", vec!["c"]),
    ]);
    assert_is_cycle(&cycle, &deps);
}

#[test]
fn validation_errors_abort_startup() {
    let err: NodevisorError = graph(vec![service("A", &["B"]), service("B", &["A"])])
        .finalize()
        .unwrap_err()
        .into();
    assert!(err.is_startup_fatal());
}
