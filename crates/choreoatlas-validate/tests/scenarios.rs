//! End-to-end scenarios: specs and traces loaded from disk, run
//! through lint and the full validation pipeline.

use std::path::PathBuf;

use choreoatlas_spec::load_flow_spec;
use choreoatlas_trace::load_trace;
use choreoatlas_validate::{
    has_errors, lint_flow, validate_against_trace, StepStatus, ValidationConfig,
};

fn scenario_dir(name: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!("ca-scenario-{}-{}", name, std::process::id()));
    std::fs::create_dir_all(&dir).unwrap();
    dir
}

fn write(dir: &PathBuf, name: &str, content: &str) -> PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, content).unwrap();
    path
}

const ORDER_SERVICE: &str = r#"
service: orderService
operations:
  - operationId: createOrder
    description: Create a new order
    postconditions:
      created: "response.status == 201 || response.status == 200"
"#;

const INVENTORY_SERVICE: &str = r#"
service: inventoryService
operations:
  - operationId: reserve
"#;

const SHIPPING_SERVICE: &str = r#"
service: shippingService
operations:
  - operationId: ship
"#;

const SEQUENTIAL_FLOW: &str = r#"
info:
  title: "Order Fulfillment"
services:
  orderService:
    spec: ./order.servicespec.yaml
  inventoryService:
    spec: ./inventory.servicespec.yaml
  shippingService:
    spec: ./shipping.servicespec.yaml
flow:
  - step: s1
    call: orderService.createOrder
  - step: s2
    call: inventoryService.reserve
  - step: s3
    call: shippingService.ship
"#;

fn write_sequential_spec(dir: &PathBuf) -> PathBuf {
    write(dir, "order.servicespec.yaml", ORDER_SERVICE);
    write(dir, "inventory.servicespec.yaml", INVENTORY_SERVICE);
    write(dir, "shipping.servicespec.yaml", SHIPPING_SERVICE);
    write(dir, "flow.yaml", SEQUENTIAL_FLOW)
}

#[test]
fn scenario_happy_path_sequential() {
    let dir = scenario_dir("s1");
    let flow_path = write_sequential_spec(&dir);
    let trace_path = write(
        &dir,
        "trace.json",
        r#"{
  "spans": [
    {"name": "createOrder", "service": "orderService", "startNanos": 0, "endNanos": 100,
     "attributes": {"http.status_code": 201}},
    {"name": "reserve", "service": "inventoryService", "startNanos": 200, "endNanos": 300, "attributes": {}},
    {"name": "ship", "service": "shippingService", "startNanos": 400, "endNanos": 500, "attributes": {}}
  ]
}"#,
    );

    let fs = load_flow_spec(&flow_path).unwrap();
    let (_, op_index) = fs.build_operation_index(&flow_path).unwrap();
    let issues = lint_flow(&fs, &op_index);
    assert!(!has_errors(&issues));

    let trace = load_trace(&trace_path).unwrap();
    let (results, all_passed) =
        validate_against_trace(&fs, &op_index, &trace, &ValidationConfig::default());

    assert!(all_passed, "results: {:?}", results);
    assert_eq!(results.len(), 3);
    assert!(results.iter().all(|r| r.status == StepStatus::Pass));
}

#[test]
fn scenario_missing_span() {
    let dir = scenario_dir("s2");
    let flow_path = write_sequential_spec(&dir);
    let trace_path = write(
        &dir,
        "trace.json",
        r#"{
  "spans": [
    {"name": "createOrder", "service": "orderService", "startNanos": 0, "endNanos": 100,
     "attributes": {"http.status_code": 201}},
    {"name": "reserve", "service": "inventoryService", "startNanos": 200, "endNanos": 300, "attributes": {}}
  ]
}"#,
    );

    let fs = load_flow_spec(&flow_path).unwrap();
    let (_, op_index) = fs.build_operation_index(&flow_path).unwrap();
    let trace = load_trace(&trace_path).unwrap();
    let (results, all_passed) =
        validate_against_trace(&fs, &op_index, &trace, &ValidationConfig::default());

    assert!(!all_passed);
    assert_eq!(results[0].status, StepStatus::Pass);
    assert_eq!(results[1].status, StepStatus::Pass);
    assert_eq!(results[2].status, StepStatus::Fail);
    assert!(results[2]
        .message
        .as_deref()
        .unwrap()
        .contains("no matching span"));

    let passed = results.iter().filter(|r| r.status.is_pass()).count();
    let failed = results.iter().filter(|r| r.status.is_fail()).count();
    assert_eq!((passed, failed), (2, 1));
    let uncovered: Vec<&str> = results
        .iter()
        .filter(|r| r.status.is_fail())
        .map(|r| r.step.as_str())
        .collect();
    assert_eq!(uncovered, vec!["s3"]);
}

const PARALLEL_FLOW: &str = r#"
info:
  title: "Fan Out"
services:
  orderService:
    spec: ./order.servicespec.yaml
  inventoryService:
    spec: ./inventory.servicespec.yaml
  shippingService:
    spec: ./shipping.servicespec.yaml
flow:
  - step: s1
    call: orderService.createOrder
  - step: fanout
    parallel:
      - step: s2a
        call: inventoryService.reserve
      - step: s2b
        call: shippingService.ship
"#;

#[test]
fn scenario_parallel_group_overlapping() {
    let dir = scenario_dir("s3");
    write(&dir, "order.servicespec.yaml", ORDER_SERVICE);
    write(&dir, "inventory.servicespec.yaml", INVENTORY_SERVICE);
    write(&dir, "shipping.servicespec.yaml", SHIPPING_SERVICE);
    let flow_path = write(&dir, "flow.yaml", PARALLEL_FLOW);
    let trace_path = write(
        &dir,
        "trace.json",
        r#"{
  "spans": [
    {"name": "createOrder", "service": "orderService", "startNanos": 0, "endNanos": 100,
     "attributes": {"http.status_code": 201}},
    {"name": "reserve", "service": "inventoryService", "startNanos": 200, "endNanos": 400, "attributes": {}},
    {"name": "ship", "service": "shippingService", "startNanos": 300, "endNanos": 500, "attributes": {}}
  ]
}"#,
    );

    let fs = load_flow_spec(&flow_path).unwrap();
    let (_, op_index) = fs.build_operation_index(&flow_path).unwrap();
    let trace = load_trace(&trace_path).unwrap();
    let (results, all_passed) =
        validate_against_trace(&fs, &op_index, &trace, &ValidationConfig::default());

    assert!(all_passed, "results: {:?}", results);
    assert!(results.iter().all(|r| r.status == StepStatus::Pass));
}

#[test]
fn scenario_parallel_group_violation() {
    let dir = scenario_dir("s4");
    write(&dir, "order.servicespec.yaml", ORDER_SERVICE);
    write(&dir, "inventory.servicespec.yaml", INVENTORY_SERVICE);
    write(&dir, "shipping.servicespec.yaml", SHIPPING_SERVICE);
    let flow_path = write(&dir, "flow.yaml", PARALLEL_FLOW);
    // reserve ends before ship starts and both are roots: the group's
    // concurrency constraint fails
    let trace_path = write(
        &dir,
        "trace.json",
        r#"{
  "spans": [
    {"name": "createOrder", "service": "orderService", "startNanos": 0, "endNanos": 100,
     "attributes": {"http.status_code": 201}},
    {"name": "reserve", "service": "inventoryService", "startNanos": 200, "endNanos": 250, "attributes": {}},
    {"name": "ship", "service": "shippingService", "startNanos": 300, "endNanos": 500, "attributes": {}}
  ]
}"#,
    );

    let fs = load_flow_spec(&flow_path).unwrap();
    let (_, op_index) = fs.build_operation_index(&flow_path).unwrap();
    let trace = load_trace(&trace_path).unwrap();
    let (results, all_passed) =
        validate_against_trace(&fs, &op_index, &trace, &ValidationConfig::default());

    assert!(!all_passed);
    for step in ["s2a", "s2b"] {
        let result = results.iter().find(|r| r.step == step).unwrap();
        assert_eq!(result.status, StepStatus::Fail);
        assert!(result
            .message
            .as_deref()
            .unwrap()
            .contains("concurrency constraint violation"));
    }
}

#[test]
fn scenario_dag_with_failing_postcondition() {
    let dir = scenario_dir("s5");
    write(&dir, "order.servicespec.yaml", ORDER_SERVICE);
    write(
        &dir,
        "billing.servicespec.yaml",
        r#"
service: billingService
operations:
  - operationId: charge
    postconditions:
      ok_status: "response.status == 200"
"#,
    );
    let flow_path = write(
        &dir,
        "flow.yaml",
        r#"
info:
  title: "DAG Billing"
services:
  orderService:
    spec: ./order.servicespec.yaml
  billingService:
    spec: ./billing.servicespec.yaml
graph:
  nodes:
    - id: a
      call: orderService.createOrder
    - id: b
      call: billingService.charge
      depends: [a]
"#,
    );
    let trace_path = write(
        &dir,
        "trace.json",
        r#"{
  "spans": [
    {"name": "createOrder", "service": "orderService", "startNanos": 0, "endNanos": 100,
     "attributes": {"http.status_code": 201}},
    {"name": "charge", "service": "billingService", "startNanos": 200, "endNanos": 300,
     "attributes": {"http.status_code": 500}}
  ]
}"#,
    );

    let fs = load_flow_spec(&flow_path).unwrap();
    let (_, op_index) = fs.build_operation_index(&flow_path).unwrap();
    let issues = lint_flow(&fs, &op_index);
    assert!(!has_errors(&issues), "issues: {:?}", issues);

    let trace = load_trace(&trace_path).unwrap();
    let (results, all_passed) =
        validate_against_trace(&fs, &op_index, &trace, &ValidationConfig::default());

    assert!(!all_passed);
    let a = results.iter().find(|r| r.step == "a").unwrap();
    assert_eq!(a.status, StepStatus::Pass);
    let b = results.iter().find(|r| r.step == "b").unwrap();
    assert_eq!(b.status, StepStatus::Fail);
    assert!(b
        .message
        .as_deref()
        .unwrap()
        .contains("semantic validation failed"));
    let condition = b.conditions.iter().find(|c| c.name == "ok_status").unwrap();
    assert_eq!(condition.status, StepStatus::Fail);
}

#[test]
fn scenario_results_are_deterministic_from_disk() {
    let dir = scenario_dir("determinism");
    let flow_path = write_sequential_spec(&dir);
    let trace_path = write(
        &dir,
        "trace.json",
        r#"{
  "spans": [
    {"name": "createOrder", "service": "orderService", "startNanos": 0, "endNanos": 100,
     "attributes": {"http.status_code": 201}},
    {"name": "reserve", "service": "inventoryService", "startNanos": 200, "endNanos": 300, "attributes": {}},
    {"name": "ship", "service": "shippingService", "startNanos": 400, "endNanos": 500, "attributes": {}}
  ]
}"#,
    );

    let mut snapshots = Vec::new();
    for _ in 0..5 {
        let fs = load_flow_spec(&flow_path).unwrap();
        let (_, op_index) = fs.build_operation_index(&flow_path).unwrap();
        let trace = load_trace(&trace_path).unwrap();
        let (results, _) =
            validate_against_trace(&fs, &op_index, &trace, &ValidationConfig::default());
        snapshots.push(serde_json::to_string(&results).unwrap());
    }
    assert!(snapshots.windows(2).all(|w| w[0] == w[1]));
}
