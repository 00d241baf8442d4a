//! Condition evaluation: pre/postconditions against matched spans
//!
//! The matched span is projected into a `request` / `response` / `span`
//! / `vars` environment and each named condition is evaluated as a
//! boolean. Expressions the engine cannot compile or evaluate degrade
//! to SKIP rather than FAIL, so an exotic condition never breaks a
//! gate on its own.

use regex::Regex;
use serde_json::{json, Map, Value};
use std::collections::BTreeMap;

use choreoatlas_spec::{FlowStep, ServiceOperation};
use choreoatlas_trace::Span;

use crate::expr::{CelEngine, Env, ExprEngine};
use crate::result::{ConditionKind, ConditionResult, StepStatus};

/// Evaluate an operation's pre- and postconditions against a matched
/// span, using the default expression engine.
///
/// Returns the per-condition results and whether every evaluated
/// condition passed (SKIPs do not count against it).
pub fn evaluate_conditions(
    step: &FlowStep,
    op: &ServiceOperation,
    span: &Span,
    vars: &BTreeMap<String, Value>,
) -> (Vec<ConditionResult>, bool) {
    evaluate_conditions_with(&CelEngine::new(), step, op, span, vars)
}

/// Same as [`evaluate_conditions`], with an explicit engine
pub fn evaluate_conditions_with(
    engine: &dyn ExprEngine,
    step: &FlowStep,
    op: &ServiceOperation,
    span: &Span,
    vars: &BTreeMap<String, Value>,
) -> (Vec<ConditionResult>, bool) {
    let env = build_eval_env(step, span, vars);
    let mut results = Vec::new();
    let mut pass_all = true;

    for (name, expr) in &op.preconditions {
        let result = eval_condition(engine, ConditionKind::Pre, name, expr, &env);
        if result.status.is_fail() {
            pass_all = false;
        }
        results.push(result);
    }
    for (name, expr) in &op.postconditions {
        let result = eval_condition(engine, ConditionKind::Post, name, expr, &env);
        if result.status.is_fail() {
            pass_all = false;
        }
        results.push(result);
    }

    (results, pass_all)
}

fn eval_condition(
    engine: &dyn ExprEngine,
    kind: ConditionKind,
    name: &str,
    expr: &str,
    env: &Env,
) -> ConditionResult {
    let mut result = ConditionResult {
        kind,
        name: name.to_string(),
        expr: expr.to_string(),
        status: StepStatus::Skip,
        message: None,
    };

    let normalized = normalize_expr(expr);
    let program = match engine.compile(&normalized) {
        Ok(p) => p,
        Err(e) => {
            result.message = Some(format!(
                "unsupported or failed to evaluate ({}): {}",
                e.phase(),
                e
            ));
            return result;
        }
    };

    match engine.evaluate(&program, env) {
        Ok(Value::Bool(true)) => result.status = StepStatus::Pass,
        Ok(Value::Bool(false)) => {
            result.status = StepStatus::Fail;
            result.message = Some("result is false".into());
        }
        Ok(other) => {
            result.message = Some(format!(
                "unsupported or failed to evaluate (type): expression result is not boolean ({})",
                other
            ));
        }
        Err(e) => {
            result.message = Some(format!(
                "unsupported or failed to evaluate ({}): {}",
                e.phase(),
                e
            ));
        }
    }

    result
}

/// Project a step's input and a matched span into the expression
/// environment.
///
/// - `request.body` is the step input as declared; `${var}` tokens are
///   left as-is, evaluators see the raw values
/// - `response.status` takes the first of `response.status`,
///   `http.status_code`, `statusCode`, defaulting to 0
/// - `response.body` takes `response.body` or falls back to the whole
///   attribute map
/// - `span` carries name, service, and the attribute map
pub(crate) fn build_eval_env(step: &FlowStep, span: &Span, vars: &BTreeMap<String, Value>) -> Env {
    let mut request = Map::new();
    if let Some(input) = &step.input {
        request.insert("body".into(), input.clone());
    }

    let status = ["response.status", "http.status_code", "statusCode"]
        .iter()
        .find_map(|k| span.attributes.get(*k))
        .cloned()
        .unwrap_or(json!(0));

    let attributes: Map<String, Value> = span
        .attributes
        .iter()
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect();

    let body = span
        .attributes
        .get("response.body")
        .cloned()
        .unwrap_or_else(|| Value::Object(attributes.clone()));

    let mut env = Env::new();
    env.insert("request".into(), Value::Object(request));
    env.insert("response".into(), json!({ "status": status, "body": body }));
    env.insert(
        "span".into(),
        json!({
            "name": span.name,
            "service": span.service,
            "attributes": Value::Object(attributes),
        }),
    );
    env.insert(
        "vars".into(),
        Value::Object(vars.iter().map(|(k, v)| (k.clone(), v.clone())).collect()),
    );
    env
}

/// Rewrite `<expr> =~ /re/` into `<expr>.matches("re")`.
///
/// A purely textual transform applied before compilation; regexes with
/// embedded forward slashes are not supported by this shorthand.
pub(crate) fn normalize_expr(expr: &str) -> String {
    let re = Regex::new(r#"\s*=~\s*/([^/]+)/"#).expect("the rewrite pattern is valid");
    re.replace_all(expr, |caps: &regex::Captures<'_>| {
        format!(".matches(\"{}\")", caps[1].replace('"', "\\\""))
    })
    .into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_span(attrs: &[(&str, Value)]) -> Span {
        Span {
            name: "createOrder".into(),
            service: "orderService".into(),
            start_nanos: 1_000,
            end_nanos: 2_000,
            attributes: attrs
                .iter()
                .map(|(k, v)| (k.to_string(), v.clone()))
                .collect(),
        }
    }

    fn make_op(post: &[(&str, &str)]) -> ServiceOperation {
        ServiceOperation {
            operation_id: "createOrder".into(),
            description: None,
            preconditions: BTreeMap::new(),
            postconditions: post
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        }
    }

    #[test]
    fn test_normalize_expr_rewrites_regex_shorthand() {
        assert_eq!(
            normalize_expr("request.headers.authorization =~ /Bearer .+/"),
            "request.headers.authorization.matches(\"Bearer .+\")"
        );
        // untouched when no shorthand present
        assert_eq!(normalize_expr("response.status == 200"), "response.status == 200");
    }

    #[test]
    fn test_response_status_fallback_chain() {
        let step = FlowStep::default();
        let vars = BTreeMap::new();

        let env = build_eval_env(&step, &make_span(&[("http.status_code", json!(503))]), &vars);
        assert_eq!(env["response"]["status"], json!(503));

        let env = build_eval_env(
            &step,
            &make_span(&[
                ("response.status", json!(200)),
                ("http.status_code", json!(503)),
            ]),
            &vars,
        );
        assert_eq!(env["response"]["status"], json!(200));

        let env = build_eval_env(&step, &make_span(&[]), &vars);
        assert_eq!(env["response"]["status"], json!(0));
    }

    #[test]
    fn test_response_body_falls_back_to_attributes() {
        let step = FlowStep::default();
        let vars = BTreeMap::new();
        let env = build_eval_env(&step, &make_span(&[("http.method", json!("POST"))]), &vars);
        assert_eq!(env["response"]["body"]["http.method"], json!("POST"));

        let env = build_eval_env(
            &step,
            &make_span(&[("response.body", json!({"id": "o-1"}))]),
            &vars,
        );
        assert_eq!(env["response"]["body"], json!({"id": "o-1"}));
    }

    #[test]
    fn test_passing_and_failing_conditions() {
        let span = make_span(&[("http.status_code", json!(200))]);
        let op = make_op(&[
            ("ok_status", "response.status == 200"),
            ("created", "response.status == 201"),
        ]);
        let (results, pass_all) =
            evaluate_conditions(&FlowStep::default(), &op, &span, &BTreeMap::new());
        assert!(!pass_all);
        assert_eq!(results.len(), 2);

        let created = results.iter().find(|r| r.name == "created").unwrap();
        assert_eq!(created.status, StepStatus::Fail);
        assert_eq!(created.message.as_deref(), Some("result is false"));

        let ok = results.iter().find(|r| r.name == "ok_status").unwrap();
        assert_eq!(ok.status, StepStatus::Pass);
    }

    #[test]
    fn test_uncompilable_condition_skips_without_failing() {
        let span = make_span(&[("http.status_code", json!(200))]);
        let op = make_op(&[("weird", "response.status ===== 200")]);
        let (results, pass_all) =
            evaluate_conditions(&FlowStep::default(), &op, &span, &BTreeMap::new());
        assert!(pass_all);
        assert_eq!(results[0].status, StepStatus::Skip);
        assert!(results[0].message.as_deref().unwrap().contains("compile"));
    }

    #[test]
    fn test_non_boolean_result_skips() {
        let span = make_span(&[("http.status_code", json!(200))]);
        let op = make_op(&[("just_a_value", "response.status")]);
        let (results, pass_all) =
            evaluate_conditions(&FlowStep::default(), &op, &span, &BTreeMap::new());
        assert!(pass_all);
        assert_eq!(results[0].status, StepStatus::Skip);
        assert!(results[0].message.as_deref().unwrap().contains("type"));
    }

    #[test]
    fn test_runtime_error_skips() {
        let span = make_span(&[]);
        let op = make_op(&[("missing_field", "response.body.nothere == 'x'")]);
        let (results, pass_all) =
            evaluate_conditions(&FlowStep::default(), &op, &span, &BTreeMap::new());
        assert!(pass_all);
        assert_eq!(results[0].status, StepStatus::Skip);
        assert!(results[0].message.as_deref().unwrap().contains("runtime"));
    }

    #[test]
    fn test_pre_and_post_both_evaluated() {
        let span = make_span(&[("http.status_code", json!(201))]);
        let mut op = make_op(&[("created", "response.status == 201")]);
        op.preconditions
            .insert("has_span".into(), "span.service == 'orderService'".into());
        let (results, pass_all) =
            evaluate_conditions(&FlowStep::default(), &op, &span, &BTreeMap::new());
        assert!(pass_all);
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].kind, ConditionKind::Pre);
        assert_eq!(results[1].kind, ConditionKind::Post);
    }

    #[test]
    fn test_regex_shorthand_end_to_end() {
        let span = make_span(&[("response.body", json!({"authorization": "Bearer tok"}))]);
        let op = make_op(&[("bearer", "response.body.authorization =~ /Bearer .+/")]);
        let (results, pass_all) =
            evaluate_conditions(&FlowStep::default(), &op, &span, &BTreeMap::new());
        assert!(pass_all);
        assert_eq!(results[0].status, StepStatus::Pass);
    }

    #[test]
    fn test_request_body_carries_raw_input() {
        let step = FlowStep {
            input: Some(json!({"body": {"customerId": "${customerId}"}})),
            ..Default::default()
        };
        let env = build_eval_env(&step, &make_span(&[]), &BTreeMap::new());
        // the ${var} token is not substituted
        assert_eq!(
            env["request"]["body"]["body"]["customerId"],
            json!("${customerId}")
        );
    }
}
