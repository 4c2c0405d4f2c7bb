//! Program lifecycle: argument binding, per-output reporting, aborts.

use std::collections::HashMap;

use plexus_core::config::EngineConfig;
use plexus_core::error::Error;
use plexus_core::ops::ArithmeticOp;
use plexus_core::schema::DataType;
use plexus_core::time::TimeUnit;
use plexus_core::types::Value;
use plexus_exec::{CollectingHandler, Engine, HandlerEvent};
use plexus_plan::dsl::build::*;
use plexus_plan::{PhysicalProgram, ProgramBuilder};

fn engine() -> Engine {
    Engine::new(EngineConfig::default()).expect("engine")
}

fn args(pairs: &[(&str, Value)]) -> HashMap<String, Value> {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.clone()))
        .collect()
}

fn square_program() -> PhysicalProgram {
    let mut b = ProgramBuilder::new("square");
    let x = b.required_argument("x", DataType::Int64).expect("arg");
    let sq = b.evaluate(DataType::Any, math(ArithmeticOp::Mult, value(x), value(x)));
    b.output("square", DataType::Int64, value(sq));
    b.output(
        "bad",
        DataType::Int64,
        index(array(vec![]), constant(3i64)),
    );
    b.output("label", DataType::Utf8, invoke("upper", vec![constant("ok")]));
    b.build().expect("build")
}

#[tokio::test]
async fn test_every_output_reported_once_then_end() {
    let engine = engine();
    let program = engine.compile(&square_program()).expect("compile");
    let handler = engine.run(&program, &args(&[("x", Value::I64(7))])).await;

    assert_eq!(handler.terminal_calls(), 3);
    assert!(handler.ended());
    assert!(handler.aborted().is_none());
    assert_eq!(handler.value("square"), Some(&Value::I64(49)));
    assert!(matches!(handler.error("bad"), Some(Error::Exec(_))));
    assert_eq!(handler.value("label"), Some(&Value::str("OK")));

    // Reporting order follows declaration order.
    let names: Vec<&str> = handler
        .events
        .iter()
        .filter_map(|e| match e {
            HandlerEvent::Succeeded(n, _) | HandlerEvent::Failed(n, _) => Some(n.as_str()),
            _ => None,
        })
        .collect();
    assert_eq!(names, vec!["square", "bad", "label"]);
}

#[tokio::test]
async fn test_missing_argument_names_the_argument() {
    let engine = engine();
    let program = engine.compile(&square_program()).expect("compile");
    let mut handler = CollectingHandler::new();
    let err = program
        .invoke(&mut handler, &HashMap::new())
        .await
        .expect_err("invoke should fail");

    assert!(matches!(&err, Error::MissingArgument { name, .. } if name == "x"));
    assert!(matches!(
        handler.events.first(),
        Some(HandlerEvent::Aborted(Error::MissingArgument { .. }))
    ));
    assert_eq!(handler.terminal_calls(), 3);
    assert!(handler.value("square").is_none());
    assert!(matches!(
        handler.error("label"),
        Some(Error::MissingArgument { .. })
    ));
    assert!(handler.ended());
}

#[tokio::test]
async fn test_optional_argument_default_and_cast() {
    let mut b = ProgramBuilder::new("defaults");
    let n = b
        .optional_argument("n", DataType::Int64, Value::I64(5))
        .expect("arg");
    b.output("n", DataType::Int64, value(n));
    let engine = engine();
    let program = engine.compile(&b.build().expect("build")).expect("compile");

    let defaulted = engine.run(&program, &HashMap::new()).await;
    assert_eq!(defaulted.value("n"), Some(&Value::I64(5)));

    let supplied = engine.run(&program, &args(&[("n", Value::I32(7))])).await;
    assert_eq!(supplied.value("n"), Some(&Value::I64(7)));

    // Names that are not declared arguments are ignored.
    let extra = engine
        .run(&program, &args(&[("other", Value::I64(1))]))
        .await;
    assert_eq!(extra.value("n"), Some(&Value::I64(5)));
}

#[tokio::test]
async fn test_step_failure_aborts_with_root_cause() {
    let mut b = ProgramBuilder::new("abort");
    b.output("early", DataType::Int64, constant(1i64));
    let v = b.evaluate(
        DataType::Any,
        index(array(vec![constant(1i64)]), constant(9i64)),
    );
    b.output("late", DataType::Any, value(v));
    let engine = engine();
    let program = engine.compile(&b.build().expect("build")).expect("compile");

    let handler = engine.run(&program, &HashMap::new()).await;
    assert_eq!(handler.value("early"), Some(&Value::I64(1)));
    // The step wrapper is unwound before reporting.
    assert!(matches!(handler.aborted(), Some(Error::Exec(_))));
    assert!(matches!(handler.error("late"), Some(Error::Exec(_))));
    assert_eq!(handler.terminal_calls(), 2);
    assert!(handler.ended());
}

#[tokio::test]
async fn test_catch_recovers_inside_output() {
    let mut b = ProgramBuilder::new("catch");
    b.output(
        "safe",
        DataType::Int64,
        catch(index(array(vec![]), constant(0i64)), constant(-1i64)),
    );
    let engine = engine();
    let program = engine.compile(&b.build().expect("build")).expect("compile");
    let handler = engine.run(&program, &HashMap::new()).await;
    assert_eq!(handler.value("safe"), Some(&Value::I64(-1)));
}

#[tokio::test]
async fn test_timeout_fails_only_the_affected_output() {
    let mut b = ProgramBuilder::new("deadline");
    b.output(
        "slow",
        DataType::Int64,
        with_context(
            timeout_max(constant(20i64), TimeUnit::Milliseconds),
            enforce_timeout(async_invoke("sleep_ms", vec![constant(5_000i64)])),
        ),
    );
    b.output("fast", DataType::Int64, constant(1i64));
    let engine = engine();
    let program = engine.compile(&b.build().expect("build")).expect("compile");

    let handler = engine.run(&program, &HashMap::new()).await;
    assert!(handler.error("slow").map(Error::is_timeout).unwrap_or(false));
    assert_eq!(handler.value("fast"), Some(&Value::I64(1)));
    assert!(handler.aborted().is_none());
}

#[tokio::test]
async fn test_step_context_applies_to_later_steps() {
    let mut b = ProgramBuilder::new("contexts");
    let short = b.evaluate(
        DataType::Any,
        timeout_max(constant(15i64), TimeUnit::Milliseconds),
    );
    b.use_context(Some(short));
    b.output(
        "limited",
        DataType::Int64,
        async_invoke("sleep_ms", vec![constant(5_000i64)]),
    );
    b.use_context(None);
    b.output(
        "unlimited",
        DataType::Int64,
        async_invoke("sleep_ms", vec![constant(1i64)]),
    );
    let engine = engine();
    let program = engine.compile(&b.build().expect("build")).expect("compile");

    let handler = engine.run(&program, &HashMap::new()).await;
    assert!(handler.error("limited").map(Error::is_timeout).unwrap_or(false));
    assert_eq!(handler.value("unlimited"), Some(&Value::I64(1)));
}

#[tokio::test]
async fn test_guarded_evaluate_resolves_async_value() {
    let mut b = ProgramBuilder::new("guarded");
    let v = b.evaluate_guarded(
        DataType::Any,
        invoke("sleep_ms", vec![constant(2i64)]),
    );
    b.output("v", DataType::Int64, value(v));
    let engine = engine();
    let program = engine.compile(&b.build().expect("build")).expect("compile");
    let handler = engine.run(&program, &HashMap::new()).await;
    assert_eq!(handler.value("v"), Some(&Value::I64(2)));
}

#[tokio::test]
async fn test_metadata_available_before_invocation() {
    let engine = engine();
    let program = engine.compile(&square_program()).expect("compile");
    assert_eq!(program.name(), "square");
    assert_eq!(program.arguments().len(), 1);
    assert!(program.arguments()[0].is_required());
    let outputs: Vec<&str> = program.outputs().iter().map(|o| o.name.as_str()).collect();
    assert_eq!(outputs, vec!["square", "bad", "label"]);

    let again = engine.compile(&square_program()).expect("compile");
    assert_eq!(
        program.signature().expect("hash"),
        again.signature().expect("hash")
    );
}

#[test]
fn test_compile_errors_surface_before_running() {
    let engine = engine();
    let mut b = ProgramBuilder::new("broken");
    b.output(
        "oops",
        DataType::Any,
        math(ArithmeticOp::Add, constant("a"), constant(1i64)),
    );
    let err = engine.compile(&b.build().expect("build")).expect_err("compile should fail");
    assert!(matches!(
        err,
        plexus_exec::ExecError::Compile(plexus_exec::CompileError::TypeUnification { .. })
    ));

    let mut b = ProgramBuilder::new("unknown");
    b.output("oops", DataType::Any, invoke("no_such_fn", vec![]));
    assert!(engine.compile(&b.build().expect("build")).is_err());
}

#[test]
fn test_slot_type_mismatch_rejected_at_compile_time() {
    let engine = engine();
    let mut b = ProgramBuilder::new("mistyped");
    let v = b.evaluate(DataType::Int64, constant("abc"));
    b.output(
        "next",
        DataType::Int64,
        math(ArithmeticOp::Add, value(v), constant(1i64)),
    );
    let err = engine
        .compile(&b.build().expect("build"))
        .expect_err("string stored into an int64 slot");
    assert!(matches!(
        err,
        plexus_exec::ExecError::Compile(plexus_exec::CompileError::TypeUnification {
            op: "evaluate",
            ..
        })
    ));

    // Widening into a declared slot is fine.
    let mut b = ProgramBuilder::new("widened");
    let v = b.evaluate(DataType::Int64, constant(2i32));
    b.output("next", DataType::Int64, value(v));
    assert!(engine.compile(&b.build().expect("build")).is_ok());
}

#[tokio::test]
async fn test_out_of_range_argument_aborts_instead_of_wrapping() {
    let mut b = ProgramBuilder::new("narrow");
    let x = b.required_argument("x", DataType::Int32).expect("arg");
    b.output("x", DataType::Int32, value(x));
    let engine = engine();
    let program = engine.compile(&b.build().expect("build")).expect("compile");

    let handler = engine
        .run(&program, &args(&[("x", Value::I64(5_000_000_000))]))
        .await;
    assert!(matches!(handler.aborted(), Some(Error::Type(_))));
    assert!(handler.value("x").is_none());
    assert!(matches!(handler.error("x"), Some(Error::Type(_))));

    let handler = engine.run(&program, &args(&[("x", Value::I64(7))])).await;
    assert_eq!(handler.value("x"), Some(&Value::I32(7)));
}
