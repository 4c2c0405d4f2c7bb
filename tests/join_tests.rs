//! JOIN: concurrently produced inputs gathered before the body runs.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use plexus_core::config::EngineConfig;
use plexus_core::ops::ArithmeticOp;
use plexus_core::schema::DataType;
use plexus_core::types::Value;
use plexus_exec::join::JoinTask;
use plexus_exec::{CollectingHandler, Engine};
use plexus_plan::dsl::build::*;
use plexus_plan::{ExprNode, ProgramBuilder};

async fn run_output(expr: ExprNode) -> CollectingHandler {
    let mut b = ProgramBuilder::new("join");
    b.output("out", DataType::Any, expr);
    let engine = Engine::new(EngineConfig::default()).expect("engine");
    let program = engine.compile(&b.build().expect("build")).expect("compile");
    engine.run(&program, &HashMap::new()).await
}

fn add(a: ExprNode, b: ExprNode) -> ExprNode {
    math(ArithmeticOp::Add, a, b)
}

#[tokio::test]
async fn test_join_body_sees_every_named_value() {
    let expr = join(
        vec![
            join_input(&["a"], async_invoke("sleep_ms", vec![constant(20i64)])),
            join_input(&["b"], constant(2i64)),
            join_input(
                &["c", "d"],
                record(vec![("d", constant(4i64)), ("c", constant(3i64))]),
            ),
        ],
        add(add(local("a"), local("b")), add(local("c"), local("d"))),
    );
    let handler = run_output(expr).await;
    assert_eq!(handler.value("out"), Some(&Value::I64(29)));
}

#[tokio::test]
async fn test_unresolved_future_input_is_awaited() {
    let expr = join(
        vec![
            join_input(&["slow"], invoke("sleep_ms", vec![constant(15i64)])),
            join_input(&["fast"], constant(1i64)),
        ],
        array(vec![local("slow"), local("fast")]),
    );
    let handler = run_output(expr).await;
    assert_eq!(
        handler.value("out"),
        Some(&Value::List(vec![Value::I64(15), Value::I64(1)]))
    );
}

#[tokio::test]
async fn test_failed_producer_fails_the_output() {
    let expr = join(
        vec![
            join_input(&["a"], index(array(vec![]), constant(1i64))),
            join_input(&["b"], constant(2i64)),
        ],
        local("b"),
    );
    let handler = run_output(expr).await;
    assert!(handler.error("out").is_some());
    assert!(handler.aborted().is_none());
}

#[tokio::test]
async fn test_effect_only_join_runs_body_after_inputs() {
    let expr = join(
        vec![join_input(&[], async_invoke("sleep_ms", vec![constant(1i64)]))],
        constant("done"),
    );
    let handler = run_output(expr).await;
    assert_eq!(handler.value("out"), Some(&Value::str("done")));
}

#[test]
fn test_duplicate_join_names_rejected_at_compile_time() {
    let mut b = ProgramBuilder::new("dup");
    b.output(
        "out",
        DataType::Any,
        join(
            vec![
                join_input(&["a"], constant(1i64)),
                join_input(&["a"], constant(2i64)),
            ],
            local("a"),
        ),
    );
    let engine = Engine::new(EngineConfig::default()).expect("engine");
    assert!(engine.compile(&b.build().expect("build")).is_err());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn test_any_interleaving_fires_exactly_once() {
    for round in 0..20 {
        let fired = Arc::new(AtomicUsize::new(0));
        let observed = Arc::new(Mutex::new(Vec::new()));
        let (f, o) = (fired.clone(), observed.clone());
        let mut task = JoinTask::new(move |bound| {
            f.fetch_add(1, Ordering::SeqCst);
            *o.lock().expect("lock") = bound;
        });
        let names: Vec<Arc<str>> = (0..12).map(|i| Arc::from(format!("in{}", i))).collect();
        for n in &names {
            task.add_value(n.clone()).expect("add_value");
        }
        let task = Arc::new(task);

        let mut handles = Vec::new();
        for (i, n) in names.iter().enumerate() {
            let sender = task.create_runnable(std::slice::from_ref(n)).expect("create_runnable");
            handles.push(tokio::spawn(async move {
                if (i + round) % 3 == 0 {
                    tokio::task::yield_now().await;
                }
                sender.send(vec![Value::I64(i as i64)])
            }));
        }
        let mut firing = 0;
        for handle in handles {
            if handle.await.expect("join").expect("send") {
                firing += 1;
            }
        }

        assert_eq!(firing, 1);
        assert_eq!(fired.load(Ordering::SeqCst), 1);
        let observed = observed.lock().expect("lock");
        assert_eq!(observed.len(), 12);
        for (i, (name, v)) in observed.iter().enumerate() {
            assert_eq!(name, &names[i]);
            assert_eq!(v, &Value::I64(i as i64));
        }
    }
}
