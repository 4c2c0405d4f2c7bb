//! Stream pipelines compiled and run through whole programs.

use std::collections::HashMap;

use plexus_core::config::EngineConfig;
use plexus_core::ops::{ArithmeticOp, Comparison};
use plexus_core::schema::DataType;
use plexus_core::types::{Record, Value};
use plexus_exec::Engine;
use plexus_plan::dsl::build::*;
use plexus_plan::{ExprNode, ProgramBuilder, StreamPlan};

/// Run `plan` over `input` as the single output of a program.
async fn run_stream(input: ExprNode, plan: StreamPlan) -> Value {
    let mut b = ProgramBuilder::new("stream");
    b.output("out", DataType::Any, stream_execute(input, plan));
    let engine = Engine::new(EngineConfig::default()).expect("engine");
    let program = engine.compile(&b.build().expect("build")).expect("compile");
    let handler = engine.run(&program, &HashMap::new()).await;
    match handler.value("out") {
        Some(v) => v.clone(),
        None => panic!("output failed: {:?}", handler.error("out")),
    }
}

fn ints(v: &[i64]) -> Value {
    Value::List(v.iter().map(|&i| Value::I64(i)).collect())
}

fn rec(pairs: &[(&str, Value)]) -> Value {
    Value::Record(Record::from_pairs(pairs.iter().cloned()))
}

#[tokio::test]
async fn test_square_even_limit() {
    let plan = stream(vec![
        stage::transform(func(["x"], math(ArithmeticOp::Mult, local("x"), local("x")))),
        stage::filter(func(
            ["x"],
            eq(
                math(ArithmeticOp::Mod, local("x"), constant(2i64)),
                constant(0i64),
            ),
        )),
        stage::limit(constant(2i64)),
    ]);
    let out = run_stream(constant(vec![1i64, 2, 3, 4, 5, 6]), plan).await;
    assert_eq!(out, ints(&[4, 16]));
}

#[tokio::test]
async fn test_distinct() {
    let out = run_stream(
        constant(vec![1i64, 1, 2, 3, 3, 3]),
        stream(vec![stage::distinct()]),
    )
    .await;
    assert_eq!(out, ints(&[1, 2, 3]));
}

#[tokio::test]
async fn test_slice_offset_and_limit() {
    let out = run_stream(
        constant(vec![10i64, 20, 30, 40]),
        stream(vec![stage::slice(constant(1i64), constant(2i64))]),
    )
    .await;
    assert_eq!(out, ints(&[20, 30]));

    let skipped = run_stream(
        constant(vec![10i64, 20, 30, 40]),
        stream(vec![stage::offset(constant(3i64))]),
    )
    .await;
    assert_eq!(skipped, ints(&[40]));
}

#[tokio::test]
async fn test_order_by_then_flatten() {
    let plan = stream(vec![
        stage::order_by(func(["a", "b"], compare(length(local("a")), length(local("b"))))),
        stage::flatten(),
    ]);
    let input = constant(Value::List(vec![ints(&[1, 2, 3]), ints(&[4]), ints(&[5, 6])]));
    let out = run_stream(input, plan).await;
    assert_eq!(out, ints(&[4, 5, 6, 1, 2, 3]));
}

fn people() -> Value {
    Value::List(vec![
        rec(&[("id", Value::I64(1)), ("name", Value::str("ann"))]),
        rec(&[("id", Value::I64(2)), ("name", Value::str("bob"))]),
        rec(&[("id", Value::I64(3)), ("name", Value::str("cy"))]),
    ])
}

fn orders() -> Value {
    Value::List(vec![
        rec(&[("person", Value::I64(1)), ("amount", Value::I64(10))]),
        rec(&[("person", Value::I64(3)), ("amount", Value::I64(5))]),
        rec(&[("person", Value::I64(1)), ("amount", Value::I64(7))]),
        rec(&[("person", Value::I64(9)), ("amount", Value::I64(1))]),
    ])
}

fn join_output() -> plexus_plan::Function {
    func(
        ["l", "r"],
        record(vec![
            ("name", prop(local("l"), "name")),
            ("amount", prop(local("r"), "amount")),
        ]),
    )
}

#[tokio::test]
async fn test_inner_hash_join_pairs_matching_keys() {
    let plan = stream(vec![stage::hash_join(
        constant(orders()),
        func(["l"], prop(local("l"), "id")),
        func(["r"], prop(local("r"), "person")),
        join_output(),
    )]);
    let out = run_stream(constant(people()), plan).await;
    assert_eq!(
        out,
        Value::List(vec![
            rec(&[("name", Value::str("ann")), ("amount", Value::I64(10))]),
            rec(&[("name", Value::str("ann")), ("amount", Value::I64(7))]),
            rec(&[("name", Value::str("cy")), ("amount", Value::I64(5))]),
        ])
    );
}

#[tokio::test]
async fn test_outer_hash_join_keeps_unmatched_left_rows() {
    let plan = stream(vec![stage::outer_hash_join(
        constant(orders()),
        func(["l"], prop(local("l"), "id")),
        func(["r"], prop(local("r"), "person")),
        join_output(),
    )]);
    let out = run_stream(constant(people()), plan).await;
    let rows = out.as_list().expect("list");
    assert_eq!(rows.len(), 4);
    assert_eq!(
        rows[2],
        rec(&[("name", Value::str("bob")), ("amount", Value::Null)])
    );
}

#[tokio::test]
async fn test_group_by_counts_per_first_seen_key() {
    let plan = stream(vec![stage::group_by(
        func(["o"], prop(local("o"), "person")),
        func(
            ["k", "rows"],
            record(vec![
                ("person", local("k")),
                (
                    "total",
                    invoke(
                        "sum",
                        vec![foreach(local("rows"), func(["r"], prop(local("r"), "amount")))],
                    ),
                ),
                ("n", invoke("count", vec![local("rows")])),
            ]),
        ),
    )]);
    let out = run_stream(constant(orders()), plan).await;
    assert_eq!(
        out,
        Value::List(vec![
            rec(&[
                ("person", Value::I64(1)),
                ("total", Value::I64(17)),
                ("n", Value::I64(2))
            ]),
            rec(&[
                ("person", Value::I64(3)),
                ("total", Value::I64(5)),
                ("n", Value::I64(1))
            ]),
            rec(&[
                ("person", Value::I64(9)),
                ("total", Value::I64(1)),
                ("n", Value::I64(1))
            ]),
        ])
    );
}

#[tokio::test]
async fn test_scatter_preserves_positions() {
    // Larger inputs sleep less, so tasks finish in reverse order.
    let delay = math(
        ArithmeticOp::Sub,
        constant(40i64),
        math(ArithmeticOp::Mult, local("x"), constant(5i64)),
    );
    let plan = stream(vec![stage::scatter(func(
        ["x"],
        math(
            ArithmeticOp::Add,
            math(
                ArithmeticOp::Mult,
                async_invoke("sleep_ms", vec![delay]),
                constant(0i64),
            ),
            math(ArithmeticOp::Mult, local("x"), local("x")),
        ),
    ))]);
    let items: Vec<i64> = (0..8).collect();
    let out = run_stream(constant(items.clone()), plan).await;
    let expected: Vec<i64> = items.iter().map(|x| x * x).collect();
    assert_eq!(out, ints(&expected));
}

#[tokio::test]
async fn test_cross_join_with_per_row_right_side() {
    let plan = stream(vec![stage::cross(
        func(["l"], invoke("range", vec![local("l")])),
        func(
            ["l", "r"],
            array(vec![math(
                ArithmeticOp::Add,
                math(ArithmeticOp::Mult, local("l"), constant(10i64)),
                local("r"),
            )]),
        ),
    )]);
    let out = run_stream(constant(vec![1i64, 2]), plan).await;
    assert_eq!(out, ints(&[10, 20, 21]));
}

#[tokio::test]
async fn test_resolve_stage_awaits_async_items() {
    let plan = stream(vec![
        stage::transform(func(["x"], invoke("sleep_ms", vec![local("x")]))),
        stage::resolve(),
        stage::filter(func(["x"], cmp(Comparison::Gteq, local("x"), constant(2i64)))),
    ]);
    let out = run_stream(constant(vec![1i64, 2, 3]), plan).await;
    assert_eq!(out, ints(&[2, 3]));
}

#[tokio::test]
async fn test_stream_sink_feeds_created_stream() {
    let mut b = ProgramBuilder::new("sinks");
    let acc = b.evaluate(
        DataType::Any,
        stream_create(stream(vec![stage::distinct()])),
    );
    b.execute(stream_execute(
        constant(vec![3i64, 1, 3]),
        stream(vec![]).with_sink(stream_to(value(acc))),
    ));
    b.output(
        "collected",
        DataType::Any,
        stream_complete(value(acc), vec![constant(vec![1i64, 2])]),
    );
    let engine = Engine::new(EngineConfig::default()).expect("engine");
    let program = engine.compile(&b.build().expect("build")).expect("compile");
    let handler = engine.run(&program, &HashMap::new()).await;
    assert_eq!(handler.value("collected"), Some(&ints(&[3, 1, 2])));
}

#[tokio::test]
async fn test_nulls_never_reach_stages() {
    let plan = stream(vec![stage::transform(func(
        ["x"],
        math(ArithmeticOp::Add, local("x"), constant(1i64)),
    ))]);
    let input = constant(Value::List(vec![Value::I64(1), Value::Null, Value::I64(2)]));
    let out = run_stream(input, plan).await;
    assert_eq!(out, ints(&[2, 3]));
}
