//! Tree-walking evaluator over compiled IR.
//!
//! Evaluation is async because RESOLVE, ENFORCE_TIMEOUT, async CALLs,
//! stream stages and joins suspend. Everything else completes without
//! yielding.

use std::collections::BTreeMap;
use std::sync::Arc;

use futures::future::BoxFuture;
use futures::FutureExt;
use regex::Regex;

use plexus_core::error::{Error, Result};
use plexus_core::ops::{self, truthy};
use plexus_core::schema::DataType;
use plexus_core::types::{AsyncValue, Record, Value};

use crate::compile::anchored;
use crate::context::TaskContext;
use crate::frame::Frame;
use crate::ir::{Node, NodeKind, Pattern, ProjectStep};
use crate::join;
use crate::stream::{self, StreamHandle};

/// Evaluate `node` in `frame`.
pub fn eval<'a>(node: &'a Node, frame: &'a Frame) -> BoxFuture<'a, Result<Value>> {
    eval_node(node, frame).boxed()
}

async fn eval_all(nodes: &[Arc<Node>], frame: &Frame) -> Result<Vec<Value>> {
    let mut out = Vec::with_capacity(nodes.len());
    for n in nodes {
        out.push(eval(n, frame).await?);
    }
    Ok(out)
}

/// Await `v` under the frame's deadline if it is still pending.
pub(crate) async fn settle(v: Value, ctx: &TaskContext) -> Result<Value> {
    match v {
        Value::Future(pending) => ctx.resolve(pending).await,
        other => Ok(other),
    }
}

fn as_int(v: &Value, what: &str) -> Result<i64> {
    v.as_i64()
        .ok_or_else(|| Error::Type(format!("{} must be an integer, found {}", what, v.type_name())))
}

async fn eval_node(node: &Node, frame: &Frame) -> Result<Value> {
    match &node.kind {
        NodeKind::Const(v) => Ok(v.clone()),
        NodeKind::Local(name) => frame
            .locals
            .get(name)
            .cloned()
            .ok_or_else(|| Error::Invariant(format!("local '{}' is not bound", name))),
        NodeKind::Slot(id) => frame.program.read(*id),

        NodeKind::Invoke { function, args } => {
            let args = eval_all(args, frame).await?;
            if function.is_async() {
                let f = function.clone();
                let ctx = frame.context.clone();
                let task = frame
                    .context
                    .scheduler()
                    .spawn(async move { f.invoke(&ctx, args).await });
                Ok(Value::Future(AsyncValue::new(task)))
            } else {
                function.invoke(&frame.context, args).await
            }
        }
        NodeKind::Call { function, args } => {
            let args = eval_all(args, frame).await?;
            let out = if function.is_async() {
                frame
                    .context
                    .run_timeout(function.invoke(&frame.context, args))
                    .await?
            } else {
                function.invoke(&frame.context, args).await?
            };
            ops::cast(settle(out, &frame.context).await?, &node.ty)
        }
        NodeKind::New { args } => {
            let values = eval_all(args, frame).await?;
            let names: Vec<String> = match &node.ty {
                DataType::Struct(fields) => fields.iter().map(|f| f.name.clone()).collect(),
                other => return Err(Error::Type(format!("cannot construct {}", other))),
            };
            let record = Record::from_pairs(names.into_iter().zip(values));
            ops::cast(Value::Record(record), &node.ty)
        }

        NodeKind::Case {
            branches,
            otherwise,
        } => {
            for (test, then) in branches {
                if truthy(&eval(test, frame).await?) {
                    return eval(then, frame).await;
                }
            }
            eval(otherwise, frame).await
        }
        NodeKind::Coalesce(exprs) => {
            for e in exprs {
                let v = eval(e, frame).await?;
                if !v.is_null() {
                    return Ok(v);
                }
            }
            Ok(Value::Null)
        }
        NodeKind::Catch { primary, fallback } => match eval(primary, frame).await {
            Ok(v) => Ok(v),
            Err(e) => {
                tracing::debug!(loc = %node.loc, error = %e, "catch: using fallback");
                eval(fallback, frame).await
            }
        },

        NodeKind::And(exprs) => {
            for e in exprs {
                if !truthy(&eval(e, frame).await?) {
                    return Ok(Value::Bool(false));
                }
            }
            Ok(Value::Bool(true))
        }
        NodeKind::Or(exprs) => {
            for e in exprs {
                if truthy(&eval(e, frame).await?) {
                    return Ok(Value::Bool(true));
                }
            }
            Ok(Value::Bool(false))
        }
        NodeKind::Not(e) => Ok(Value::Bool(!truthy(&eval(e, frame).await?))),
        NodeKind::Bool(e) => Ok(Value::Bool(truthy(&eval(e, frame).await?))),
        NodeKind::IsNull(e) => Ok(Value::Bool(eval(e, frame).await?.is_null())),

        NodeKind::Eq(l, r) => {
            let (a, b) = (eval(l, frame).await?, eval(r, frame).await?);
            Ok(Value::Bool(ops::equals(&a, &b)))
        }
        NodeKind::Neq(l, r) => {
            let (a, b) = (eval(l, frame).await?, eval(r, frame).await?);
            Ok(Value::Bool(!ops::equals(&a, &b)))
        }
        NodeKind::BoolCompare(op, l, r) => {
            let (a, b) = (eval(l, frame).await?, eval(r, frame).await?);
            Ok(Value::Bool(ops::compare_op(*op, &a, &b)))
        }
        NodeKind::Compare(l, r) => {
            let (a, b) = (eval(l, frame).await?, eval(r, frame).await?);
            Ok(Value::I32(ops::compare(&a, &b) as i32))
        }
        NodeKind::MultiCompare(exprs) => {
            for e in exprs {
                let v = eval(e, frame).await?;
                let n = if v.is_null() { 0 } else { as_int(&v, "comparison")? };
                if n != 0 {
                    return Ok(Value::I32(n.signum() as i32));
                }
            }
            Ok(Value::I32(0))
        }
        NodeKind::In { value, collection } => {
            let v = eval(value, frame).await?;
            let c = eval(collection, frame).await?;
            Ok(Value::Bool(ops::contains(&c, &v)))
        }
        NodeKind::Matches { value, pattern } => {
            let v = eval(value, frame).await?;
            let text = match &v {
                Value::Null => return Ok(Value::Bool(false)),
                Value::Str(s) => s.as_str(),
                other => {
                    return Err(Error::Type(format!(
                        "matches expects a string, found {}",
                        other.type_name()
                    )))
                }
            };
            let matched = match pattern {
                Pattern::Fixed(re) => re.is_match(text),
                Pattern::Dynamic(p) => match eval(p, frame).await? {
                    Value::Null => false,
                    Value::Str(p) => Regex::new(&anchored(&p))
                        .map_err(|e| Error::Type(format!("invalid pattern: {}", e)))?
                        .is_match(text),
                    other => {
                        return Err(Error::Type(format!(
                            "pattern must be a string, found {}",
                            other.type_name()
                        )))
                    }
                },
            };
            Ok(Value::Bool(matched))
        }

        NodeKind::Math(op, l, r) => {
            let (a, b) = (eval(l, frame).await?, eval(r, frame).await?);
            ops::arithmetic(*op, &a, &b)
        }
        NodeKind::Negate(e) => ops::negate(&eval(e, frame).await?),

        NodeKind::Record {
            names,
            values,
            checked,
        } => {
            let values = eval_all(values, frame).await?;
            let record = Value::Record(Record::from_pairs(names.iter().cloned().zip(values)));
            if *checked {
                ops::cast(record, &node.ty)
            } else {
                Ok(record)
            }
        }
        NodeKind::Project { steps, map } => {
            let mut out = Record::new();
            for step in steps {
                match step {
                    ProjectStep::Field(name, e) => out.set(name.clone(), eval(e, frame).await?),
                    ProjectStep::Merge(e) => match eval(e, frame).await? {
                        Value::Null => {}
                        Value::Record(r) => out.merge(&r),
                        Value::Map(m) => {
                            for (k, v) in m {
                                out.set(k, v);
                            }
                        }
                        other => {
                            return Err(Error::Type(format!(
                                "project cannot merge {}",
                                other.type_name()
                            )))
                        }
                    },
                }
            }
            if *map {
                Ok(Value::Map(out.into_fields().into_iter().collect::<BTreeMap<_, _>>()))
            } else {
                Ok(Value::Record(out))
            }
        }
        NodeKind::Array(exprs) => Ok(Value::List(eval_all(exprs, frame).await?)),
        NodeKind::Index {
            target,
            index,
            default,
        } => {
            let t = eval(target, frame).await?;
            let i = eval(index, frame).await?;
            let found = match (&t, &i) {
                (Value::Null, _) | (_, Value::Null) => None,
                (Value::List(items), idx) => {
                    let n = as_int(idx, "list index")?;
                    let hit = usize::try_from(n).ok().and_then(|n| items.get(n)).cloned();
                    if hit.is_none() && default.is_none() {
                        return Err(Error::Exec(format!(
                            "index {} out of range for list of length {}",
                            n,
                            items.len()
                        )));
                    }
                    hit
                }
                (Value::Record(_) | Value::Map(_), Value::Str(key)) => t.property(key).cloned(),
                (other, idx) => {
                    return Err(Error::Type(format!(
                        "cannot index {} with {}",
                        other.type_name(),
                        idx.type_name()
                    )))
                }
            };
            match (found, default) {
                (Some(v), _) => Ok(v),
                (None, Some(d)) => eval(d, frame).await,
                (None, None) => Ok(Value::Null),
            }
        }
        NodeKind::Prop {
            target,
            name,
            default,
        } => {
            let t = eval(target, frame).await?;
            let found = match &t {
                Value::Null => None,
                Value::Record(_) | Value::Map(_) => t.property(name).cloned(),
                other => {
                    return Err(Error::Type(format!(
                        "{} has no property '{}'",
                        other.type_name(),
                        name
                    )))
                }
            };
            match (found, default) {
                (Some(v), _) => Ok(v),
                (None, Some(d)) => eval(d, frame).await,
                (None, None) => Ok(Value::Null),
            }
        }
        NodeKind::Concat(exprs) => {
            let mut out = Vec::new();
            for e in exprs {
                out.extend(eval(e, frame).await?.into_items()?);
            }
            Ok(Value::List(out))
        }
        NodeKind::First(e) => Ok(eval(e, frame)
            .await?
            .into_items()?
            .into_iter()
            .next()
            .unwrap_or(Value::Null)),
        NodeKind::Length(e) => {
            let n = match eval(e, frame).await? {
                Value::Null => 0,
                Value::Str(s) => s.chars().count(),
                Value::Bin(b) => b.len(),
                Value::List(items) => items.len(),
                Value::Record(r) => r.len(),
                Value::Map(m) => m.len(),
                other => {
                    return Err(Error::Type(format!("{} has no length", other.type_name())))
                }
            };
            Ok(Value::I64(n as i64))
        }
        NodeKind::Singleton(e) => match eval(e, frame).await? {
            Value::Null => Ok(Value::List(Vec::new())),
            v => Ok(Value::List(vec![v])),
        },
        NodeKind::Foreach { input, function } => {
            let items = eval(input, frame).await?.into_items()?;
            let param = function.params.first().cloned();
            let mut out = Vec::with_capacity(items.len());
            for item in items {
                let inner = match &param {
                    Some(p) => frame.bind(p.clone(), item),
                    None => frame.clone(),
                };
                out.push(eval(&function.body, &inner).await?);
            }
            Ok(Value::List(out))
        }
        NodeKind::Cast(e) => ops::cast(eval(e, frame).await?, &node.ty),
        NodeKind::Serialize(e) => {
            let v = eval(e, frame).await?;
            let json = serde_json::to_string(&v.to_json()?)?;
            Ok(Value::Str(json))
        }
        NodeKind::Deserialize(e) => match eval(e, frame).await? {
            Value::Null => Ok(Value::Null),
            Value::Str(s) => {
                let json: serde_json::Value = serde_json::from_str(&s)
                    .map_err(|e| Error::Type(format!("invalid serialized value: {}", e)))?;
                ops::cast(Value::from_json(json), &node.ty)
            }
            other => Err(Error::Type(format!(
                "deserialize expects a string, found {}",
                other.type_name()
            ))),
        },
        NodeKind::GenerateKeys { names, values } => {
            let mut columns: Vec<(String, Vec<Value>)> = Vec::new();
            for (name, e) in names.iter().zip(values) {
                let items = eval(e, frame).await?.into_items()?;
                let pos = match columns.iter().position(|(n, _)| n == name) {
                    Some(pos) => pos,
                    None => {
                        columns.push((name.clone(), Vec::new()));
                        columns.len() - 1
                    }
                };
                let column = &mut columns[pos].1;
                for item in items {
                    if !column.contains(&item) {
                        column.push(item);
                    }
                }
            }
            Ok(Value::List(cartesian_keys(columns)))
        }

        NodeKind::RootContext => Ok(frame.context.root().into_value()),
        NodeKind::CurrentContext => Ok(frame.context.clone().into_value()),
        NodeKind::TraceContext { names, values } => {
            let values = eval_all(values, frame).await?;
            let dims = names
                .iter()
                .cloned()
                .zip(values.iter().map(|v| v.to_string()))
                .collect();
            Ok(frame.context.start(dims).into_value())
        }
        NodeKind::TimeoutMax { amount, unit } => match eval(amount, frame).await? {
            Value::Null => Ok(frame.context.clone().into_value()),
            v => {
                let d = unit.to_duration(as_int(&v, "timeout")?);
                Ok(frame.context.timeout(d).into_value())
            }
        },
        NodeKind::TimeoutGuard {
            min,
            min_unit,
            max,
            max_unit,
        } => {
            let min = min_unit.to_duration(as_int(&eval(min, frame).await?, "minimum timeout")?);
            let max = max_unit.to_duration(as_int(&eval(max, frame).await?, "maximum timeout")?);
            Ok(frame.context.timeout_guard(min, max)?.into_value())
        }
        NodeKind::TimeoutRemaining(unit) => {
            Ok(Value::I64(unit.from_duration(frame.context.remaining())))
        }
        NodeKind::EndContext(e) => {
            let ctx = TaskContext::from_value(&eval(e, frame).await?)?;
            ctx.end();
            Ok(Value::Null)
        }
        NodeKind::WithContext { context, body } => {
            let ctx = TaskContext::from_value(&eval(context, frame).await?)?;
            let inner = frame.with_context(ctx.clone());
            let out = eval(body, &inner).await;
            ctx.end();
            out
        }
        NodeKind::Enforce { captures, body } => {
            let body = body.clone();
            let inner = frame.with_locals(frame.locals.capture(captures));
            frame
                .context
                .enforce(async move {
                    let v = eval(&body, &inner).await?;
                    settle(v, &inner.context).await
                })
                .await
        }
        NodeKind::Resolve(e) => settle(eval(e, frame).await?, &frame.context).await,

        NodeKind::StreamExecute { input, stream } => {
            let input = settle(eval(input, frame).await?, &frame.context).await?;
            stream::execute(stream, frame, input.into_items()?).await
        }
        NodeKind::StreamCreate { stream } => {
            Ok(StreamHandle::new(stream.clone(), frame).into_value())
        }
        NodeKind::StreamComplete { stream, inputs } => {
            let handle = StreamHandle::from_value(&eval(stream, frame).await?)?;
            for input in inputs {
                handle.extend(eval(input, frame).await?.into_items()?)?;
            }
            handle.complete(frame).await
        }

        NodeKind::Join { arms, body } => join::eval_join(arms, body, frame).await,
    }
}

/// Cartesian product of de-duplicated key columns, as records in column
/// order. Any empty column yields no keys.
fn cartesian_keys(columns: Vec<(String, Vec<Value>)>) -> Vec<Value> {
    if columns.is_empty() || columns.iter().any(|(_, c)| c.is_empty()) {
        return Vec::new();
    }
    let mut keys = vec![Record::new()];
    for (name, column) in &columns {
        keys = keys
            .into_iter()
            .flat_map(|key| {
                column.iter().map(move |v| {
                    let mut next = key.clone();
                    next.set(name.clone(), v.clone());
                    next
                })
            })
            .collect();
    }
    keys.into_iter().map(Value::Record).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compile::Compiler;
    use crate::frame::ProgramState;
    use crate::functions::FunctionRegistry;
    use plexus_core::ops::{ArithmeticOp, Comparison};
    use plexus_plan::dsl::build::*;
    use plexus_plan::ExprNode;

    async fn run(e: ExprNode) -> Result<Value> {
        let registry = FunctionRegistry::with_builtins();
        let node = Compiler::new(&registry).compile(&e).expect("compile");
        let frame = Frame::new(
            Arc::new(ProgramState::new([], None)),
            TaskContext::builder().build(),
        );
        eval(&node, &frame).await
    }

    fn ints(v: &[i64]) -> Value {
        Value::List(v.iter().map(|&i| Value::I64(i)).collect())
    }

    #[tokio::test]
    async fn test_case_picks_first_true_branch() {
        let e = if_else(
            constant(false),
            constant("a"),
            if_else(constant(true), constant("b"), constant("c")),
        );
        assert_eq!(run(e).await.expect("run"), Value::str("b"));
    }

    #[tokio::test]
    async fn test_null_aware_comparisons() {
        assert_eq!(
            run(eq(null(DataType::Int64), null(DataType::Int64))).await.expect("run"),
            Value::Bool(true)
        );
        assert_eq!(
            run(cmp(Comparison::Lt, null(DataType::Int64), constant(1i64)))
                .await
                .expect("run"),
            Value::Bool(false)
        );
        assert_eq!(
            run(compare(null(DataType::Int64), constant(1i64))).await.expect("run"),
            Value::I32(-1)
        );
    }

    #[tokio::test]
    async fn test_matches_is_anchored_and_null_safe() {
        assert_eq!(
            run(matches(constant("abc"), constant("a.c"))).await.expect("run"),
            Value::Bool(true)
        );
        assert_eq!(
            run(matches(constant("xabc"), constant("a.c"))).await.expect("run"),
            Value::Bool(false)
        );
        assert_eq!(
            run(matches(null(DataType::Utf8), constant("a.c"))).await.expect("run"),
            Value::Bool(false)
        );
    }

    #[tokio::test]
    async fn test_catch_recovers_from_any_error() {
        let failing = index(array(vec![constant(1i64)]), constant(5i64));
        assert!(run(failing.clone()).await.is_err());
        assert_eq!(
            run(catch(failing, constant(0i64))).await.expect("run"),
            Value::I64(0)
        );
    }

    #[tokio::test]
    async fn test_project_later_fields_override() {
        let e = project(
            vec![
                field("a", constant(1i64)),
                field("b", constant(2i64)),
                merge(record(vec![("a", constant(10i64))])),
                field("b", constant(20i64)),
            ],
            false,
        );
        let out = run(e).await.expect("run");
        let r = out.as_record().expect("record");
        assert_eq!(r.get("a"), Some(&Value::I64(10)));
        assert_eq!(r.get("b"), Some(&Value::I64(20)));
        assert_eq!(r.names().collect::<Vec<_>>(), vec!["a", "b"]);
    }

    #[tokio::test]
    async fn test_prop_default_and_foreach() {
        let target = record(vec![("x", constant(1i64))]);
        assert_eq!(
            run(prop_or(target.clone(), "y", constant(9i64))).await.expect("run"),
            Value::I64(9)
        );
        let doubled = foreach(
            constant(vec![1i64, 2, 3]),
            func(["v"], math(ArithmeticOp::Mult, local("v"), constant(2i64))),
        );
        assert_eq!(run(doubled).await.expect("run"), ints(&[2, 4, 6]));
    }

    #[tokio::test]
    async fn test_generate_keys_dedups_and_crosses() {
        let e = generate_keys(vec![
            ("a", constant(vec![1i64, 1, 2])),
            ("b", constant(vec!["x"])),
        ]);
        let keys = run(e).await.expect("run");
        let keys = keys.as_list().expect("list");
        assert_eq!(keys.len(), 2);
        assert_eq!(keys[1].property("a"), Some(&Value::I64(2)));
        assert_eq!(keys[1].property("b"), Some(&Value::str("x")));

        let empty = generate_keys(vec![("a", constant(vec![1i64])), ("b", array(vec![]))]);
        assert_eq!(run(empty).await.expect("run"), Value::List(vec![]));
    }

    #[tokio::test]
    async fn test_async_invoke_resolves_under_deadline() {
        let out = run(async_invoke("sleep_ms", vec![constant(1i64)])).await.expect("run");
        assert_eq!(out, Value::I64(1));

        let pending = run(invoke("sleep_ms", vec![constant(1i64)])).await.expect("run");
        assert!(matches!(pending, Value::Future(_)));
    }

    #[tokio::test]
    async fn test_enforce_timeout_fails_slow_body() {
        let slow = with_context(
            timeout_max(constant(10i64), plexus_core::time::TimeUnit::Milliseconds),
            enforce_timeout(async_invoke("sleep_ms", vec![constant(5_000i64)])),
        );
        let err = run(slow).await.expect_err("run should fail");
        assert!(err.is_timeout());
    }
}
