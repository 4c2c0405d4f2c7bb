//! Function registry consulted by the compiler for INVOKE, CALL and NEW.
//!
//! Functions are resolved by name at compile time; the compiled node holds
//! the `Arc<dyn Invocable>` directly so evaluation never looks names up.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use futures::future::BoxFuture;

use plexus_core::error::{Error, Result};
use plexus_core::ops::{arithmetic, ArithmeticOp};
use plexus_core::schema::{DataType, Field};
use plexus_core::types::Value;

use crate::context::TaskContext;

/// A callable data-source or library function.
#[async_trait]
pub trait Invocable: Send + Sync {
    fn name(&self) -> &str;

    fn return_type(&self) -> DataType;

    /// Fixed argument count, checked at compile time. `None` is variadic.
    fn arity(&self) -> Option<usize> {
        None
    }

    /// Async functions are spawned by INVOKE and produce a future value.
    fn is_async(&self) -> bool {
        false
    }

    async fn invoke(&self, ctx: &TaskContext, args: Vec<Value>) -> Result<Value>;
}

type SyncBody = dyn Fn(Vec<Value>) -> Result<Value> + Send + Sync;
type AsyncBody = dyn Fn(TaskContext, Vec<Value>) -> BoxFuture<'static, Result<Value>> + Send + Sync;

enum Body {
    Sync(Box<SyncBody>),
    Async(Box<AsyncBody>),
}

/// `Invocable` over a closure.
pub struct FnInvocable {
    name: String,
    return_type: DataType,
    arity: Option<usize>,
    body: Body,
}

impl fmt::Debug for FnInvocable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FnInvocable")
            .field("name", &self.name)
            .field("return_type", &self.return_type)
            .field("arity", &self.arity)
            .field("async", &matches!(self.body, Body::Async(_)))
            .finish()
    }
}

#[async_trait]
impl Invocable for FnInvocable {
    fn name(&self) -> &str {
        &self.name
    }

    fn return_type(&self) -> DataType {
        self.return_type.clone()
    }

    fn arity(&self) -> Option<usize> {
        self.arity
    }

    fn is_async(&self) -> bool {
        matches!(self.body, Body::Async(_))
    }

    async fn invoke(&self, ctx: &TaskContext, args: Vec<Value>) -> Result<Value> {
        match &self.body {
            Body::Sync(f) => f(args),
            Body::Async(f) => f(ctx.clone(), args).await,
        }
    }
}

#[derive(Default)]
pub struct FunctionRegistry {
    functions: HashMap<String, Arc<dyn Invocable>>,
    types: HashMap<String, DataType>,
}

impl fmt::Debug for FunctionRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<&String> = self.functions.keys().collect();
        names.sort();
        f.debug_struct("FunctionRegistry")
            .field("functions", &names)
            .field("types", &self.types.len())
            .finish()
    }
}

impl FunctionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        register_builtins(&mut registry);
        registry
    }

    /// Later registrations replace earlier ones with the same name.
    pub fn register(&mut self, function: Arc<dyn Invocable>) {
        self.functions.insert(function.name().to_string(), function);
    }

    pub fn register_fn<F>(&mut self, name: &str, return_type: DataType, arity: Option<usize>, f: F)
    where
        F: Fn(Vec<Value>) -> Result<Value> + Send + Sync + 'static,
    {
        self.register(Arc::new(FnInvocable {
            name: name.to_string(),
            return_type,
            arity,
            body: Body::Sync(Box::new(f)),
        }));
    }

    pub fn register_async<F>(
        &mut self,
        name: &str,
        return_type: DataType,
        arity: Option<usize>,
        f: F,
    ) where
        F: Fn(TaskContext, Vec<Value>) -> BoxFuture<'static, Result<Value>> + Send + Sync + 'static,
    {
        self.register(Arc::new(FnInvocable {
            name: name.to_string(),
            return_type,
            arity,
            body: Body::Async(Box::new(f)),
        }));
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Invocable>> {
        self.functions.get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.functions.contains_key(name)
    }

    /// Named record type for RECORD_AS and NEW.
    pub fn declare_struct(&mut self, name: &str, fields: Vec<Field>) {
        self.types.insert(name.to_string(), DataType::Struct(fields));
    }

    pub fn struct_type(&self, name: &str) -> Option<&DataType> {
        self.types.get(name)
    }
}

fn invocation_error(name: &str, message: impl Into<String>) -> Error {
    Error::Invocation {
        name: name.to_string(),
        message: message.into(),
    }
}

fn map_str(name: &'static str, f: fn(&str) -> String) -> impl Fn(Vec<Value>) -> Result<Value> {
    move |args| match args.first() {
        Some(Value::Null) | None => Ok(Value::Null),
        Some(Value::Str(s)) => Ok(Value::Str(f(s))),
        Some(other) => Err(invocation_error(
            name,
            format!("expected a string, found {}", other.type_name()),
        )),
    }
}

fn int_arg(name: &str, v: &Value) -> Result<i64> {
    v.as_i64()
        .ok_or_else(|| invocation_error(name, format!("expected an integer, found {}", v.type_name())))
}

fn register_builtins(registry: &mut FunctionRegistry) {
    registry.register_fn("upper", DataType::Utf8, Some(1), map_str("upper", str::to_uppercase));
    registry.register_fn("lower", DataType::Utf8, Some(1), map_str("lower", str::to_lowercase));

    registry.register_fn("concat_str", DataType::Utf8, None, |args| {
        let mut out = String::new();
        for arg in args.iter().filter(|a| !a.is_null()) {
            match arg {
                Value::Str(s) => out.push_str(s),
                other => out.push_str(&other.to_string()),
            }
        }
        Ok(Value::Str(out))
    });

    // range(end) or range(start, end), end exclusive
    registry.register_fn("range", DataType::list(DataType::Int64), None, |args| {
        let (start, end) = match args.as_slice() {
            [end] => (0, int_arg("range", end)?),
            [start, end] => (int_arg("range", start)?, int_arg("range", end)?),
            _ => {
                return Err(invocation_error(
                    "range",
                    format!("expected 1 or 2 arguments, found {}", args.len()),
                ))
            }
        };
        Ok(Value::List((start..end).map(Value::I64).collect()))
    });

    registry.register_fn("sum", DataType::Any, Some(1), |mut args| {
        let items = args.pop().unwrap_or(Value::Null).into_items()?;
        let mut total = Value::I64(0);
        for item in items.iter().filter(|v| !v.is_null()) {
            total = arithmetic(ArithmeticOp::Add, &total, item)
                .map_err(|e| invocation_error("sum", e.to_string()))?;
        }
        Ok(total)
    });

    registry.register_fn("count", DataType::Int64, Some(1), |mut args| {
        let items = args.pop().unwrap_or(Value::Null).into_items()?;
        Ok(Value::I64(items.len() as i64))
    });

    registry.register_async("sleep_ms", DataType::Int64, Some(1), |ctx, args| {
        Box::pin(async move {
            let ms = match args.first() {
                Some(v) => int_arg("sleep_ms", v)?,
                None => 0,
            };
            let wait = std::time::Duration::from_millis(ms.max(0) as u64);
            ctx.run_timeout(async move {
                tokio::time::sleep(wait).await;
                Ok(Value::I64(ms))
            })
            .await
        })
    });
}
