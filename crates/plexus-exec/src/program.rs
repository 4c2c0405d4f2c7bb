//! Compiled programs and their invocation lifecycle.
//!
//! created -> arguments bound -> running -> per output: succeeded | failed
//! -> ended. Output failures are local to the output; any other error
//! aborts the rest of the run and fails every output not yet reported.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use tracing::Instrument;

use plexus_core::config::EngineConfig;
use plexus_core::error::{Error, Result};
use plexus_core::hash::{hash_serde, Hash256};
use plexus_core::id::{InvocationId, ValueId};
use plexus_core::ops::cast;
use plexus_core::schema::DataType;
use plexus_core::types::Value;
use plexus_plan::{ArgumentDecl, OutputDecl};

use crate::context::TaskContext;
use crate::eval::{eval, settle};
use crate::frame::{Frame, ProgramState};
use crate::handler::ResultHandler;
use crate::ir::Expr;
use crate::metrics::emit_span;
use crate::scheduler::Scheduler;

pub(crate) enum CompiledStep {
    Bind {
        slot: ValueId,
        name: String,
        ty: DataType,
        default: Option<Value>,
    },
    /// `slot` is `None` for void expressions.
    Evaluate {
        slot: Option<ValueId>,
        expr: Expr,
        context: Option<ValueId>,
    },
    Execute {
        expr: Expr,
        context: Option<ValueId>,
    },
    Output {
        name: String,
        ty: DataType,
        expr: Expr,
        context: Option<ValueId>,
    },
    End,
}

impl CompiledStep {
    fn kind(&self) -> &'static str {
        match self {
            CompiledStep::Bind { .. } => "bind",
            CompiledStep::Evaluate { .. } => "evaluate",
            CompiledStep::Execute { .. } => "execute",
            CompiledStep::Output { .. } => "output",
            CompiledStep::End => "end",
        }
    }
}

pub struct CompiledProgram {
    name: String,
    steps: Vec<CompiledStep>,
    arguments: Vec<ArgumentDecl>,
    outputs: Vec<OutputDecl>,
    slots: Vec<ValueId>,
    config: EngineConfig,
    scheduler: Arc<Scheduler>,
}

impl std::fmt::Debug for CompiledProgram {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompiledProgram")
            .field("name", &self.name)
            .field("steps", &self.steps.len())
            .field("arguments", &self.arguments)
            .field("outputs", &self.outputs)
            .finish()
    }
}

impl CompiledProgram {
    pub(crate) fn new(
        name: String,
        steps: Vec<CompiledStep>,
        arguments: Vec<ArgumentDecl>,
        outputs: Vec<OutputDecl>,
        slots: Vec<ValueId>,
        config: EngineConfig,
        scheduler: Arc<Scheduler>,
    ) -> Self {
        Self {
            name,
            steps,
            arguments,
            outputs,
            slots,
            config,
            scheduler,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn arguments(&self) -> &[ArgumentDecl] {
        &self.arguments
    }

    pub fn outputs(&self) -> &[OutputDecl] {
        &self.outputs
    }

    /// Stable hash of the program's name and its argument/output signature.
    pub fn signature(&self) -> Result<Hash256> {
        hash_serde(&(&self.name, &self.arguments, &self.outputs))
    }

    /// Run the program once, reporting every declared output to `handler`.
    ///
    /// Returns the root cause when the run is aborted; the handler has
    /// already seen `abort`, the failed outputs and `end` by then.
    pub async fn invoke(
        &self,
        handler: &mut dyn ResultHandler,
        args: &HashMap<String, Value>,
    ) -> Result<()> {
        let id = InvocationId::new();
        let span = tracing::info_span!("invoke", program = %self.name, invocation = %id);
        let context = TaskContext::builder()
            .timeout(self.config.default_timeout())
            .scheduler(self.scheduler.clone())
            .span(span.clone())
            .build();
        let state = Arc::new(ProgramState::new(
            self.slots.iter().copied(),
            self.config.max_stream_items,
        ));
        let frame = Frame::new(state, context);
        let mut reported = HashSet::new();

        let outcome = self
            .run(&frame, handler, args, &mut reported)
            .instrument(span.clone())
            .await;

        match outcome {
            Ok(()) => {
                for out in &self.outputs {
                    if !reported.contains(out.name.as_str()) {
                        handler.fail(
                            &out.name,
                            Error::Invariant(format!("output '{}' was never produced", out.name)),
                        );
                    }
                }
                frame.context.end();
                handler.end();
                Ok(())
            }
            Err(e) => {
                let root = e.into_root_cause();
                tracing::warn!(parent: &span, error = %root, "invocation aborted");
                handler.abort(&root);
                for out in &self.outputs {
                    if !reported.contains(out.name.as_str()) {
                        handler.fail(&out.name, root.clone());
                    }
                }
                frame.context.end();
                handler.end();
                Err(root)
            }
        }
    }

    async fn run(
        &self,
        frame: &Frame,
        handler: &mut dyn ResultHandler,
        args: &HashMap<String, Value>,
        reported: &mut HashSet<String>,
    ) -> Result<()> {
        for step in &self.steps {
            if let CompiledStep::Bind {
                slot,
                name,
                ty,
                default,
            } = step
            {
                let value = match (args.get(name), default) {
                    (Some(v), _) => v.clone(),
                    (None, Some(d)) => d.clone(),
                    (None, None) => {
                        return Err(Error::MissingArgument {
                            name: name.clone(),
                            ty: ty.to_string(),
                        })
                    }
                };
                let value = cast(value, ty).map_err(|e| e.wrap(format!("argument '{}'", name)))?;
                frame.program.write(*slot, value)?;
            }
        }

        for (i, step) in self.steps.iter().enumerate() {
            if self.config.trace_invocations {
                emit_span("step", &[("index", i.to_string()), ("kind", step.kind().to_string())]);
            }
            match step {
                CompiledStep::Bind { .. } => {}
                CompiledStep::Evaluate {
                    slot,
                    expr,
                    context,
                } => {
                    let inner = step_frame(frame, *context)?;
                    let v = eval(expr, &inner)
                        .await
                        .map_err(|e| e.wrap(format!("step {} ({})", i, step.kind())))?;
                    if let Some(slot) = slot {
                        frame.program.write(*slot, v)?;
                    }
                }
                CompiledStep::Execute { expr, context } => {
                    let inner = step_frame(frame, *context)?;
                    eval(expr, &inner)
                        .await
                        .map_err(|e| e.wrap(format!("step {} ({})", i, step.kind())))?;
                }
                CompiledStep::Output {
                    name,
                    ty,
                    expr,
                    context,
                } => {
                    if reported.contains(name) {
                        return Err(Error::Invariant(format!("output '{}' reported twice", name)));
                    }
                    let inner = step_frame(frame, *context)?;
                    match output_value(expr, ty, &inner).await {
                        Ok(v) => handler.succeed(name, v),
                        Err(e) => {
                            tracing::debug!(output = %name, error = %e, "output failed");
                            handler.fail(name, e.into_root_cause());
                        }
                    }
                    reported.insert(name.clone());
                }
                CompiledStep::End => break,
            }
        }
        Ok(())
    }
}

fn step_frame(frame: &Frame, context: Option<ValueId>) -> Result<Frame> {
    match context {
        None => Ok(frame.clone()),
        Some(id) => {
            let ctx = TaskContext::from_value(&frame.program.read(id)?)?;
            Ok(frame.with_context(ctx))
        }
    }
}

async fn output_value(expr: &Expr, ty: &DataType, frame: &Frame) -> Result<Value> {
    let v = eval(expr, frame).await?;
    let v = if matches!(ty, DataType::Future(_)) {
        v
    } else {
        settle(v, &frame.context).await?
    };
    cast(v, ty)
}
