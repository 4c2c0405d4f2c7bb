//! Engine: owns the configuration, the function registry and the shared
//! worker pool, and turns physical programs into runnable ones.

use std::collections::HashMap;
use std::sync::Arc;

use plexus_core::config::EngineConfig;
use plexus_core::types::Value;
use plexus_plan::PhysicalProgram;

use crate::compile::compile_program;
use crate::error::ExecError;
use crate::functions::FunctionRegistry;
use crate::handler::CollectingHandler;
use crate::program::CompiledProgram;
use crate::scheduler::Scheduler;

pub struct Engine {
    cfg: EngineConfig,
    registry: FunctionRegistry,
    scheduler: Arc<Scheduler>,
}

impl Engine {
    /// Engine with the builtin function library.
    pub fn new(cfg: EngineConfig) -> Result<Self, ExecError> {
        cfg.validate().map_err(|e| ExecError::Config(e.to_string()))?;
        let scheduler = Arc::new(Scheduler::new(cfg.max_parallel_tasks));
        Ok(Self {
            cfg,
            registry: FunctionRegistry::with_builtins(),
            scheduler,
        })
    }

    pub fn with_registry(mut self, registry: FunctionRegistry) -> Self {
        self.registry = registry;
        self
    }

    pub fn registry_mut(&mut self) -> &mut FunctionRegistry {
        &mut self.registry
    }

    pub fn config(&self) -> &EngineConfig {
        &self.cfg
    }

    /// Validate and compile. All type and operator errors surface here.
    pub fn compile(&self, program: &PhysicalProgram) -> Result<CompiledProgram, ExecError> {
        plexus_plan::validate(program)?;
        let compiled = compile_program(
            program,
            &self.registry,
            self.cfg.clone(),
            self.scheduler.clone(),
        )?;
        tracing::debug!(
            program = %compiled.name(),
            signature = %compiled.signature().map(|h| h.short()).unwrap_or_default(),
            arguments = compiled.arguments().len(),
            outputs = compiled.outputs().len(),
            "compiled program"
        );
        Ok(compiled)
    }

    /// Invoke `program` and collect what its handler saw. An aborted run is
    /// still returned; inspect `aborted()` on the handler.
    pub async fn run(
        &self,
        program: &CompiledProgram,
        args: &HashMap<String, Value>,
    ) -> CollectingHandler {
        let mut handler = CollectingHandler::new();
        if let Err(e) = program.invoke(&mut handler, args).await {
            tracing::info!(program = %program.name(), error = %e, "run aborted");
        }
        handler
    }
}
