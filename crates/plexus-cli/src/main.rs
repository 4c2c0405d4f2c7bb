//! plexus CLI: compile and run program documents.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use plexus_core::config::EngineConfig;
use plexus_core::types::Value;
use plexus_exec::{Engine, HandlerEvent};
use plexus_plan::{parse_program, PhysicalProgram};

#[derive(Parser)]
#[command(name = "plexus")]
#[command(about = "Compile and run physical programs", long_about = None)]
struct Cli {
    /// Log at debug level (RUST_LOG still wins when set)
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a program document and print every output
    Run {
        /// Path to the program document (YAML or JSON)
        #[arg(short, long)]
        program: PathBuf,

        /// Argument as name=json; repeatable
        #[arg(short, long = "arg", value_parser = parse_arg)]
        args: Vec<(String, Value)>,

        /// Root deadline in milliseconds (overrides config)
        #[arg(long)]
        timeout_ms: Option<u64>,

        /// Maximum parallel tasks (overrides config)
        #[arg(long)]
        max_parallel: Option<usize>,
    },

    /// Parse, validate and compile a program document
    Validate {
        #[arg(short, long)]
        program: PathBuf,
    },

    /// Show the arguments, outputs and signature of a program
    Describe {
        #[arg(short, long)]
        program: PathBuf,
    },
}

fn parse_arg(s: &str) -> Result<(String, Value), String> {
    let (name, raw) = s
        .split_once('=')
        .ok_or_else(|| format!("expected name=json, got '{}'", s))?;
    // Bare words are taken as strings so `--arg city=Paris` works.
    let value = match serde_json::from_str::<serde_json::Value>(raw) {
        Ok(json) => Value::from_json(json),
        Err(_) => Value::str(raw),
    };
    Ok((name.trim().to_string(), value))
}

fn init_logging(verbose: bool) {
    let fallback = if verbose { "plexus=debug,plexus_exec=debug" } else { "warn" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(fallback));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

fn load(path: &Path) -> Result<PhysicalProgram, Box<dyn std::error::Error>> {
    let src = fs::read_to_string(path)?;
    Ok(parse_program(&src)?)
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let outcome = match cli.command {
        Commands::Run {
            program,
            args,
            timeout_ms,
            max_parallel,
        } => run_program(&program, args, timeout_ms, max_parallel).await,
        Commands::Validate { program } => validate_program(&program),
        Commands::Describe { program } => describe_program(&program),
    };
    if let Err(e) = outcome {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

async fn run_program(
    path: &Path,
    args: Vec<(String, Value)>,
    timeout_ms: Option<u64>,
    max_parallel: Option<usize>,
) -> Result<(), Box<dyn std::error::Error>> {
    let program = load(path)?;

    let mut config = EngineConfig::from_env();
    if let Some(ms) = timeout_ms {
        config.default_timeout_ms = ms;
    }
    if let Some(n) = max_parallel {
        config.max_parallel_tasks = n;
    }

    let engine = Engine::new(config)?;
    let compiled = engine.compile(&program)?;
    let args: HashMap<String, Value> = args.into_iter().collect();
    let handler = engine.run(&compiled, &args).await;

    let mut failed = false;
    for event in &handler.events {
        match event {
            HandlerEvent::Succeeded(name, value) => {
                let json = value.to_json().unwrap_or(serde_json::Value::Null);
                println!("{} = {}", name, json);
            }
            HandlerEvent::Failed(name, error) => {
                failed = true;
                println!("{} failed: {}", name, error);
            }
            HandlerEvent::Aborted(error) => {
                failed = true;
                eprintln!("run aborted: {}", error);
            }
            HandlerEvent::Ended => {}
        }
    }
    if failed {
        return Err(format!("program '{}' reported failures", compiled.name()).into());
    }
    Ok(())
}

fn validate_program(path: &Path) -> Result<(), Box<dyn std::error::Error>> {
    let program = load(path)?;
    let engine = Engine::new(EngineConfig::from_env())?;
    engine.compile(&program)?;
    println!("✓ Program '{}' is valid", program.name);
    Ok(())
}

fn describe_program(path: &Path) -> Result<(), Box<dyn std::error::Error>> {
    let program = load(path)?;
    let engine = Engine::new(EngineConfig::from_env())?;
    let compiled = engine.compile(&program)?;

    println!("Program: {}", compiled.name());
    println!("Signature: {}", compiled.signature()?.to_hex());
    println!();
    println!("Arguments:");
    for arg in compiled.arguments() {
        match &arg.default {
            None => println!("  {}: {} (required)", arg.name, arg.data_type),
            Some(d) => println!("  {}: {} = {}", arg.name, arg.data_type, d),
        }
    }
    println!();
    println!("Outputs:");
    for out in compiled.outputs() {
        println!("  {}: {}", out.name, out.data_type);
    }
    Ok(())
}
