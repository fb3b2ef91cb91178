//! Guest Bridge CLI
//!
//! Command-line interface for running a WASM guest headlessly.
//!
//! # Usage
//!
//! ```bash
//! # Load a module and run its start export
//! guest-bridge app_bg.wasm
//!
//! # Call entry points, then pump 60 animation frames
//! guest-bridge app_bg.wasm --entry run --frames 60
//!
//! # JSON logs with a custom filter
//! GUEST_BRIDGE_LOG=host_bridge=trace guest-bridge app_bg.wasm --log-format json
//! ```

use clap::{Parser, ValueEnum};
use guest_bridge::{BridgeConfig, Loader, ModuleSource, RuntimeResult};
use std::path::PathBuf;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

/// Guest Bridge - run a WASM guest against the headless host
#[derive(Parser, Debug)]
#[command(name = "guest-bridge")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Load a WASM guest and drive it against a headless host", long_about = None)]
struct Args {
    /// Path to the WASM module
    #[arg(value_name = "MODULE")]
    module: PathBuf,

    /// Entry point to call after start (repeatable, called in order)
    #[arg(short, long = "entry", value_name = "NAME")]
    entries: Vec<String>,

    /// Animation frames to run after the entry points
    #[arg(long, default_value = "0")]
    frames: u32,

    /// Virtual milliseconds to keep firing timers before exiting
    #[arg(long, default_value = "10000")]
    idle_ms: f64,

    /// JSON configuration file
    #[arg(short, long, env = "GUEST_BRIDGE_CONFIG")]
    config: Option<PathBuf>,

    /// Buffer the module instead of parsing it while it streams
    #[arg(long)]
    no_streaming: bool,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Log output format
    #[arg(long, value_enum, default_value = "text")]
    log_format: LogFormat,
}

fn init_logging(verbose: bool, format: LogFormat) {
    let default_level = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_env("GUEST_BRIDGE_LOG")
        .unwrap_or_else(|_| EnvFilter::new(default_level));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false);

    match format {
        LogFormat::Text => builder.compact().init(),
        LogFormat::Json => builder.json().init(),
    }
}

async fn run(args: Args) -> RuntimeResult<()> {
    let mut config = match &args.config {
        Some(path) => BridgeConfig::from_file(path)?,
        None => BridgeConfig::default(),
    };
    if args.no_streaming {
        config = config.with_streaming(false);
    }

    info!("Configuration:");
    info!("  Module: {:?}", args.module);
    info!("  Streaming: {}", if config.streaming { "enabled" } else { "disabled" });
    info!("  Entries: {:?}", args.entries);
    info!("  Frames: {}", args.frames);

    let loader = Loader::new(config);
    let instance = loader.init(ModuleSource::from_path(&args.module)?).await?;
    let mut guest = instance.lock();

    for entry in &args.entries {
        guest.call(entry)?;
    }

    let mut callbacks = 0;
    for _ in 0..args.frames {
        callbacks += guest.animation_frame()?;
    }
    callbacks += guest.run_until_idle(args.idle_ms)?;
    let finalized = guest.sweep_closures()?;

    let stats = guest.loop_stats();
    let table = &guest.bridge().table;
    println!();
    println!("  entries called      {}", args.entries.len());
    println!("  frames run          {}", args.frames);
    println!("  callbacks run       {}", callbacks);
    println!("  live handles        {}", table.live());
    println!("  closures finalized  {}", finalized);
    println!(
        "  still queued        {} timers, {} frames, {} microtasks",
        stats.timers, stats.frames, stats.microtasks
    );
    Ok(())
}

#[tokio::main]
async fn main() {
    let args = Args::parse();
    init_logging(args.verbose, args.log_format);

    if !args.module.exists() {
        error!("WASM file not found: {:?}", args.module);
        std::process::exit(1);
    }

    if let Err(e) = run(args).await {
        error!("{}", e);
        std::process::exit(1);
    }
}
