//! Roost CLI — the main entry point.
//!
//! Commands:
//! - `serve`   — Start the HTTP gateway
//! - `models`  — Print the model catalog
//! - `doctor`  — Check provider availability and system state

use std::sync::Arc;

use anyhow::Result;
use clap::{Parser, Subcommand};
use roost_config::AppConfig;
use roost_core::{SharedClock, SystemClock};
use roost_providers::{LocalSlots, ProviderRegistry, SlotConfig, ollama_vram_probe};
use roost_workflow::{
    CiStatusProbe, DiskPressureProbe, P0IssueProbe, ServerHealthProbe, SignalProbe,
    SystemStateDetector,
};

#[derive(Parser)]
#[command(
    name = "roost",
    about = "Roost — agent orchestration server. Complexity-aware model routing with typed fallback chains.",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the HTTP gateway server
    Serve {
        /// Override the port
        #[arg(short, long)]
        port: Option<u16>,

        /// Override the bind host (e.g. 0.0.0.0 for Docker)
        #[arg(long)]
        host: Option<String>,
    },

    /// Print the model catalog
    Models,

    /// Check provider availability and system state
    Doctor,
}

fn init_tracing(verbose: bool) {
    let default_filter = if verbose { "debug" } else { "info" };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_filter));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match cli.command {
        Commands::Serve { port, host } => {
            let mut config = AppConfig::from_env();
            if let Some(port) = port {
                config.server.port = port;
            }
            if let Some(host) = host {
                config.server.bind_host = host;
            }
            roost_gateway::serve(config)
                .await
                .map_err(|e| anyhow::anyhow!(e.to_string()))?;
        }
        Commands::Models => {
            print_models();
        }
        Commands::Doctor => {
            run_doctor().await;
        }
    }

    Ok(())
}

fn print_models() {
    println!(
        "{:<20} {:<10} {:>6} {:>10} {:>10}  flags",
        "MODEL", "PROVIDER", "TIER", "$/M IN", "$/M OUT"
    );
    for model in roost_telemetry::catalog() {
        let mut flags = Vec::new();
        if model.supports_tools {
            flags.push("tools");
        }
        if model.supports_thinking {
            flags.push("thinking");
        }
        if model.supports_subagents {
            flags.push("subagents");
        }
        if model.supports_web_search {
            flags.push("web");
        }
        println!(
            "{:<20} {:<10} {:>6} {:>10.2} {:>10.2}  {}",
            model.id,
            model.provider.as_str(),
            model.tier,
            model.input_per_m,
            model.output_per_m,
            flags.join(",")
        );
    }
}

async fn run_doctor() {
    let config = AppConfig::from_env();
    let slots = LocalSlots::new(
        SlotConfig::from_ollama(&config.ollama),
        Some(ollama_vram_probe(
            config.ollama.host.clone(),
            std::time::Duration::from_secs(5),
        )),
    );
    let registry = ProviderRegistry::from_config(&config, slots);

    println!("Providers:");
    for kind in registry.kinds() {
        let provider = registry.get(kind).expect("listed kind must resolve");
        let available = provider.is_available().await;
        println!(
            "  {:<10} {}",
            kind.as_str(),
            if available { "available" } else { "unreachable" }
        );
    }
    if registry.is_empty() {
        println!("  (none registered — set ANTHROPIC_API_KEY, OPENAI_API_KEY, or run ollama)");
    }
    println!(
        "Routing mode: {}",
        if registry.local_only() { "local-only" } else { "cloud" }
    );

    let clock: SharedClock = Arc::new(SystemClock);
    let health_url = format!(
        "http://{}:{}/api/health",
        config.server.bind_host, config.server.port
    );
    let probes: Vec<Arc<dyn SignalProbe>> = vec![
        Arc::new(CiStatusProbe {
            branch: "main".into(),
        }),
        Arc::new(P0IssueProbe),
        Arc::new(ServerHealthProbe::new(health_url)),
        Arc::new(DiskPressureProbe),
    ];
    let detector = SystemStateDetector::new(probes, clock);
    let result = detector.detect().await;

    println!("System state:");
    for state in &result.states {
        println!("  {}", state.as_str());
    }
    if !result.details.is_empty() {
        println!(
            "Details: {}",
            serde_json::to_string_pretty(&result.details).unwrap_or_default()
        );
    }
}
