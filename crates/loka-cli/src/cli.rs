// crates/loka-cli/src/cli.rs

//! Subcommand dispatch
//!
//! `serve` runs the gateway; the other subcommands are one-shot clients of
//! the same router stack, useful for poking at routing decisions and spend
//! without an HTTP client. Exit code 0 on success, 1 on any fatal error
//! (including a failed bind).

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use log::info;
use loka_core::config::LokaConfig;
use loka_core::types::{CompletionOptions, Message};
use loka_engines::build_pool;
use loka_gateway::{serve, AppState};
use loka_mesh::discovery::Discovery;
use loka_mesh::registry::NodeRegistry;
use loka_mesh::sleep::SleepManager;
use loka_mesh::types::{MeshNode, NodeCapabilities, NodeRole, NodeState};
use loka_router::recall::MemoryRecall;
use loka_router::search::SearchEngine;
use loka_router::trace::TraceLog;
use loka_router::Router;
use loka_storage::budget::BudgetLedger;
use loka_storage::memory::MemoryStore;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

#[derive(Parser)]
#[command(name = "loka", version, about = "Local-first LLM gateway")]
pub struct Cli {
    /// Path to the YAML config file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the HTTP gateway
    Serve {
        /// Address to bind; loopback by default
        #[arg(long, default_value = "127.0.0.1:8080")]
        bind: SocketAddr,
    },
    /// Explain how a prompt would route, without executing it
    Route {
        prompt: Vec<String>,
    },
    /// One-shot completion through the router
    Ask {
        prompt: Vec<String>,
    },
    /// Budget totals and query counts
    Cost,
    /// Available providers and their rates
    Models,
    /// Check every provider
    Health,
}

pub async fn run() -> Result<()> {
    let cli = Cli::parse();
    let config = load_config(cli.config.as_deref())?;

    match cli.command {
        Command::Serve { bind } => {
            let router = build_router(&config).await?;
            spawn_mesh(&config).await;
            let state = AppState {
                router,
                api_key: LokaConfig::gateway_api_key(),
                started: Instant::now(),
            };
            serve(state, bind).await
        }
        Command::Route { prompt } => {
            let router = build_router(&config).await?;
            let explanation = router.route_explain(&[Message::user(prompt.join(" "))]).await?;
            println!("{}", serde_json::to_string_pretty(&explanation)?);
            Ok(())
        }
        Command::Ask { prompt } => {
            let router = build_router(&config).await?;
            let decision = router
                .route(&[Message::user(prompt.join(" "))], &CompletionOptions::default())
                .await?;
            println!("{}", decision.response.content);
            eprintln!(
                "[{} | {} | {:.4} EUR | {}ms]",
                decision.tier, decision.model, decision.response.cost_eur, decision.response.latency_ms
            );
            Ok(())
        }
        Command::Cost => {
            let config_budget = config.budget;
            let budget = BudgetLedger::new(&data_dir()?.join("budget.db"), config_budget).await?;
            let summary = budget.summary().await?;
            println!(
                "today: {:.4} EUR / {:.2} EUR\nmonth: {:.4} EUR / {:.2} EUR\nlifetime: {:.4} EUR over {} queries",
                summary.today_eur,
                config_budget.daily_eur,
                summary.month_eur,
                config_budget.monthly_eur,
                summary.lifetime_eur,
                summary.query_count
            );
            Ok(())
        }
        Command::Models => {
            let pool = build_pool(&config)?;
            for provider in pool.all() {
                println!(
                    "{}\t{}\t{:.4} EUR/1k in\t{:.4} EUR/1k out",
                    provider.name(),
                    provider.model(),
                    provider.cost_per_1k_input_eur(),
                    provider.cost_per_1k_output_eur()
                );
            }
            Ok(())
        }
        Command::Health => {
            let pool = build_pool(&config)?;
            let mut any_down = false;
            for provider in pool.all() {
                let healthy = provider.health_check().await;
                println!("{}\t{}", provider.name(), if healthy { "ok" } else { "unavailable" });
                any_down |= !healthy;
            }
            if any_down {
                anyhow::bail!("one or more providers are unavailable");
            }
            Ok(())
        }
    }
}

fn load_config(path: Option<&Path>) -> Result<LokaConfig> {
    match path {
        Some(path) => LokaConfig::load(path),
        None => {
            let default = PathBuf::from("loka.yaml");
            if default.exists() {
                LokaConfig::load(&default)
            } else {
                Ok(LokaConfig::default())
            }
        }
    }
}

fn data_dir() -> Result<PathBuf> {
    let dir = std::env::var("LOKA_DATA_DIR")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from(".loka"));
    std::fs::create_dir_all(&dir)
        .with_context(|| format!("could not create data dir {}", dir.display()))?;
    Ok(dir)
}

async fn build_router(config: &LokaConfig) -> Result<Arc<Router>> {
    let pool = Arc::new(build_pool(config)?);
    let dir = data_dir()?;

    let budget = Arc::new(BudgetLedger::new(&dir.join("budget.db"), config.budget).await?);

    let recall = if config.memory.enabled {
        let store = Arc::new(MemoryStore::new(&dir.join("memory.db")).await?);
        Some(MemoryRecall::new(
            store,
            &config.memory.session_id,
            config.memory.top_k,
        ))
    } else {
        None
    };

    let search = if config.search.enabled {
        let engine = SearchEngine::with_default_sources(
            pool.next_local(),
            &config.search.sources,
            config.search.min_score,
            config.search.max_results,
        );
        engine.has_sources().then_some(engine)
    } else {
        None
    };

    let trace_log = Arc::new(TraceLog::new(dir.join("loka-router.log")));
    Ok(Arc::new(Router::new(
        pool,
        budget,
        config.clone(),
        recall,
        search,
        trace_log,
    )))
}

/// Self-register the local workers as mesh nodes, then start discovery and
/// the sleep loop
async fn spawn_mesh(config: &LokaConfig) {
    if !config.mesh.enabled {
        return;
    }
    let registry = Arc::new(NodeRegistry::new());
    for base_url in &config.local.base_urls {
        let (ip, port) = parse_endpoint(base_url);
        registry
            .upsert(MeshNode {
                id: base_url.clone(),
                name: format!("worker@{}", ip),
                role: NodeRole::Standard,
                state: NodeState::Online,
                ip,
                port,
                region: None,
                capabilities: NodeCapabilities {
                    models: vec![config.local.model.clone()],
                    ..Default::default()
                },
                last_seen: chrono::Utc::now(),
                mac_address: None,
                tokens_per_sec: 0.0,
                queue_depth: 0,
                thermal_celsius: 0.0,
                battery_stress: 0.0,
            })
            .await;
    }
    let local_id = config
        .local
        .base_urls
        .first()
        .cloned()
        .unwrap_or_else(|| "gateway".to_string());
    let discovery = Arc::new(Discovery::new(Arc::clone(&registry), &local_id));
    if let Some(own) = registry.get(&local_id).await {
        tokio::spawn(Arc::clone(&discovery).announce(own));
    }
    tokio::spawn(Arc::clone(&discovery).listen());
    tokio::spawn(discovery.sweep());

    let manager = Arc::new(SleepManager::new(
        registry,
        config.mesh.idle_minutes,
        config.mesh.wake_on_lan,
    ));
    info!("mesh scheduler enabled ({} min idle window)", config.mesh.idle_minutes);
    tokio::spawn(manager.run());
}

fn parse_endpoint(base_url: &str) -> (String, u16) {
    match url::Url::parse(base_url) {
        Ok(parsed) => (
            parsed.host_str().unwrap_or("127.0.0.1").to_string(),
            parsed.port().unwrap_or(11434),
        ),
        Err(_) => ("127.0.0.1".to_string(), 11434),
    }
}
