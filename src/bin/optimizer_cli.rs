//! optimizer-cli: check optimizer configuration files and replay synthetic traffic.
//!
//! Usage:
//!   optimizer-cli validate <config>                          Validate a YAML/JSON config
//!   optimizer-cli simulate <config> --pipeline <name> [...]  Drive a pipeline with fake requests
//!   optimizer-cli version                                    Show version information

use anyhow::{anyhow, bail, Context};
use api_optimizer::middleware::{handler_fn, Request, Response, X_CACHE};
use api_optimizer::{ApiOptimizer, OptimizerConfig, PipelineConfig};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_writer(std::io::stderr)
        .init();

    let args: Vec<String> = std::env::args().collect();
    if args.len() < 2 {
        print_usage();
        std::process::exit(1);
    }

    let result = match args[1].as_str() {
        "validate" => cmd_validate(&args[2..]),
        "simulate" => cmd_simulate(&args[2..]).await,
        "version" | "--version" | "-V" => {
            cmd_version();
            Ok(())
        }
        "help" | "--help" | "-h" => {
            print_usage();
            Ok(())
        }
        other => {
            eprintln!("Unknown command: {other}");
            eprintln!();
            print_usage();
            std::process::exit(1);
        }
    };

    if let Err(e) = result {
        eprintln!("Error: {e:#}");
        std::process::exit(1);
    }
}

fn print_usage() {
    println!(
        r#"optimizer-cli - API optimizer configuration tool

USAGE:
    optimizer-cli <COMMAND> [OPTIONS]

COMMANDS:
    validate <config>                 Validate an optimizer config (.yaml/.yml/.json)
    simulate <config> [OPTIONS]       Send synthetic GET requests through a pipeline
        --pipeline <name>             Pipeline to exercise (required)
        --requests <n>                Number of requests (default 20)
        --clients <n>                 Distinct caller addresses (default 1)
        --path <path>                 Request path (default /api/items)
        --latency-ms <n>              Simulated handler latency (default 5)
    version                           Show version information
    help                              Show this help message

ENVIRONMENT:
    RUST_LOG                          Log filter, e.g. api_optimizer=debug"#
    );
}

fn cmd_version() {
    println!("optimizer-cli {}", env!("CARGO_PKG_VERSION"));
}

fn load_config(args: &[String]) -> anyhow::Result<(PathBuf, OptimizerConfig)> {
    let path = args
        .first()
        .filter(|a| !a.starts_with("--"))
        .map(PathBuf::from)
        .ok_or_else(|| anyhow!("missing <config> argument"))?;
    let config = OptimizerConfig::from_file(&path)
        .with_context(|| format!("failed to load {}", path.display()))?;
    Ok((path, config))
}

fn flag<'a>(args: &'a [String], name: &str) -> Option<&'a str> {
    args.iter()
        .position(|a| a == name)
        .and_then(|i| args.get(i + 1))
        .map(String::as_str)
}

fn numeric_flag(args: &[String], name: &str, default: u64) -> anyhow::Result<u64> {
    match flag(args, name) {
        Some(v) => v
            .parse()
            .with_context(|| format!("{name} expects a non-negative integer, got '{v}'")),
        None => Ok(default),
    }
}

fn describe(pipeline: &PipelineConfig) -> String {
    let mut stages = Vec::new();
    if pipeline.cache.is_enabled() {
        stages.push("cache");
    }
    if matches!(pipeline.rate_limit, api_optimizer::middleware::RateLimitStage::Enabled(_)) {
        stages.push("rate_limit");
    }
    if pipeline.metrics {
        stages.push("metrics");
    }
    if stages.is_empty() {
        "passthrough".to_string()
    } else {
        stages.join(" -> ")
    }
}

fn cmd_validate(args: &[String]) -> anyhow::Result<()> {
    let (path, config) = load_config(args)?;
    println!("{}: valid", path.display());
    println!(
        "  max_metrics={} max_cache_entries={} eager_expiry={} cache_enabled={}",
        config.max_metrics, config.max_cache_entries, config.eager_expiry, config.cache.enabled
    );
    if config.pipelines.is_empty() {
        println!("  (no pipelines declared)");
    }
    for (name, pipeline) in &config.pipelines {
        println!("  pipeline {name}: {}", describe(pipeline));
    }
    Ok(())
}

async fn cmd_simulate(args: &[String]) -> anyhow::Result<()> {
    let (_, config) = load_config(args)?;
    let name = flag(args, "--pipeline").ok_or_else(|| anyhow!("--pipeline <name> is required"))?;
    let requests = numeric_flag(args, "--requests", 20)?;
    let clients = numeric_flag(args, "--clients", 1)?.max(1);
    let latency = Duration::from_millis(numeric_flag(args, "--latency-ms", 5)?);
    let path = flag(args, "--path").unwrap_or("/api/items").to_string();

    let optimizer = ApiOptimizer::new(config)?;
    let handler = optimizer.named_pipeline(name)?.build(handler_fn(move |req: Request| async move {
        tokio::time::sleep(latency).await;
        Response::json(200, &serde_json::json!({ "path": req.path() }))
    }))?;

    let mut statuses: BTreeMap<u16, u64> = BTreeMap::new();
    let mut hits = 0u64;
    for i in 0..requests {
        let client = format!("10.0.0.{}", i % clients + 1);
        let req = Request::get(path.as_str()).with_remote_addr(client);
        match handler.handle(req).await {
            Ok(resp) => {
                *statuses.entry(resp.status).or_insert(0) += 1;
                if resp.header(X_CACHE) == Some("HIT") {
                    hits += 1;
                }
            }
            Err(e) => bail!("request {i} failed: {e}"),
        }
    }

    println!("pipeline {name}: {}", describe(handler.config()));
    println!("requests: {requests} from {clients} client(s)");
    for (status, count) in &statuses {
        println!("  HTTP {status}: {count}");
    }
    println!("  cache hits: {hits}");
    let stats = optimizer.stats().await?;
    println!("{}", serde_json::to_string_pretty(&stats)?);
    Ok(())
}
