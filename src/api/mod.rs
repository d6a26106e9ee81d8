use axum::{
    Router,
    extract::{Json, Query},
    http::{StatusCode, header},
    response::{IntoResponse, Response},
    routing::get,
};
use clap::{Args, Parser, Subcommand, ValueEnum};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::PathBuf;
use thiserror::Error;
use tokio::net::TcpListener;
use tracing::{info, warn};

use crate::config::{ConfigError, ConfigOverrides, SimulationConfig, load_config};
use crate::core::{MarketMode, SimError, SimulationSummary, StrategyRegistry, summarize};
use crate::export::export_csv;

/// Upper bound on `years * paths` for a single HTTP request.
const MAX_API_CELLS: u64 = 2_000_000;

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
enum CliMarketMode {
    Lognormal,
    Bootstrap,
}

impl From<CliMarketMode> for MarketMode {
    fn from(value: CliMarketMode) -> Self {
        match value {
            CliMarketMode::Lognormal => MarketMode::Lognormal,
            CliMarketMode::Bootstrap => MarketMode::Bootstrap,
        }
    }
}

#[derive(Parser, Debug)]
#[command(
    name = "nestegg",
    about = "Monte Carlo retirement withdrawal simulator"
)]
pub struct Cli {
    /// Log at debug level unless RUST_LOG says otherwise
    #[arg(long, short, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run a simulation and print its summary
    Run(RunArgs),
    /// List the available withdrawal strategies
    Strategies,
    /// Serve the JSON API
    Serve {
        #[arg(long, default_value_t = 8080)]
        port: u16,
    },
}

#[derive(Args, Debug, Default)]
pub struct RunArgs {
    #[arg(long, short, help = "YAML config file; flags override its values")]
    config: Option<PathBuf>,
    #[arg(long)]
    strategy: Option<String>,
    #[arg(long)]
    years: Option<u32>,
    #[arg(long)]
    paths: Option<u32>,
    #[arg(long)]
    seed: Option<u64>,
    #[arg(long)]
    init_balance: Option<f64>,
    #[arg(long, help = "Equity allocation between 0 and 1")]
    equity_pct: Option<f64>,
    #[arg(long)]
    fees_bps: Option<f64>,
    #[arg(long, value_enum)]
    market_mode: Option<CliMarketMode>,
    #[arg(long)]
    start_age: Option<u32>,
    #[arg(long, help = "Initial withdrawal rate for four_percent_rule")]
    rate: Option<f64>,
    #[arg(long, help = "Share of balance withdrawn by constant_pct")]
    percent: Option<f64>,
    #[arg(long)]
    alpha: Option<f64>,
    #[arg(long)]
    beta: Option<f64>,
    #[arg(long, help = "Moving-average window for endowment, in years")]
    window: Option<usize>,
    #[arg(long)]
    initial_rate: Option<f64>,
    #[arg(long)]
    guard_pct: Option<f64>,
    #[arg(long)]
    raise_pct: Option<f64>,
    #[arg(long)]
    cut_pct: Option<f64>,
    #[arg(long)]
    vpw_table_path: Option<PathBuf>,
    #[arg(long, help = "YAML list of {return, inflation} years for bootstrap mode")]
    history_path: Option<PathBuf>,
    #[arg(long)]
    block_size: Option<usize>,
    #[arg(long, short, help = "Write the full results table as CSV")]
    output: Option<PathBuf>,
}

impl RunArgs {
    fn into_parts(self) -> (Option<PathBuf>, ConfigOverrides) {
        let overrides = ConfigOverrides {
            strategy: self.strategy,
            years: self.years,
            paths: self.paths,
            seed: self.seed,
            init_balance: self.init_balance,
            equity_pct: self.equity_pct,
            fees_bps: self.fees_bps,
            market_mode: self.market_mode.map(Into::into),
            start_age: self.start_age,
            rate: self.rate,
            percent: self.percent,
            alpha: self.alpha,
            beta: self.beta,
            window: self.window,
            initial_rate: self.initial_rate,
            guard_pct: self.guard_pct,
            raise_pct: self.raise_pct,
            cut_pct: self.cut_pct,
            vpw_table_path: self.vpw_table_path,
            history_path: self.history_path,
            block_size: self.block_size,
            output: self.output,
            ..ConfigOverrides::default()
        };
        (self.config, overrides)
    }
}

#[derive(Debug, Error)]
pub enum CliError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Simulation(#[from] SimError),

    #[error("failed to write results: {0}")]
    Export(#[from] std::io::Error),
}

pub fn build_config(args: RunArgs) -> Result<SimulationConfig, ConfigError> {
    let (path, overrides) = args.into_parts();
    let mut config = match path {
        Some(path) => load_config(&path)?,
        None => SimulationConfig::default(),
    };
    overrides.apply(&mut config);
    config.validate()?;
    Ok(config)
}

pub fn run_command(args: RunArgs) -> Result<(), CliError> {
    let config = build_config(args)?;
    let resolved = config.resolve(&StrategyRegistry::builtin())?;
    let table = resolved.run()?;
    let summary = summarize(&table);
    print_summary(&config, &summary);

    if let Some(path) = &config.output {
        export_csv(&table, path)?;
        println!("Results written to {}", path.display());
    }
    Ok(())
}

pub fn list_strategies() {
    for entry in StrategyRegistry::builtin().entries() {
        println!("{:<20} {}", entry.name, entry.description);
    }
}

fn print_summary(config: &SimulationConfig, summary: &SimulationSummary) {
    println!(
        "Strategy {} | {} market | {} paths x {} years | seed {}",
        config.strategy, config.market_mode, summary.paths, summary.years, config.seed
    );
    println!("Success rate:          {:>14.1}%", summary.success_rate * 100.0);
    println!("Depleted paths:        {:>14}", summary.depleted_paths);
    println!("Final balance p10:     {:>14.0}", summary.p10_final_balance);
    println!("Final balance median:  {:>14.0}", summary.median_final_balance);
    println!("Final balance p90:     {:>14.0}", summary.p90_final_balance);
    println!("Final balance mean:    {:>14.0}", summary.mean_final_balance);
    println!("Median total withdrawn:{:>14.0}", summary.median_total_withdrawn);
    println!();
    println!(
        "{:>5} {:>5} {:>14} {:>14} {:>14} {:>12} {:>9}",
        "year", "age", "p10", "median", "p90", "withdrawal", "depleted"
    );
    for band in &summary.yearly {
        let age = band.age.map(|a| a.to_string()).unwrap_or_default();
        println!(
            "{:>5} {:>5} {:>14.0} {:>14.0} {:>14.0} {:>12.0} {:>9}",
            band.year,
            age,
            band.p10_balance,
            band.median_balance,
            band.p90_balance,
            band.median_withdrawal,
            band.depleted_paths
        );
    }
}

/// Scalar run parameters accepted over HTTP. Data files are not reachable from
/// here, so bootstrap mode and custom VPW tables are CLI only.
#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase", deny_unknown_fields)]
struct SimulatePayload {
    strategy: Option<String>,
    years: Option<u32>,
    paths: Option<u32>,
    seed: Option<u64>,
    init_balance: Option<f64>,
    equity_pct: Option<f64>,
    fees_bps: Option<f64>,
    market_mode: Option<MarketMode>,
    start_age: Option<u32>,

    rate: Option<f64>,
    percent: Option<f64>,
    alpha: Option<f64>,
    beta: Option<f64>,
    window: Option<usize>,
    initial_rate: Option<f64>,
    guard_pct: Option<f64>,
    raise_pct: Option<f64>,
    cut_pct: Option<f64>,

    equity_mean: Option<f64>,
    equity_vol: Option<f64>,
    bond_mean: Option<f64>,
    bond_vol: Option<f64>,
    correlation: Option<f64>,
    inflation_mean: Option<f64>,
    inflation_vol: Option<f64>,
    block_size: Option<usize>,
}

impl From<SimulatePayload> for ConfigOverrides {
    fn from(p: SimulatePayload) -> Self {
        ConfigOverrides {
            strategy: p.strategy,
            years: p.years,
            paths: p.paths,
            seed: p.seed,
            init_balance: p.init_balance,
            equity_pct: p.equity_pct,
            fees_bps: p.fees_bps,
            market_mode: p.market_mode,
            start_age: p.start_age,
            rate: p.rate,
            percent: p.percent,
            alpha: p.alpha,
            beta: p.beta,
            window: p.window,
            initial_rate: p.initial_rate,
            guard_pct: p.guard_pct,
            raise_pct: p.raise_pct,
            cut_pct: p.cut_pct,
            equity_mean: p.equity_mean,
            equity_vol: p.equity_vol,
            bond_mean: p.bond_mean,
            bond_vol: p.bond_vol,
            correlation: p.correlation,
            inflation_mean: p.inflation_mean,
            inflation_vol: p.inflation_vol,
            block_size: p.block_size,
            ..ConfigOverrides::default()
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SimulateResponse {
    strategy: &'static str,
    market_mode: MarketMode,
    seed: u64,
    summary: SimulationSummary,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct StrategyInfo {
    name: &'static str,
    description: &'static str,
}

#[derive(Debug, Serialize)]
struct ErrorResponse {
    error: String,
}

pub async fn run_http_server(port: u16) -> std::io::Result<()> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let app = Router::new()
        .route(
            "/api/simulate",
            get(simulate_get_handler).post(simulate_post_handler),
        )
        .route("/api/strategies", get(strategies_handler))
        .fallback(not_found_handler);

    let listener = TcpListener::bind(addr).await?;
    info!(%addr, "nestegg HTTP API listening");

    axum::serve(listener, app).await
}

async fn not_found_handler() -> Response {
    error_response(StatusCode::NOT_FOUND, "Not found")
}

async fn strategies_handler() -> Response {
    let strategies: Vec<StrategyInfo> = StrategyRegistry::builtin()
        .entries()
        .iter()
        .map(|e| StrategyInfo {
            name: e.name,
            description: e.description,
        })
        .collect();
    json_response(StatusCode::OK, strategies)
}

async fn simulate_get_handler(Query(payload): Query<SimulatePayload>) -> Response {
    simulate(payload)
}

async fn simulate_post_handler(Json(payload): Json<SimulatePayload>) -> Response {
    simulate(payload)
}

fn simulate(payload: SimulatePayload) -> Response {
    match simulate_response(payload) {
        Ok(response) => json_response(StatusCode::OK, response),
        Err(err) => {
            warn!(error = %err, "rejected simulation request");
            error_response(status_for(&err), &err.to_string())
        }
    }
}

fn simulate_response(payload: SimulatePayload) -> Result<SimulateResponse, SimError> {
    let mut config = SimulationConfig::default();
    ConfigOverrides::from(payload).apply(&mut config);
    config.validate()?;
    if u64::from(config.years) * u64::from(config.paths) > MAX_API_CELLS {
        return Err(SimError::Configuration(format!(
            "years x paths must be <= {MAX_API_CELLS} per request"
        )));
    }

    let resolved = config.resolve(&StrategyRegistry::builtin())?;
    let table = resolved.run()?;
    Ok(SimulateResponse {
        strategy: resolved.strategy_name(),
        market_mode: resolved.market_mode(),
        seed: config.seed,
        summary: summarize(&table),
    })
}

fn status_for(err: &SimError) -> StatusCode {
    match err {
        SimError::StrategyNotFound { .. } => StatusCode::NOT_FOUND,
        SimError::Configuration(_) | SimError::Data(_) => StatusCode::BAD_REQUEST,
    }
}

fn json_response<T: Serialize>(status: StatusCode, body: T) -> Response {
    let mut response = (status, Json(body)).into_response();
    response.headers_mut().insert(
        header::CACHE_CONTROL,
        header::HeaderValue::from_static("no-store"),
    );
    response
}

fn error_response(status: StatusCode, msg: &str) -> Response {
    json_response(
        status,
        ErrorResponse {
            error: msg.to_string(),
        },
    )
}

#[cfg(test)]
fn payload_from_json(json: &str) -> Result<SimulatePayload, String> {
    serde_json::from_str::<SimulatePayload>(json)
        .map_err(|e| format!("Invalid API JSON payload: {e}"))
}
