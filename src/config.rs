//! Run configuration: a flat YAML document where every key is optional, plus
//! the overrides layered on top of it by the CLI and the HTTP API.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::info;

use crate::core::{
    CashFlowLedger, DEFAULT_BLOCK_SIZE, HistoricalSeries, MarketAssumptions, MarketMode,
    MarketSimulator, PortfolioParams, ResultsTable, SimError, SimResult, StrategyParams,
    StrategyRegistry, WithdrawalStrategy,
};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file '{path}': {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },

    #[error("failed to parse config YAML: {0}")]
    Parse(#[from] serde_yaml_bw::Error),

    #[error(transparent)]
    Simulation(#[from] SimError),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SimulationConfig {
    pub strategy: String,
    pub years: u32,
    pub paths: u32,
    pub seed: u64,
    pub init_balance: f64,
    pub equity_pct: f64,
    pub fees_bps: f64,
    pub market_mode: MarketMode,
    pub start_age: u32,

    pub rate: f64,
    pub percent: f64,
    pub alpha: f64,
    pub beta: f64,
    pub window: usize,
    pub initial_rate: f64,
    pub guard_pct: f64,
    pub raise_pct: f64,
    pub cut_pct: f64,
    pub vpw_table_path: Option<PathBuf>,

    pub equity_mean: f64,
    pub equity_vol: f64,
    pub bond_mean: f64,
    pub bond_vol: f64,
    pub correlation: f64,
    pub inflation_mean: f64,
    pub inflation_vol: f64,
    pub history_path: Option<PathBuf>,
    pub block_size: usize,

    pub output: Option<PathBuf>,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        let strategy = StrategyParams::default();
        let market = MarketAssumptions::default();
        Self {
            strategy: "four_percent_rule".to_string(),
            years: 30,
            paths: 1_000,
            seed: 42,
            init_balance: 1_000_000.0,
            equity_pct: 0.6,
            fees_bps: 50.0,
            market_mode: MarketMode::Lognormal,
            start_age: strategy.start_age,
            rate: strategy.rate,
            percent: strategy.percent,
            alpha: strategy.alpha,
            beta: strategy.beta,
            window: strategy.window,
            initial_rate: strategy.initial_rate,
            guard_pct: strategy.guard_pct,
            raise_pct: strategy.raise_pct,
            cut_pct: strategy.cut_pct,
            vpw_table_path: None,
            equity_mean: market.equity_mean,
            equity_vol: market.equity_vol,
            bond_mean: market.bond_mean,
            bond_vol: market.bond_vol,
            correlation: market.correlation,
            inflation_mean: market.inflation_mean,
            inflation_vol: market.inflation_vol,
            history_path: None,
            block_size: DEFAULT_BLOCK_SIZE,
            output: None,
        }
    }
}

impl SimulationConfig {
    /// Structural checks that need no files. Strategy parameters are checked
    /// when the strategy is built in [`SimulationConfig::resolve`].
    pub fn validate(&self) -> SimResult<()> {
        if self.years == 0 {
            return Err(SimError::config("years must be > 0"));
        }
        if self.paths == 0 {
            return Err(SimError::config("paths must be > 0"));
        }
        if self.block_size == 0 {
            return Err(SimError::config("block_size must be >= 1"));
        }
        self.portfolio_params()?;
        self.market_assumptions().validate()
    }

    pub fn portfolio_params(&self) -> SimResult<PortfolioParams> {
        PortfolioParams::new(self.init_balance, self.equity_pct, self.fees_bps, self.seed)
    }

    pub fn strategy_params(&self) -> StrategyParams {
        StrategyParams {
            rate: self.rate,
            percent: self.percent,
            alpha: self.alpha,
            beta: self.beta,
            window: self.window,
            initial_rate: self.initial_rate,
            guard_pct: self.guard_pct,
            raise_pct: self.raise_pct,
            cut_pct: self.cut_pct,
            vpw_table_path: self.vpw_table_path.clone(),
            start_age: self.start_age,
        }
    }

    pub fn market_assumptions(&self) -> MarketAssumptions {
        MarketAssumptions {
            equity_mean: self.equity_mean,
            equity_vol: self.equity_vol,
            bond_mean: self.bond_mean,
            bond_vol: self.bond_vol,
            correlation: self.correlation,
            inflation_mean: self.inflation_mean,
            inflation_vol: self.inflation_vol,
        }
    }

    /// Builds everything a run needs, loading any referenced data files.
    pub fn resolve(&self, registry: &StrategyRegistry) -> SimResult<ResolvedSimulation> {
        self.validate()?;
        let params = self.portfolio_params()?;
        let strategy = registry.create(&self.strategy, &self.strategy_params())?;
        let history = match (&self.history_path, self.market_mode) {
            (Some(path), MarketMode::Bootstrap) => Some(HistoricalSeries::from_yaml_file(path)?),
            _ => None,
        };
        let market = MarketSimulator::from_mode(
            self.market_mode,
            &params,
            &self.market_assumptions(),
            history,
            self.block_size,
        )?;

        Ok(ResolvedSimulation {
            ledger: CashFlowLedger::new(params).with_start_age(Some(self.start_age)),
            strategy,
            market,
            years: self.years,
            paths: self.paths,
        })
    }
}

/// A validated run: strategy and market are constructed, data files loaded.
#[derive(Debug)]
pub struct ResolvedSimulation {
    ledger: CashFlowLedger,
    strategy: Box<dyn WithdrawalStrategy>,
    market: MarketSimulator,
    years: u32,
    paths: u32,
}

impl ResolvedSimulation {
    pub fn strategy_name(&self) -> &'static str {
        self.strategy.name()
    }

    pub fn market_mode(&self) -> MarketMode {
        self.market.mode()
    }

    pub fn run(&self) -> SimResult<ResultsTable> {
        self.ledger
            .run(self.strategy.as_ref(), &self.market, self.years, self.paths)
    }
}

/// Values set explicitly on the command line or in an API request. Only the
/// fields that are present replace the base configuration.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConfigOverrides {
    pub strategy: Option<String>,
    pub years: Option<u32>,
    pub paths: Option<u32>,
    pub seed: Option<u64>,
    pub init_balance: Option<f64>,
    pub equity_pct: Option<f64>,
    pub fees_bps: Option<f64>,
    pub market_mode: Option<MarketMode>,
    pub start_age: Option<u32>,
    pub rate: Option<f64>,
    pub percent: Option<f64>,
    pub alpha: Option<f64>,
    pub beta: Option<f64>,
    pub window: Option<usize>,
    pub initial_rate: Option<f64>,
    pub guard_pct: Option<f64>,
    pub raise_pct: Option<f64>,
    pub cut_pct: Option<f64>,
    pub vpw_table_path: Option<PathBuf>,
    pub equity_mean: Option<f64>,
    pub equity_vol: Option<f64>,
    pub bond_mean: Option<f64>,
    pub bond_vol: Option<f64>,
    pub correlation: Option<f64>,
    pub inflation_mean: Option<f64>,
    pub inflation_vol: Option<f64>,
    pub history_path: Option<PathBuf>,
    pub block_size: Option<usize>,
    pub output: Option<PathBuf>,
}

impl ConfigOverrides {
    pub fn apply(self, config: &mut SimulationConfig) {
        macro_rules! overlay {
            ($src:ident => $dst:ident; $($field:ident),* $(,)?) => {
                $(if let Some(v) = $src.$field {
                    $dst.$field = v;
                })*
            };
        }
        let given = self;
        overlay!(given => config;
            strategy,
            years,
            paths,
            seed,
            init_balance,
            equity_pct,
            fees_bps,
            market_mode,
            start_age,
            rate,
            percent,
            alpha,
            beta,
            window,
            initial_rate,
            guard_pct,
            raise_pct,
            cut_pct,
            equity_mean,
            equity_vol,
            bond_mean,
            bond_vol,
            correlation,
            inflation_mean,
            inflation_vol,
            block_size,
        );
        if let Some(path) = given.vpw_table_path {
            config.vpw_table_path = Some(path);
        }
        if let Some(path) = given.history_path {
            config.history_path = Some(path);
        }
        if let Some(path) = given.output {
            config.output = Some(path);
        }
    }
}

pub fn load_config(path: &Path) -> Result<SimulationConfig, ConfigError> {
    let contents = std::fs::read_to_string(path).map_err(|e| ConfigError::Read {
        path: path.display().to_string(),
        source: e,
    })?;
    let config = load_config_from_str(&contents)?;
    info!(path = %path.display(), strategy = %config.strategy, "loaded configuration");
    Ok(config)
}

/// An empty document yields the defaults.
pub fn load_config_from_str(yaml: &str) -> Result<SimulationConfig, ConfigError> {
    if yaml.trim().is_empty() {
        return Ok(SimulationConfig::default());
    }
    let config: SimulationConfig = serde_yaml_bw::from_str(yaml)?;
    config.validate()?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_document_gives_defaults() {
        let config = load_config_from_str("").expect("defaults");
        assert_eq!(config, SimulationConfig::default());
        assert_eq!(config.strategy, "four_percent_rule");
        assert_eq!(config.years, 30);
        assert_eq!(config.paths, 1_000);
        assert_eq!(config.block_size, 5);
    }

    #[test]
    fn yaml_values_replace_defaults() {
        let config = load_config_from_str(
            "strategy: guyton_klinger\nyears: 40\nequity_pct: 0.8\nmarket_mode: bootstrap\nvpw_table_path: tables/vpw.yaml\n",
        )
        .expect("valid config");
        assert_eq!(config.strategy, "guyton_klinger");
        assert_eq!(config.years, 40);
        assert_eq!(config.equity_pct, 0.8);
        assert_eq!(config.market_mode, MarketMode::Bootstrap);
        assert_eq!(config.vpw_table_path, Some(PathBuf::from("tables/vpw.yaml")));
        assert_eq!(config.paths, 1_000);
    }

    #[test]
    fn unknown_keys_are_rejected() {
        assert!(matches!(
            load_config_from_str("yeers: 30\n"),
            Err(ConfigError::Parse(_))
        ));
        assert!(matches!(
            load_config_from_str("market_mode: garch\n"),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn structural_errors_surface_before_running() {
        for yaml in [
            "years: 0\n",
            "paths: 0\n",
            "equity_pct: 1.2\n",
            "fees_bps: -5\n",
            "init_balance: 0\n",
            "block_size: 0\n",
            "correlation: 2.0\n",
        ] {
            assert!(
                matches!(
                    load_config_from_str(yaml),
                    Err(ConfigError::Simulation(SimError::Configuration(_)))
                ),
                "{yaml} should fail validation"
            );
        }
    }

    #[test]
    fn missing_file_is_a_read_error() {
        let err = load_config(Path::new("/nonexistent/nestegg.yaml")).expect_err("no file");
        assert!(matches!(err, ConfigError::Read { .. }));
        assert!(err.to_string().contains("/nonexistent/nestegg.yaml"));
    }

    #[test]
    fn overrides_only_touch_given_fields() {
        let mut config = load_config_from_str("years: 40\npaths: 250\n").expect("valid config");
        ConfigOverrides {
            paths: Some(10),
            strategy: Some("vpw".to_string()),
            ..ConfigOverrides::default()
        }
        .apply(&mut config);
        assert_eq!(config.years, 40);
        assert_eq!(config.paths, 10);
        assert_eq!(config.strategy, "vpw");
        assert_eq!(config.seed, 42);
    }

    #[test]
    fn resolve_builds_strategy_and_market() {
        let config = SimulationConfig {
            strategy: "constant_percentage".to_string(),
            years: 5,
            paths: 3,
            ..SimulationConfig::default()
        };
        let resolved = config
            .resolve(&StrategyRegistry::builtin())
            .expect("resolves");
        assert_eq!(resolved.strategy_name(), "constant_pct");
        assert_eq!(resolved.market_mode(), MarketMode::Lognormal);

        let table = resolved.run().expect("runs");
        assert_eq!(table.len(), 15);
        assert_eq!(table.path(0)[0].age, Some(65));
    }

    #[test]
    fn resolve_reports_unknown_strategy_and_missing_data() {
        let registry = StrategyRegistry::builtin();
        let unknown = SimulationConfig {
            strategy: "martingale".to_string(),
            ..SimulationConfig::default()
        };
        assert!(matches!(
            unknown.resolve(&registry),
            Err(SimError::StrategyNotFound { .. })
        ));

        let no_history = SimulationConfig {
            market_mode: MarketMode::Bootstrap,
            ..SimulationConfig::default()
        };
        assert!(matches!(
            no_history.resolve(&registry),
            Err(SimError::Data(_))
        ));

        let bad_history = SimulationConfig {
            market_mode: MarketMode::Bootstrap,
            history_path: Some(PathBuf::from("/nonexistent/history.yaml")),
            ..SimulationConfig::default()
        };
        assert!(matches!(
            bad_history.resolve(&registry),
            Err(SimError::Data(_))
        ));
    }
}
