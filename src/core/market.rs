use std::fmt;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::debug;

use super::error::{SimError, SimResult, require_non_negative};
use super::rng::Rng;
use super::types::PortfolioParams;

pub const DEFAULT_BLOCK_SIZE: usize = 5;
const INFLATION_FLOOR: f64 = -0.03;
const INFLATION_CEILING: f64 = 0.20;

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MarketSample {
    pub market_return: f64,
    pub inflation: f64,
}

/// Sample grid of shape (paths, years), stored path-major.
#[derive(Debug, Clone, PartialEq)]
pub struct MarketPaths {
    years: u32,
    paths: u32,
    samples: Vec<MarketSample>,
}

impl MarketPaths {
    pub fn from_fn(years: u32, paths: u32, mut f: impl FnMut(u32, u32) -> MarketSample) -> Self {
        let mut samples = Vec::with_capacity(years as usize * paths as usize);
        for path in 0..paths {
            for year in 0..years {
                samples.push(f(path, year));
            }
        }
        Self {
            years,
            paths,
            samples,
        }
    }

    pub fn years(&self) -> u32 {
        self.years
    }

    pub fn paths(&self) -> u32 {
        self.paths
    }

    pub fn path(&self, path: u32) -> &[MarketSample] {
        if path >= self.paths {
            return &[];
        }
        let years = self.years as usize;
        let start = path as usize * years;
        &self.samples[start..start + years]
    }

    pub fn get(&self, path: u32, year: u32) -> Option<MarketSample> {
        self.path(path).get(year as usize).copied()
    }
}

/// Anything that can hand the ledger a (paths, years) grid of market samples.
pub trait ReturnSource {
    fn generate(&self, years: u32, paths: u32) -> SimResult<MarketPaths>;
}

pub(crate) fn validate_dimensions(years: u32, paths: u32) -> SimResult<()> {
    if years == 0 {
        return Err(SimError::config("years must be > 0"));
    }
    if paths == 0 {
        return Err(SimError::config("paths must be > 0"));
    }
    Ok(())
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MarketMode {
    #[default]
    Lognormal,
    Bootstrap,
}

impl MarketMode {
    pub fn as_str(self) -> &'static str {
        match self {
            MarketMode::Lognormal => "lognormal",
            MarketMode::Bootstrap => "bootstrap",
        }
    }
}

impl fmt::Display for MarketMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Annual arithmetic means and volatilities for the parametric model.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MarketAssumptions {
    pub equity_mean: f64,
    pub equity_vol: f64,
    pub bond_mean: f64,
    pub bond_vol: f64,
    pub correlation: f64,
    pub inflation_mean: f64,
    pub inflation_vol: f64,
}

impl Default for MarketAssumptions {
    fn default() -> Self {
        Self {
            equity_mean: 0.07,
            equity_vol: 0.15,
            bond_mean: 0.02,
            bond_vol: 0.06,
            correlation: 0.0,
            inflation_mean: 0.025,
            inflation_vol: 0.01,
        }
    }
}

impl MarketAssumptions {
    pub fn validate(&self) -> SimResult<()> {
        for (name, mean) in [
            ("equity_mean", self.equity_mean),
            ("bond_mean", self.bond_mean),
            ("inflation_mean", self.inflation_mean),
        ] {
            if !mean.is_finite() || mean <= -1.0 {
                return Err(SimError::config(format!(
                    "{name} must be finite and > -1, got {mean}"
                )));
            }
        }
        require_non_negative("equity_vol", self.equity_vol)?;
        require_non_negative("bond_vol", self.bond_vol)?;
        require_non_negative("inflation_vol", self.inflation_vol)?;
        if !(-1.0..=1.0).contains(&self.correlation) {
            return Err(SimError::config(format!(
                "correlation must be between -1 and 1, got {}",
                self.correlation
            )));
        }
        Ok(())
    }

    /// Arithmetic mean and volatility of the equity/bond mix.
    pub fn blended(&self, equity_pct: f64) -> (f64, f64) {
        let w = equity_pct.clamp(0.0, 1.0);
        let mean = w * self.equity_mean + (1.0 - w) * self.bond_mean;
        let variance = (w * self.equity_vol).powi(2)
            + ((1.0 - w) * self.bond_vol).powi(2)
            + 2.0 * w * (1.0 - w) * self.correlation * self.equity_vol * self.bond_vol;
        (mean, variance.max(0.0).sqrt())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct HistoricalYear {
    #[serde(rename = "return", alias = "market_return")]
    pub market_return: f64,
    pub inflation: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct HistoricalSeries {
    years: Vec<HistoricalYear>,
}

impl HistoricalSeries {
    pub fn new(years: Vec<HistoricalYear>) -> SimResult<Self> {
        if years.is_empty() {
            return Err(SimError::data("historical series is empty"));
        }
        for (idx, year) in years.iter().enumerate() {
            if !year.market_return.is_finite() || year.market_return <= -1.0 {
                return Err(SimError::data(format!(
                    "historical year {idx} has invalid return {}",
                    year.market_return
                )));
            }
            if !year.inflation.is_finite() {
                return Err(SimError::data(format!(
                    "historical year {idx} has non-finite inflation"
                )));
            }
        }
        Ok(Self { years })
    }

    pub fn from_yaml_str(yaml: &str) -> SimResult<Self> {
        let years: Vec<HistoricalYear> = serde_yaml_bw::from_str(yaml)
            .map_err(|e| SimError::data(format!("malformed historical series: {e}")))?;
        Self::new(years)
    }

    pub fn from_yaml_file(path: &Path) -> SimResult<Self> {
        let contents = std::fs::read_to_string(path).map_err(|e| {
            SimError::data(format!(
                "cannot read historical series '{}': {e}",
                path.display()
            ))
        })?;
        Self::from_yaml_str(&contents)
    }

    pub fn len(&self) -> usize {
        self.years.len()
    }

    pub fn is_empty(&self) -> bool {
        self.years.is_empty()
    }

    pub fn years(&self) -> &[HistoricalYear] {
        &self.years
    }
}

#[derive(Debug, Clone)]
enum MarketModel {
    Lognormal {
        log_mean: f64,
        log_vol: f64,
        inflation_mean: f64,
        inflation_vol: f64,
    },
    Bootstrap {
        history: HistoricalSeries,
        block_size: usize,
    },
}

/// Seeded market model. Each path draws from its own stream derived from the
/// master seed and the path index.
#[derive(Debug, Clone)]
pub struct MarketSimulator {
    seed: u64,
    model: MarketModel,
}

impl MarketSimulator {
    pub fn lognormal(params: &PortfolioParams, assumptions: &MarketAssumptions) -> SimResult<Self> {
        assumptions.validate()?;
        let (mean, vol) = assumptions.blended(params.equity_pct());
        let gross_mean = 1.0 + mean;
        let log_var = (1.0 + (vol / gross_mean).powi(2)).ln();
        let log_mean = gross_mean.ln() - 0.5 * log_var;

        Ok(Self {
            seed: params.seed(),
            model: MarketModel::Lognormal {
                log_mean,
                log_vol: log_var.sqrt(),
                inflation_mean: assumptions.inflation_mean,
                inflation_vol: assumptions.inflation_vol,
            },
        })
    }

    pub fn bootstrap(
        params: &PortfolioParams,
        history: Option<HistoricalSeries>,
        block_size: usize,
    ) -> SimResult<Self> {
        let Some(history) = history else {
            return Err(SimError::data(
                "bootstrap mode requires a historical return series",
            ));
        };
        if block_size == 0 {
            return Err(SimError::config("block_size must be >= 1"));
        }
        let block_size = block_size.min(history.len());

        Ok(Self {
            seed: params.seed(),
            model: MarketModel::Bootstrap {
                history,
                block_size,
            },
        })
    }

    pub fn from_mode(
        mode: MarketMode,
        params: &PortfolioParams,
        assumptions: &MarketAssumptions,
        history: Option<HistoricalSeries>,
        block_size: usize,
    ) -> SimResult<Self> {
        match mode {
            MarketMode::Lognormal => Self::lognormal(params, assumptions),
            MarketMode::Bootstrap => Self::bootstrap(params, history, block_size),
        }
    }

    pub fn mode(&self) -> MarketMode {
        match self.model {
            MarketModel::Lognormal { .. } => MarketMode::Lognormal,
            MarketModel::Bootstrap { .. } => MarketMode::Bootstrap,
        }
    }

    fn fill_path(&self, path: u32, out: &mut Vec<MarketSample>, years: usize) {
        let mut rng = Rng::for_path(self.seed, path);
        match &self.model {
            MarketModel::Lognormal {
                log_mean,
                log_vol,
                inflation_mean,
                inflation_vol,
            } => {
                for _ in 0..years {
                    let z_return = rng.standard_normal();
                    let z_inflation = rng.standard_normal();
                    out.push(MarketSample {
                        market_return: (log_mean + log_vol * z_return).exp() - 1.0,
                        inflation: (inflation_mean + inflation_vol * z_inflation)
                            .clamp(INFLATION_FLOOR, INFLATION_CEILING),
                    });
                }
            }
            MarketModel::Bootstrap {
                history,
                block_size,
            } => {
                let series = history.years();
                let block = *block_size;
                let block_starts = series.len() - block + 1;
                let mut filled = 0;
                while filled + block <= years {
                    let start = rng.below(block_starts);
                    out.extend(series[start..start + block].iter().map(to_sample));
                    filled += block;
                }
                while filled < years {
                    out.push(to_sample(&series[rng.below(series.len())]));
                    filled += 1;
                }
            }
        }
    }
}

fn to_sample(year: &HistoricalYear) -> MarketSample {
    MarketSample {
        market_return: year.market_return,
        inflation: year.inflation,
    }
}

impl ReturnSource for MarketSimulator {
    fn generate(&self, years: u32, paths: u32) -> SimResult<MarketPaths> {
        validate_dimensions(years, paths)?;
        debug!(mode = %self.mode(), years, paths, "generating market paths");

        let mut samples = Vec::with_capacity(years as usize * paths as usize);
        for path in 0..paths {
            self.fill_path(path, &mut samples, years as usize);
        }
        Ok(MarketPaths {
            years,
            paths,
            samples,
        })
    }
}

/// Constant market: every year of every path has the same return and inflation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FixedMarket {
    pub market_return: f64,
    pub inflation: f64,
}

impl FixedMarket {
    pub fn new(market_return: f64, inflation: f64) -> Self {
        Self {
            market_return,
            inflation,
        }
    }
}

impl ReturnSource for FixedMarket {
    fn generate(&self, years: u32, paths: u32) -> SimResult<MarketPaths> {
        validate_dimensions(years, paths)?;
        let sample = MarketSample {
            market_return: self.market_return,
            inflation: self.inflation,
        };
        Ok(MarketPaths::from_fn(years, paths, |_, _| sample))
    }
}
