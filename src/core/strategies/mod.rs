//! Withdrawal strategies and the name -> constructor registry.
//!
//! A strategy is a pure function of the prior year (absent on the first call)
//! and the portfolio parameters. Any history it needs is read from the path's
//! log through [`PriorYear`], so one instance is safely shared across paths.

mod constant_percentage;
mod endowment;
mod fixed_rate;
mod guyton_klinger;
mod vpw;

use std::fmt;
use std::path::PathBuf;

pub use constant_percentage::ConstantPercentage;
pub use endowment::Endowment;
pub use fixed_rate::FixedRate;
pub use guyton_klinger::{GuardrailDecision, GuytonKlinger};
pub use vpw::{MAX_VPW_PERCENT, Vpw, VpwTable};

use super::error::{SimError, SimResult};
use super::types::{PortfolioParams, PriorYear};

pub trait WithdrawalStrategy: fmt::Debug + Send + Sync {
    fn name(&self) -> &'static str;

    /// Requested withdrawal for the coming year. Never negative or NaN for
    /// finite inputs; the ledger still clamps it to the available balance.
    fn calculate_withdrawal(&self, prior: Option<PriorYear<'_>>, params: &PortfolioParams) -> f64;
}

/// Always withdraws nothing. Baseline for checking the ledger in isolation.
#[derive(Debug, Clone, Copy, Default)]
pub struct Dummy;

impl WithdrawalStrategy for Dummy {
    fn name(&self) -> &'static str {
        "dummy"
    }

    fn calculate_withdrawal(&self, _prior: Option<PriorYear<'_>>, _params: &PortfolioParams) -> f64 {
        0.0
    }
}

pub const DEFAULT_START_AGE: u32 = 65;

/// Construction parameters for every built-in strategy; each variant reads the
/// fields it needs.
#[derive(Debug, Clone, PartialEq)]
pub struct StrategyParams {
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
    pub start_age: u32,
}

impl Default for StrategyParams {
    fn default() -> Self {
        Self {
            rate: 0.04,
            percent: 0.05,
            alpha: 0.7,
            beta: 0.3,
            window: 3,
            initial_rate: 0.05,
            guard_pct: 0.20,
            raise_pct: 0.10,
            cut_pct: 0.10,
            vpw_table_path: None,
            start_age: DEFAULT_START_AGE,
        }
    }
}

pub type StrategyConstructor = fn(&StrategyParams) -> SimResult<Box<dyn WithdrawalStrategy>>;

#[derive(Clone, Copy)]
pub struct StrategyEntry {
    pub name: &'static str,
    pub description: &'static str,
    constructor: StrategyConstructor,
}

impl fmt::Debug for StrategyEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StrategyEntry")
            .field("name", &self.name)
            .field("description", &self.description)
            .finish()
    }
}

#[derive(Debug, Clone, Default)]
pub struct StrategyRegistry {
    entries: Vec<StrategyEntry>,
    aliases: Vec<(&'static str, &'static str)>,
}

impl StrategyRegistry {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn builtin() -> Self {
        let mut registry = Self::empty();
        registry.register("dummy", "Withdraws nothing; ledger baseline", |_| {
            Ok(Box::new(Dummy))
        });
        registry.register(
            "four_percent_rule",
            "Fixed rate of the initial balance, indexed to inflation",
            |p| Ok(Box::new(FixedRate::new(p.rate)?)),
        );
        registry.register(
            "constant_pct",
            "Fixed percentage of the current balance",
            |p| Ok(Box::new(ConstantPercentage::new(p.percent)?)),
        );
        registry.register(
            "endowment",
            "Blend of current balance and its trailing moving average",
            |p| Ok(Box::new(Endowment::new(p.alpha, p.beta, p.window)?)),
        );
        registry.register(
            "guyton_klinger",
            "Inflation-indexed withdrawals with cut/raise guardrails",
            |p| {
                Ok(Box::new(GuytonKlinger::new(
                    p.initial_rate,
                    p.guard_pct,
                    p.raise_pct,
                    p.cut_pct,
                )?))
            },
        );
        registry.register(
            "vpw",
            "Age and allocation based variable percentage withdrawal",
            |p| {
                let table = match &p.vpw_table_path {
                    Some(path) => VpwTable::from_yaml_file(path)?,
                    None => VpwTable::builtin(),
                };
                Ok(Box::new(Vpw::new(table, p.start_age)))
            },
        );
        registry.alias("fixed_rate", "four_percent_rule");
        registry.alias("constant_percentage", "constant_pct");
        registry
    }

    /// Adds or replaces a variant.
    pub fn register(
        &mut self,
        name: &'static str,
        description: &'static str,
        constructor: StrategyConstructor,
    ) {
        let entry = StrategyEntry {
            name,
            description,
            constructor,
        };
        match self.entries.iter_mut().find(|e| e.name == name) {
            Some(existing) => *existing = entry,
            None => self.entries.push(entry),
        }
    }

    pub fn alias(&mut self, alias: &'static str, target: &'static str) {
        self.aliases.retain(|(a, _)| *a != alias);
        self.aliases.push((alias, target));
    }

    pub fn entries(&self) -> &[StrategyEntry] {
        &self.entries
    }

    pub fn contains(&self, name: &str) -> bool {
        self.lookup(name).is_some()
    }

    fn lookup(&self, name: &str) -> Option<&StrategyEntry> {
        let canonical = self
            .aliases
            .iter()
            .find(|(alias, _)| *alias == name)
            .map(|(_, target)| *target)
            .unwrap_or(name);
        self.entries.iter().find(|e| e.name == canonical)
    }

    pub fn create(
        &self,
        name: &str,
        params: &StrategyParams,
    ) -> SimResult<Box<dyn WithdrawalStrategy>> {
        let entry = self.lookup(name).ok_or_else(|| SimError::StrategyNotFound {
            name: name.to_string(),
            available: self
                .entries
                .iter()
                .map(|e| e.name)
                .collect::<Vec<_>>()
                .join(", "),
        })?;
        (entry.constructor)(params)
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use crate::core::types::{PortfolioParams, YearState};

    pub(crate) fn params() -> PortfolioParams {
        PortfolioParams::new(1_000_000.0, 0.6, 50.0, 42).expect("valid params")
    }

    pub(crate) fn year(year: u32, start: f64, end: f64, withdrawal: f64, inflation: f64) -> YearState {
        YearState {
            year,
            age: Some(65 + year),
            start_balance: start,
            end_balance: end,
            market_return: 0.0,
            inflation,
            withdrawal,
            depleted: end <= 0.0,
        }
    }
}
