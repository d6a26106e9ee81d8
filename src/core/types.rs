use serde::Serialize;

use super::error::{SimError, SimResult, require_non_negative, require_unit_interval};

pub const MAX_FEES_BPS: f64 = 10_000.0;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PortfolioParams {
    init_balance: f64,
    equity_pct: f64,
    fees_bps: f64,
    seed: u64,
}

impl PortfolioParams {
    pub fn new(init_balance: f64, equity_pct: f64, fees_bps: f64, seed: u64) -> SimResult<Self> {
        if !(init_balance.is_finite() && init_balance > 0.0) {
            return Err(SimError::config(format!(
                "init_balance must be > 0, got {init_balance}"
            )));
        }
        require_unit_interval("equity_pct", equity_pct)?;
        require_non_negative("fees_bps", fees_bps)?;
        if fees_bps > MAX_FEES_BPS {
            return Err(SimError::config(format!(
                "fees_bps must be <= {MAX_FEES_BPS}, got {fees_bps}"
            )));
        }

        Ok(Self {
            init_balance,
            equity_pct,
            fees_bps,
            seed,
        })
    }

    pub fn init_balance(&self) -> f64 {
        self.init_balance
    }

    pub fn equity_pct(&self) -> f64 {
        self.equity_pct
    }

    pub fn fees_bps(&self) -> f64 {
        self.fees_bps
    }

    pub fn seed(&self) -> u64 {
        self.seed
    }

    pub fn fee_rate(&self) -> f64 {
        self.fees_bps / 10_000.0
    }
}

/// One year of one path, recorded after withdrawal, growth and fees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct YearState {
    pub year: u32,
    pub age: Option<u32>,
    pub start_balance: f64,
    pub end_balance: f64,
    pub market_return: f64,
    pub inflation: f64,
    pub withdrawal: f64,
    pub depleted: bool,
}

/// The prior-year view handed to a strategy: the path's log so far, never empty.
#[derive(Debug, Clone, Copy)]
pub struct PriorYear<'a> {
    last: &'a YearState,
    path: &'a [YearState],
}

impl<'a> PriorYear<'a> {
    pub fn from_path(path: &'a [YearState]) -> Option<Self> {
        let (last, _) = path.split_last()?;
        Some(Self { last, path })
    }

    pub fn state(&self) -> &'a YearState {
        self.last
    }

    pub fn path(&self) -> &'a [YearState] {
        self.path
    }

    /// Balances as seen at the start of each call: the path's opening balance,
    /// then every recorded year-end balance.
    pub fn balance_history(&self) -> impl DoubleEndedIterator<Item = f64> + 'a {
        let opening = self.path.first().map(|s| s.start_balance);
        opening
            .into_iter()
            .chain(self.path.iter().map(|s| s.end_balance))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ResultRow<'a> {
    pub path: u32,
    #[serde(flatten)]
    pub state: &'a YearState,
}

/// Flat results table, path-major: row `path * years + year`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResultsTable {
    years: u32,
    paths: u32,
    rows: Vec<YearState>,
}

impl ResultsTable {
    pub(crate) fn from_rows(years: u32, paths: u32, rows: Vec<YearState>) -> Self {
        debug_assert_eq!(rows.len(), years as usize * paths as usize);
        Self { years, paths, rows }
    }

    pub fn years(&self) -> u32 {
        self.years
    }

    pub fn paths(&self) -> u32 {
        self.paths
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn path(&self, path: u32) -> &[YearState] {
        if path >= self.paths {
            return &[];
        }
        let years = self.years as usize;
        let start = path as usize * years;
        &self.rows[start..start + years]
    }

    pub fn rows(&self) -> impl Iterator<Item = ResultRow<'_>> {
        let years = self.years.max(1) as usize;
        self.rows.iter().enumerate().map(move |(idx, state)| ResultRow {
            path: (idx / years) as u32,
            state,
        })
    }

    pub fn final_states(&self) -> impl Iterator<Item = &YearState> {
        (0..self.paths).filter_map(|path| self.path(path).last())
    }

    pub fn into_rows(self) -> Vec<YearState> {
        self.rows
    }
}
