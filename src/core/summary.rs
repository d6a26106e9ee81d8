use serde::Serialize;

use super::types::ResultsTable;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct YearBand {
    pub year: u32,
    pub age: Option<u32>,
    pub p10_balance: f64,
    pub median_balance: f64,
    pub p90_balance: f64,
    pub median_withdrawal: f64,
    pub mean_inflation: f64,
    pub depleted_paths: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SimulationSummary {
    pub years: u32,
    pub paths: u32,
    pub success_rate: f64,
    pub depleted_paths: u32,
    pub mean_final_balance: f64,
    pub p10_final_balance: f64,
    pub median_final_balance: f64,
    pub p90_final_balance: f64,
    pub median_total_withdrawn: f64,
    pub yearly: Vec<YearBand>,
}

struct YearlyAccumulator {
    balances: Vec<Vec<f64>>,
    withdrawals: Vec<Vec<f64>>,
    inflation_sums: Vec<f64>,
    depleted: Vec<u32>,
    ages: Vec<Option<u32>>,
}

impl YearlyAccumulator {
    fn new(years: usize, paths: usize) -> Self {
        let make = || {
            (0..years)
                .map(|_| Vec::with_capacity(paths))
                .collect::<Vec<_>>()
        };
        Self {
            balances: make(),
            withdrawals: make(),
            inflation_sums: vec![0.0; years],
            depleted: vec![0; years],
            ages: vec![None; years],
        }
    }

    fn into_bands(mut self, paths: u32) -> Vec<YearBand> {
        let mut bands = Vec::with_capacity(self.balances.len());
        for idx in 0..self.balances.len() {
            let balances = &mut self.balances[idx];
            bands.push(YearBand {
                year: idx as u32,
                age: self.ages[idx],
                p10_balance: percentile(balances, 10.0),
                median_balance: percentile(balances, 50.0),
                p90_balance: percentile(balances, 90.0),
                median_withdrawal: percentile(&mut self.withdrawals[idx], 50.0),
                mean_inflation: self.inflation_sums[idx] / paths.max(1) as f64,
                depleted_paths: self.depleted[idx],
            });
        }
        bands
    }
}

/// Cross-path statistics for a finished run. A path succeeds when it ends the
/// horizon with a positive balance.
pub fn summarize(table: &ResultsTable) -> SimulationSummary {
    let years = table.years() as usize;
    let paths = table.paths() as usize;
    let mut yearly = YearlyAccumulator::new(years, paths);
    let mut finals = Vec::with_capacity(paths);
    let mut totals = Vec::with_capacity(paths);

    for path in 0..table.paths() {
        let states = table.path(path);
        for (idx, state) in states.iter().enumerate() {
            yearly.balances[idx].push(state.end_balance);
            yearly.withdrawals[idx].push(state.withdrawal);
            yearly.inflation_sums[idx] += state.inflation;
            yearly.ages[idx] = state.age;
            if state.depleted {
                yearly.depleted[idx] += 1;
            }
        }
        if let Some(last) = states.last() {
            finals.push(last.end_balance);
        }
        totals.push(states.iter().map(|s| s.withdrawal).sum::<f64>());
    }

    let successes = finals.iter().filter(|b| **b > 0.0).count();
    let depleted_paths = paths - successes;
    let mean_final_balance = if finals.is_empty() {
        0.0
    } else {
        finals.iter().sum::<f64>() / finals.len() as f64
    };

    SimulationSummary {
        years: table.years(),
        paths: table.paths(),
        success_rate: if paths == 0 {
            0.0
        } else {
            successes as f64 / paths as f64
        },
        depleted_paths: depleted_paths as u32,
        mean_final_balance,
        p10_final_balance: percentile(&mut finals, 10.0),
        median_final_balance: percentile(&mut finals, 50.0),
        p90_final_balance: percentile(&mut finals, 90.0),
        median_total_withdrawn: percentile(&mut totals, 50.0),
        yearly: yearly.into_bands(table.paths()),
    }
}

/// Linear-interpolated percentile, `p` in 0..=100. Sorts `values` in place.
pub fn percentile(values: &mut [f64], p: f64) -> f64 {
    if values.is_empty() {
        return 0.0;
    }

    values.sort_by(|a, b| a.total_cmp(b));

    let n = values.len();
    if n == 1 {
        return values[0];
    }

    let rank = (p.clamp(0.0, 100.0) / 100.0) * (n as f64 - 1.0);
    let lower = rank.floor() as usize;
    let upper = rank.ceil() as usize;

    if lower == upper {
        values[lower]
    } else {
        let w = rank - lower as f64;
        values[lower] * (1.0 - w) + values[upper] * w
    }
}
