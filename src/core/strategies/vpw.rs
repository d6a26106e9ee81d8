use std::collections::BTreeMap;
use std::path::Path;

use super::WithdrawalStrategy;
use crate::core::error::{SimError, SimResult};
use crate::core::types::{PortfolioParams, PriorYear};

/// Ceiling on any table percentage, in percent.
pub const MAX_VPW_PERCENT: f64 = 10.0;

const BUILTIN_FIRST_AGE: u32 = 45;

// Percent by age 45..=95 for each equity bucket.
const BUILTIN_20: [f64; 51] = [
    3.0, 3.0, 3.1, 3.1, 3.2, 3.2, 3.3, 3.3, 3.4, 3.4, 3.5, 3.6, 3.6, 3.7, 3.8, 3.9, 4.0, 4.1,
    4.2, 4.3, 4.4, 4.5, 4.6, 4.8, 4.9, 5.0, 5.2, 5.3, 5.5, 5.6, 5.8, 6.0, 6.2, 6.4, 6.6, 6.8,
    7.1, 7.3, 7.6, 7.9, 8.2, 8.5, 8.8, 9.2, 9.6, 10.0, 10.0, 10.0, 10.0, 10.0, 10.0,
];
const BUILTIN_40: [f64; 51] = [
    2.7, 2.7, 2.8, 2.8, 2.9, 2.9, 3.0, 3.0, 3.1, 3.1, 3.2, 3.2, 3.3, 3.4, 3.4, 3.5, 3.6, 3.7,
    3.8, 3.9, 4.0, 4.1, 4.2, 4.3, 4.4, 4.5, 4.7, 4.8, 4.9, 5.1, 5.2, 5.4, 5.6, 5.8, 6.0, 6.2,
    6.4, 6.6, 6.9, 7.2, 7.5, 7.8, 8.1, 8.5, 8.9, 9.3, 9.7, 10.0, 10.0, 10.0, 10.0,
];
const BUILTIN_60: [f64; 51] = [
    2.5, 2.5, 2.6, 2.6, 2.6, 2.7, 2.7, 2.8, 2.8, 2.9, 2.9, 3.0, 3.0, 3.1, 3.1, 3.2, 3.3, 3.3,
    3.4, 3.5, 3.6, 3.7, 3.8, 3.9, 4.0, 4.1, 4.2, 4.3, 4.4, 4.6, 4.7, 4.9, 5.0, 5.2, 5.4, 5.6,
    5.8, 6.0, 6.3, 6.5, 6.8, 7.1, 7.4, 7.8, 8.2, 8.6, 9.0, 9.5, 10.0, 10.0, 10.0,
];
const BUILTIN_80: [f64; 51] = [
    2.3, 2.3, 2.4, 2.4, 2.4, 2.5, 2.5, 2.5, 2.6, 2.6, 2.7, 2.7, 2.8, 2.8, 2.9, 2.9, 3.0, 3.0,
    3.1, 3.2, 3.3, 3.3, 3.4, 3.5, 3.6, 3.7, 3.8, 3.9, 4.0, 4.1, 4.2, 4.4, 4.5, 4.7, 4.8, 5.0,
    5.2, 5.4, 5.6, 5.9, 6.1, 6.4, 6.7, 7.1, 7.4, 7.8, 8.3, 8.8, 9.3, 9.8, 10.0,
];

/// Equity bucket (percent) -> age -> withdrawal percent.
#[derive(Debug, Clone, PartialEq)]
pub struct VpwTable {
    buckets: BTreeMap<u32, BTreeMap<u32, f64>>,
}

impl VpwTable {
    pub fn new(buckets: BTreeMap<u32, BTreeMap<u32, f64>>) -> SimResult<Self> {
        if buckets.is_empty() {
            return Err(SimError::data("VPW table has no equity buckets"));
        }
        for (bucket, ages) in &buckets {
            if ages.is_empty() {
                return Err(SimError::data(format!(
                    "VPW table bucket {bucket} has no ages"
                )));
            }
            if let Some((age, pct)) = ages.iter().find(|(_, pct)| !pct.is_finite()) {
                return Err(SimError::data(format!(
                    "VPW table bucket {bucket} age {age} has non-finite percentage {pct}"
                )));
            }
        }
        Ok(Self { buckets })
    }

    pub fn builtin() -> Self {
        let column = |values: &[f64; 51]| {
            values
                .iter()
                .enumerate()
                .map(|(offset, pct)| (BUILTIN_FIRST_AGE + offset as u32, *pct))
                .collect::<BTreeMap<_, _>>()
        };
        let buckets = BTreeMap::from([
            (20, column(&BUILTIN_20)),
            (40, column(&BUILTIN_40)),
            (60, column(&BUILTIN_60)),
            (80, column(&BUILTIN_80)),
        ]);
        Self { buckets }
    }

    pub fn from_yaml_str(yaml: &str) -> SimResult<Self> {
        let buckets: BTreeMap<u32, BTreeMap<u32, f64>> = serde_yaml_bw::from_str(yaml)
            .map_err(|e| SimError::data(format!("malformed VPW table: {e}")))?;
        Self::new(buckets)
    }

    pub fn from_yaml_file(path: &Path) -> SimResult<Self> {
        let contents = std::fs::read_to_string(path).map_err(|e| {
            SimError::data(format!("cannot read VPW table '{}': {e}", path.display()))
        })?;
        Self::from_yaml_str(&contents)
    }

    /// Nearest bucket to the allocation in whole percent; ties go to the lower bucket.
    pub fn bucket_for(&self, equity_pct: f64) -> u32 {
        let target = (equity_pct.clamp(0.0, 1.0) * 100.0).round() as i64;
        self.buckets
            .keys()
            .copied()
            .min_by_key(|bucket| (*bucket as i64 - target).abs())
            .unwrap_or(0)
    }

    /// Withdrawal fraction for an age in a bucket: exact hit, clamped outside the
    /// table's age range, linearly interpolated between neighbours; capped at
    /// [`MAX_VPW_PERCENT`] and floored at zero.
    pub fn withdrawal_fraction(&self, bucket: u32, age: u32) -> f64 {
        let Some(ages) = self.buckets.get(&bucket) else {
            return 0.0;
        };
        let below = ages.range(..=age).next_back();
        let above = ages.range(age..).next();
        let pct = match (below, above) {
            (Some((&lo_age, &lo)), Some((&hi_age, &hi))) if hi_age > lo_age => {
                let weight = (age - lo_age) as f64 / (hi_age - lo_age) as f64;
                lo + weight * (hi - lo)
            }
            (Some((_, &pct)), _) | (None, Some((_, &pct))) => pct,
            (None, None) => 0.0,
        };
        pct.clamp(0.0, MAX_VPW_PERCENT) / 100.0
    }
}

/// Variable percentage withdrawal: current balance times the table rate for the
/// retiree's age and equity bucket.
#[derive(Debug, Clone, PartialEq)]
pub struct Vpw {
    table: VpwTable,
    start_age: u32,
}

impl Vpw {
    pub fn new(table: VpwTable, start_age: u32) -> Self {
        Self { table, start_age }
    }

    pub fn table(&self) -> &VpwTable {
        &self.table
    }
}

impl WithdrawalStrategy for Vpw {
    fn name(&self) -> &'static str {
        "vpw"
    }

    fn calculate_withdrawal(&self, prior: Option<PriorYear<'_>>, params: &PortfolioParams) -> f64 {
        let (age, balance) = match prior {
            None => (self.start_age, params.init_balance()),
            Some(prior) => {
                let last = prior.state();
                let age = last
                    .age
                    .unwrap_or_else(|| self.start_age.saturating_add(last.year))
                    .saturating_add(1);
                (age, last.end_balance)
            }
        };
        let bucket = self.table.bucket_for(params.equity_pct());
        balance.max(0.0) * self.table.withdrawal_fraction(bucket, age)
    }
}
