use super::WithdrawalStrategy;
use crate::core::error::{SimResult, require_unit_interval};
use crate::core::types::{PortfolioParams, PriorYear};

/// The "4% rule": a fixed share of the *initial* balance in year one, then last
/// year's withdrawal grown by last year's inflation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FixedRate {
    rate: f64,
}

impl FixedRate {
    pub fn new(rate: f64) -> SimResult<Self> {
        Ok(Self {
            rate: require_unit_interval("rate", rate)?,
        })
    }

    pub fn rate(&self) -> f64 {
        self.rate
    }
}

impl WithdrawalStrategy for FixedRate {
    fn name(&self) -> &'static str {
        "four_percent_rule"
    }

    fn calculate_withdrawal(&self, prior: Option<PriorYear<'_>>, params: &PortfolioParams) -> f64 {
        let Some(prior) = prior else {
            return params.init_balance() * self.rate;
        };
        let last = prior.state();
        (last.withdrawal * (1.0 + last.inflation)).max(0.0)
    }
}
