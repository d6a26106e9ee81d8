use super::WithdrawalStrategy;
use crate::core::error::{SimResult, require_unit_interval};
use crate::core::types::{PortfolioParams, PriorYear};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ConstantPercentage {
    percent: f64,
}

impl ConstantPercentage {
    pub fn new(percent: f64) -> SimResult<Self> {
        Ok(Self {
            percent: require_unit_interval("percent", percent)?,
        })
    }

    pub fn percent(&self) -> f64 {
        self.percent
    }
}

impl WithdrawalStrategy for ConstantPercentage {
    fn name(&self) -> &'static str {
        "constant_pct"
    }

    fn calculate_withdrawal(&self, prior: Option<PriorYear<'_>>, params: &PortfolioParams) -> f64 {
        let balance = match prior {
            Some(prior) => prior.state().end_balance,
            None => params.init_balance(),
        };
        balance.max(0.0) * self.percent
    }
}
