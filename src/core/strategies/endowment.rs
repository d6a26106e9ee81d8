use super::WithdrawalStrategy;
use crate::core::error::{SimError, SimResult, require_non_negative};
use crate::core::types::{PortfolioParams, PriorYear};

/// `alpha * current + beta * mean(last `window` balances)`.
///
/// The trailing window is read from the path log handed in on each call, so
/// the instance itself holds only its weights.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Endowment {
    alpha: f64,
    beta: f64,
    window: usize,
}

impl Endowment {
    pub fn new(alpha: f64, beta: f64, window: usize) -> SimResult<Self> {
        require_non_negative("alpha", alpha)?;
        require_non_negative("beta", beta)?;
        if window == 0 {
            return Err(SimError::config("window must be >= 1"));
        }
        Ok(Self {
            alpha,
            beta,
            window,
        })
    }

    pub fn window(&self) -> usize {
        self.window
    }
}

impl WithdrawalStrategy for Endowment {
    fn name(&self) -> &'static str {
        "endowment"
    }

    fn calculate_withdrawal(&self, prior: Option<PriorYear<'_>>, params: &PortfolioParams) -> f64 {
        let Some(prior) = prior else {
            return (self.alpha + self.beta) * params.init_balance();
        };

        let current = prior.state().end_balance.max(0.0);
        let (sum, count) = prior
            .balance_history()
            .rev()
            .take(self.window)
            .fold((0.0, 0_usize), |(sum, n), b| (sum + b.max(0.0), n + 1));
        let average = if count == 0 { current } else { sum / count as f64 };

        self.alpha * current + self.beta * average
    }
}
