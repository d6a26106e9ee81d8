use super::WithdrawalStrategy;
use crate::core::error::{SimResult, require_open_unit_interval};
use crate::core::types::{PortfolioParams, PriorYear};

/// Guardrail strategy: starts at `initial_rate` of the initial balance, then
/// each year compares last year's withdrawal with the current balance. Above
/// the upper rail the withdrawal is cut, below the lower rail it is raised,
/// otherwise it follows inflation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GuytonKlinger {
    initial_rate: f64,
    raise_pct: f64,
    cut_pct: f64,
    upper_guardrail: f64,
    lower_guardrail: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GuardrailDecision {
    Cut,
    Raise,
    Hold,
}

impl GuytonKlinger {
    pub fn new(initial_rate: f64, guard_pct: f64, raise_pct: f64, cut_pct: f64) -> SimResult<Self> {
        require_open_unit_interval("initial_rate", initial_rate)?;
        require_open_unit_interval("guard_pct", guard_pct)?;
        require_open_unit_interval("raise_pct", raise_pct)?;
        require_open_unit_interval("cut_pct", cut_pct)?;

        Ok(Self {
            initial_rate,
            raise_pct,
            cut_pct,
            upper_guardrail: initial_rate * (1.0 + guard_pct),
            lower_guardrail: initial_rate * (1.0 - guard_pct),
        })
    }

    pub fn guardrails(&self) -> (f64, f64) {
        (self.lower_guardrail, self.upper_guardrail)
    }

    pub fn decide(&self, withdrawal_rate: f64) -> GuardrailDecision {
        if withdrawal_rate > self.upper_guardrail {
            GuardrailDecision::Cut
        } else if withdrawal_rate < self.lower_guardrail {
            GuardrailDecision::Raise
        } else {
            GuardrailDecision::Hold
        }
    }
}

impl WithdrawalStrategy for GuytonKlinger {
    fn name(&self) -> &'static str {
        "guyton_klinger"
    }

    fn calculate_withdrawal(&self, prior: Option<PriorYear<'_>>, params: &PortfolioParams) -> f64 {
        let Some(prior) = prior else {
            return params.init_balance() * self.initial_rate;
        };

        let last = prior.state();
        let balance = last.end_balance;
        if balance <= 0.0 {
            return 0.0;
        }

        let previous = last.withdrawal.max(0.0);
        let amount = match self.decide(previous / balance) {
            GuardrailDecision::Cut => previous * (1.0 - self.cut_pct),
            GuardrailDecision::Raise => previous * (1.0 + self.raise_pct),
            GuardrailDecision::Hold => previous * (1.0 + last.inflation),
        };
        amount.max(0.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::strategies::test_support::{params, year};

    fn assert_approx(actual: f64, expected: f64) {
        assert!(
            (actual - expected).abs() <= 1e-6,
            "expected {expected}, got {actual}"
        );
    }

    fn strategy() -> GuytonKlinger {
        GuytonKlinger::new(0.05, 0.20, 0.10, 0.10).expect("valid params")
    }

    #[test]
    fn guardrails_are_symmetric_around_initial_rate() {
        let (lower, upper) = strategy().guardrails();
        assert_approx(lower, 0.04);
        assert_approx(upper, 0.06);
    }

    #[test]
    fn first_year_is_initial_rate_without_guardrail_check() {
        assert_approx(strategy().calculate_withdrawal(None, &params()), 50_000.0);
    }

    #[test]
    fn within_guardrails_follows_inflation() {
        // 50k / 1M = 5%, inside [4%, 6%]
        let path = [year(0, 1_050_000.0, 1_000_000.0, 50_000.0, 0.03)];
        assert_approx(
            strategy().calculate_withdrawal(PriorYear::from_path(&path), &params()),
            51_500.0,
        );
    }

    #[test]
    fn ratio_above_upper_rail_cuts_instead_of_indexing() {
        let path = [
            year(0, 1_000_000.0, 900_000.0, 50_000.0, 0.02),
            // year 2: 51k / 800k = 6.375% > 6%
            year(1, 900_000.0, 800_000.0, 51_000.0, 0.04),
        ];
        assert_approx(
            strategy().calculate_withdrawal(PriorYear::from_path(&path), &params()),
            51_000.0 * 0.9,
        );
    }

    #[test]
    fn ratio_below_lower_rail_raises() {
        // 50k / 1.5M = 3.33% < 4%
        let path = [year(0, 1_050_000.0, 1_500_000.0, 50_000.0, 0.02)];
        assert_approx(
            strategy().calculate_withdrawal(PriorYear::from_path(&path), &params()),
            55_000.0,
        );
    }

    #[test]
    fn zero_balance_withdraws_nothing() {
        let path = [year(0, 50_000.0, 0.0, 50_000.0, 0.02)];
        assert_eq!(
            strategy().calculate_withdrawal(PriorYear::from_path(&path), &params()),
            0.0
        );
    }

    #[test]
    fn decide_classifies_rates() {
        let s = strategy();
        assert_eq!(s.decide(0.07), GuardrailDecision::Cut);
        assert_eq!(s.decide(0.03), GuardrailDecision::Raise);
        assert_eq!(s.decide(0.05), GuardrailDecision::Hold);
    }

    #[test]
    fn rejects_parameters_outside_open_unit_interval() {
        assert!(GuytonKlinger::new(0.0, 0.2, 0.1, 0.1).is_err());
        assert!(GuytonKlinger::new(0.05, 1.0, 0.1, 0.1).is_err());
        assert!(GuytonKlinger::new(0.05, 0.2, -0.1, 0.1).is_err());
        assert!(GuytonKlinger::new(0.05, 0.2, 0.1, 1.5).is_err());
    }
}
