use tracing::{debug, info};

use super::error::{SimError, SimResult};
use super::market::{MarketSample, ReturnSource, validate_dimensions};
use super::strategies::{DEFAULT_START_AGE, WithdrawalStrategy};
use super::types::{PortfolioParams, PriorYear, ResultsTable, YearState};

/// Advances every path year by year: withdraw, then grow, then charge fees.
#[derive(Debug, Clone, Copy)]
pub struct CashFlowLedger {
    params: PortfolioParams,
    start_age: Option<u32>,
}

impl CashFlowLedger {
    pub fn new(params: PortfolioParams) -> Self {
        Self {
            params,
            start_age: Some(DEFAULT_START_AGE),
        }
    }

    /// Age recorded on year 0; `None` leaves ages off the table.
    pub fn with_start_age(mut self, start_age: Option<u32>) -> Self {
        self.start_age = start_age;
        self
    }

    pub fn params(&self) -> &PortfolioParams {
        &self.params
    }

    pub fn run(
        &self,
        strategy: &dyn WithdrawalStrategy,
        market: &dyn ReturnSource,
        years: u32,
        paths: u32,
    ) -> SimResult<ResultsTable> {
        validate_dimensions(years, paths)?;
        let samples = market.generate(years, paths)?;
        if samples.years() != years || samples.paths() != paths {
            return Err(SimError::data(format!(
                "market produced a {}x{} grid, expected {paths}x{years}",
                samples.paths(),
                samples.years()
            )));
        }

        info!(
            strategy = strategy.name(),
            years,
            paths,
            seed = self.params.seed(),
            "simulation started"
        );

        let mut rows = Vec::with_capacity(years as usize * paths as usize);
        let mut depleted_paths = 0_u32;
        for path in 0..paths {
            let path_start = rows.len();
            for (year, sample) in samples.path(path).iter().enumerate() {
                let prior = PriorYear::from_path(&rows[path_start..]);
                let state = self.advance_year(strategy, prior, year as u32, *sample);
                if state.depleted && prior.is_none_or(|p| !p.state().depleted) {
                    depleted_paths += 1;
                    debug!(path, year, "path depleted");
                }
                rows.push(state);
            }
        }

        info!(
            strategy = strategy.name(),
            depleted_paths,
            rows = rows.len(),
            "simulation finished"
        );
        Ok(ResultsTable::from_rows(years, paths, rows))
    }

    fn advance_year(
        &self,
        strategy: &dyn WithdrawalStrategy,
        prior: Option<PriorYear<'_>>,
        year: u32,
        sample: MarketSample,
    ) -> YearState {
        let age = self.start_age.map(|age| age.saturating_add(year));
        let mut state = YearState {
            year,
            age,
            start_balance: 0.0,
            end_balance: 0.0,
            market_return: sample.market_return,
            inflation: sample.inflation,
            withdrawal: 0.0,
            depleted: true,
        };

        let start_balance = match prior {
            None => self.params.init_balance(),
            Some(p) if p.state().depleted => return state,
            Some(p) => p.state().end_balance,
        };

        let requested = strategy.calculate_withdrawal(prior, &self.params);
        // NaN from a misbehaving strategy withdraws nothing
        let withdrawal = if requested.is_nan() {
            0.0
        } else {
            requested.clamp(0.0, start_balance)
        };

        let grown = (start_balance - withdrawal) * (1.0 + sample.market_return);
        let end_balance = grown - grown * self.params.fee_rate();

        state.start_balance = start_balance;
        state.withdrawal = withdrawal;
        if end_balance > 0.0 {
            state.end_balance = end_balance;
            state.depleted = false;
        }
        state
    }
}

/// Runs with the default retirement age on year 0.
pub fn run_simulation(
    params: &PortfolioParams,
    strategy: &dyn WithdrawalStrategy,
    market: &dyn ReturnSource,
    years: u32,
    paths: u32,
) -> SimResult<ResultsTable> {
    CashFlowLedger::new(*params).run(strategy, market, years, paths)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::market::{
        FixedMarket, MarketAssumptions, MarketMode, MarketPaths, MarketSimulator,
    };
    use crate::core::strategies::{
        ConstantPercentage, Dummy, FixedRate, GuytonKlinger, StrategyParams, StrategyRegistry,
    };
    use proptest::prelude::{prop_assert, prop_assert_eq, proptest};

    fn assert_approx(actual: f64, expected: f64, tol: f64) {
        assert!(
            (actual - expected).abs() <= tol,
            "expected {expected}, got {actual}"
        );
    }

    fn params(fees_bps: f64) -> PortfolioParams {
        PortfolioParams::new(1_000_000.0, 0.6, fees_bps, 42).expect("valid params")
    }

    fn lognormal(params: &PortfolioParams) -> MarketSimulator {
        MarketSimulator::lognormal(params, &MarketAssumptions::default()).expect("valid market")
    }

    /// Same (return, inflation) script on every path.
    struct ScriptedMarket(Vec<MarketSample>);

    impl ReturnSource for ScriptedMarket {
        fn generate(&self, years: u32, paths: u32) -> SimResult<MarketPaths> {
            validate_dimensions(years, paths)?;
            Ok(MarketPaths::from_fn(years, paths, |_, year| {
                self.0[year as usize % self.0.len()]
            }))
        }
    }

    struct BrokenMarket;

    impl ReturnSource for BrokenMarket {
        fn generate(&self, _years: u32, _paths: u32) -> SimResult<MarketPaths> {
            Err(SimError::data("history file vanished"))
        }
    }

    struct ShortMarket;

    impl ReturnSource for ShortMarket {
        fn generate(&self, years: u32, paths: u32) -> SimResult<MarketPaths> {
            FixedMarket::new(0.0, 0.0).generate(years.saturating_sub(1).max(1), paths)
        }
    }

    fn sample(market_return: f64, inflation: f64) -> MarketSample {
        MarketSample {
            market_return,
            inflation,
        }
    }

    #[test]
    fn four_percent_rule_under_flat_market_matches_hand_calculation() {
        let params = params(50.0);
        let strategy = FixedRate::new(0.04).expect("valid rate");
        let table = run_simulation(&params, &strategy, &FixedMarket::new(0.0, 0.0), 30, 1)
            .expect("simulation runs");
        let path = table.path(0);
        assert_eq!(path.len(), 30);

        let mut balance = 1_000_000.0;
        for state in path {
            assert_approx(state.start_balance, balance, 1e-6);
            if balance >= 40_000.0 {
                assert_approx(state.withdrawal, 40_000.0, 1e-9);
                let fee = (balance - 40_000.0) * 0.005;
                assert_approx(state.end_balance, balance - 40_000.0 - fee, 1e-6);
            } else if balance > 0.0 {
                // final partial year drains what is left
                assert_approx(state.withdrawal, balance, 1e-9);
                assert_eq!(state.end_balance, 0.0);
                assert!(state.depleted);
            } else {
                assert_eq!(state.withdrawal, 0.0);
                assert_eq!(state.end_balance, 0.0);
                assert!(state.depleted);
            }
            balance = state.end_balance;
        }
        assert!(!path[22].depleted);
        assert!(path[23].depleted);
    }

    #[test]
    fn dummy_strategy_only_sees_growth_and_fees() {
        let params = params(100.0);
        let table = run_simulation(&params, &Dummy, &FixedMarket::new(0.0, 0.03), 10, 2)
            .expect("simulation runs");
        for path in 0..2 {
            let mut expected = 1_000_000.0;
            for state in table.path(path) {
                expected *= 0.99;
                assert_eq!(state.withdrawal, 0.0);
                assert!(!state.depleted);
                assert_approx(state.end_balance, expected, 1e-6);
            }
        }
    }

    #[test]
    fn dummy_strategy_never_withdraws_under_random_markets() {
        let params = params(50.0);
        let table =
            run_simulation(&params, &Dummy, &lognormal(&params), 40, 50).expect("simulation runs");
        assert!(table.rows().all(|row| row.state.withdrawal == 0.0));
        assert!(table.final_states().all(|s| s.end_balance > 0.0));
    }

    #[test]
    fn withdrawal_happens_before_growth_and_fee_after_growth() {
        let params = params(100.0);
        let strategy = FixedRate::new(0.10).expect("valid rate");
        let table = run_simulation(&params, &strategy, &FixedMarket::new(0.5, 0.0), 1, 1)
            .expect("simulation runs");
        let state = table.path(0)[0];
        // (1_000_000 - 100_000) * 1.5 = 1_350_000, less 1% fee
        assert_approx(state.end_balance, 1_336_500.0, 1e-6);
        assert_approx(state.withdrawal, 100_000.0, 1e-9);
    }

    #[test]
    fn oversized_requests_are_clamped_to_the_balance() {
        let params = params(0.0);
        let strategy = ConstantPercentage::new(1.0).expect("valid percent");
        let table = run_simulation(&params, &strategy, &FixedMarket::new(0.07, 0.02), 5, 1)
            .expect("simulation runs");
        let path = table.path(0);
        assert_approx(path[0].withdrawal, 1_000_000.0, 1e-9);
        assert!(path.iter().all(|s| s.depleted && s.end_balance == 0.0));
        assert!(path[1..].iter().all(|s| s.withdrawal == 0.0));
    }

    #[test]
    fn guardrail_cut_follows_a_rich_withdrawal_ratio() {
        let params = params(0.0);
        let strategy = GuytonKlinger::new(0.05, 0.20, 0.10, 0.10).expect("valid guardrails");
        let market = ScriptedMarket(vec![
            sample(0.0, 0.02),
            sample(-0.20, 0.02),
            sample(0.0, 0.02),
        ]);
        let table = run_simulation(&params, &strategy, &market, 3, 1).expect("simulation runs");
        let path = table.path(0);

        assert_approx(path[0].withdrawal, 50_000.0, 1e-9);
        // 50k / 950k sits inside the rails, so year 1 is inflation indexed
        assert_approx(path[1].withdrawal, 51_000.0, 1e-6);
        // 51k / 719.2k is above 6%, so year 2 is cut rather than indexed
        assert_approx(path[1].end_balance, 719_200.0, 1e-6);
        assert_approx(path[2].withdrawal, 45_900.0, 1e-6);
    }

    #[test]
    fn ages_advance_from_the_start_age() {
        let params = params(50.0);
        let market = FixedMarket::new(0.0, 0.0);
        let table = CashFlowLedger::new(params)
            .with_start_age(Some(60))
            .run(&Dummy, &market, 3, 1)
            .expect("simulation runs");
        let ages: Vec<Option<u32>> = table.path(0).iter().map(|s| s.age).collect();
        assert_eq!(ages, vec![Some(60), Some(61), Some(62)]);

        let ageless = CashFlowLedger::new(params)
            .with_start_age(None)
            .run(&Dummy, &market, 2, 1)
            .expect("simulation runs");
        assert!(ageless.rows().all(|row| row.state.age.is_none()));
    }

    #[test]
    fn identical_inputs_reproduce_identical_tables() {
        let params = params(50.0);
        let registry = StrategyRegistry::builtin();
        for name in ["four_percent_rule", "endowment", "guyton_klinger", "vpw"] {
            let strategy = registry
                .create(name, &StrategyParams::default())
                .expect("builtin constructs");
            let a = run_simulation(&params, strategy.as_ref(), &lognormal(&params), 30, 20)
                .expect("simulation runs");
            let b = run_simulation(&params, strategy.as_ref(), &lognormal(&params), 30, 20)
                .expect("simulation runs");
            assert_eq!(a, b);
            for (x, y) in a.rows().zip(b.rows()) {
                assert_eq!(x.state.end_balance.to_bits(), y.state.end_balance.to_bits());
                assert_eq!(x.state.withdrawal.to_bits(), y.state.withdrawal.to_bits());
            }
        }
    }

    #[test]
    fn path_results_do_not_depend_on_path_count() {
        let params = params(50.0);
        let strategy = FixedRate::new(0.05).expect("valid rate");
        let few = run_simulation(&params, &strategy, &lognormal(&params), 25, 3)
            .expect("simulation runs");
        let many = run_simulation(&params, &strategy, &lognormal(&params), 25, 30)
            .expect("simulation runs");
        for path in 0..3 {
            assert_eq!(few.path(path), many.path(path));
        }
    }

    #[test]
    fn zero_years_or_paths_is_a_configuration_error() {
        let params = params(50.0);
        let market = FixedMarket::new(0.0, 0.0);
        assert!(matches!(
            run_simulation(&params, &Dummy, &market, 0, 10),
            Err(SimError::Configuration(_))
        ));
        assert!(matches!(
            run_simulation(&params, &Dummy, &market, 10, 0),
            Err(SimError::Configuration(_))
        ));
    }

    #[test]
    fn market_failures_propagate_unchanged() {
        let params = params(50.0);
        assert_eq!(
            run_simulation(&params, &Dummy, &BrokenMarket, 10, 10),
            Err(SimError::data("history file vanished"))
        );
        assert!(matches!(
            run_simulation(&params, &Dummy, &ShortMarket, 10, 1),
            Err(SimError::Data(_))
        ));
    }

    #[test]
    fn bootstrap_mode_without_history_fails_before_running() {
        let params = params(50.0);
        let err = MarketSimulator::from_mode(
            MarketMode::Bootstrap,
            &params,
            &MarketAssumptions::default(),
            None,
            5,
        )
        .expect_err("no history supplied");
        assert!(matches!(err, SimError::Data(_)));
    }

    proptest! {
        #![proptest_config(proptest::test_runner::Config::with_cases(32))]

        #[test]
        fn prop_depleted_paths_stay_at_zero(
            seed in 0u64..10_000,
            rate in 0.05f64..0.30,
            equity in 0.0f64..=1.0,
            fees in 0.0f64..300.0,
        ) {
            let params = PortfolioParams::new(500_000.0, equity, fees, seed).expect("valid params");
            let strategy = FixedRate::new(rate).expect("valid rate");
            let table = run_simulation(&params, &strategy, &lognormal(&params), 40, 8)
                .expect("simulation runs");
            for path in 0..table.paths() {
                let mut depleted = false;
                for state in table.path(path) {
                    prop_assert!(state.end_balance >= 0.0);
                    prop_assert!(state.withdrawal >= 0.0);
                    prop_assert!(state.withdrawal <= state.start_balance);
                    if depleted {
                        prop_assert!(state.depleted);
                        prop_assert_eq!(state.end_balance, 0.0);
                        prop_assert_eq!(state.withdrawal, 0.0);
                    }
                    depleted = state.depleted;
                }
            }
        }
    }
}
