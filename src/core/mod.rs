mod error;
mod ledger;
mod market;
mod rng;
pub mod strategies;
mod summary;
mod types;

pub use error::{SimError, SimResult};
pub use ledger::{CashFlowLedger, run_simulation};
pub use market::{
    DEFAULT_BLOCK_SIZE, FixedMarket, HistoricalSeries, HistoricalYear, MarketAssumptions,
    MarketMode, MarketPaths, MarketSample, MarketSimulator, ReturnSource,
};
pub use strategies::{StrategyParams, StrategyRegistry, WithdrawalStrategy};
pub use summary::{SimulationSummary, YearBand, percentile, summarize};
pub use types::{MAX_FEES_BPS, PortfolioParams, PriorYear, ResultRow, ResultsTable, YearState};
