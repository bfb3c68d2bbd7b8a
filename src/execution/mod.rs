// Position bookkeeping, exit decisions and order execution
pub mod executor;
pub mod exit_evaluator;
pub mod ledger;
pub mod reconciler;

pub use executor::{OrderExecutor, PaperConfig, PaperExecutor};
pub use exit_evaluator::{
    in_top_n, ExitConfig, ExitDecision, ExitEvaluator, ExitInputs, TakeProfitTier, EXIT_PRIORITY,
};
pub use ledger::{FillEvent, LedgerOutcome, OrderLedger, PositionBook, DEFAULT_QUANTITY_EPSILON};
pub use reconciler::{
    Divergence, PositionReconciler, ReconcileConfig, ReconciliationOutcome, SizeFix,
};
