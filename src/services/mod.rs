pub mod coordinator;
pub mod intent_locks;
pub mod ledger;
pub mod settlement;
pub mod sweeper;

pub use coordinator::{
    CampaignCheckout, CheckoutOutcome, CoordinatorError, CoordinatorSettings,
    ReconciliationCoordinator, StatusSnapshot, SweepReport, WalletDeposit, WebhookOutcome,
};
pub use intent_locks::KeyedLocks;
pub use ledger::{Ledger, LedgerAuditReport, LedgerError};
pub use settlement::Settlement;
pub use sweeper::run_sweeper;
