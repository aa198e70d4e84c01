//! Order ledger: idempotency guard, pre-trade gate and the order state machine.

pub mod idempotency;
pub mod ledger;
pub mod pretrade;
pub mod state_machine;

pub use idempotency::{IdempotencyGuard, KeyCheck};
pub use ledger::{LedgerStats, OrderLedger, OrderOutcome};
pub use pretrade::{OrderRequest, PreTradeLimits, PreTradeValidator, ValidationResult};
pub use state_machine::{apply_event, ManagedOrder, OrderEvent, OrderState, Side, Transition, TransitionError};
