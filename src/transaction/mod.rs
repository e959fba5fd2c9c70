// ============================================================================
// Transaction Module
// ============================================================================
//
// Single-writer write transactions. The state machine lives in `state`,
// the command-pattern undo journal in `change`.
//
// ============================================================================

pub mod change;
pub mod state;

pub use change::Change;
pub use state::{Transaction, TransactionId, TransactionState};
