//! Estimation session core: ledger, aggregation, and the state machine

pub mod ledger;
pub mod machine;

pub use ledger::VoteLedger;
pub use machine::SessionService;
