//! Kanban board mutation path

pub mod coordinator;

pub use coordinator::{
    MutationChange, MutationCoordinator, MutationOutcome, MutationProposal, RollbackReason,
};
