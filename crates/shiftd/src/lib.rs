//! Shift scheduling engine: state machine, assignment checks and stores.

pub mod directory;
pub mod engine;
pub mod persistence;
pub mod state_machine;
pub mod store;
pub mod validator;

pub use directory::*;
pub use engine::*;
pub use persistence::*;
pub use state_machine::*;
pub use store::*;
pub use validator::*;

#[cfg(test)]
mod tests {
    use super::{is_transition_allowed, MemoryShiftStore, SchedulingEngine, ShiftStore};
    use shift_core::state::ShiftStatus;

    #[test]
    fn crate_root_reexports_state_machine_helpers() {
        assert!(is_transition_allowed(ShiftStatus::Rejected, ShiftStatus::Open));
        assert!(!is_transition_allowed(ShiftStatus::Billed, ShiftStatus::Open));
    }

    #[test]
    fn crate_root_reexports_engine_and_stores() {
        let engine = SchedulingEngine::new(
            MemoryShiftStore::new(),
            super::InMemoryDirectory::new(),
            Default::default(),
        );
        assert!(engine
            .store()
            .list_shifts(&super::ShiftQuery::company("1"))
            .expect("list")
            .is_empty());
    }
}
