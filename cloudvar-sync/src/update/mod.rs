//! Update commands and the per-item manager that schedules and reconciles them.

pub mod command;
pub mod manager;

pub use command::{
    Completion, DataState, UpdateCommand, UpdateCommandGroup, UpdateOperation, UpdateSource,
};
pub use manager::{UpdateManager, ValueChange};
