//! Transactional store (C4). Each table gets a module of free functions
//! taking `impl sqlx::Executor`, mirroring the `db::runtime_vm_*` layout
//! this crate was built from — no repository trait objects, just plain
//! queries next to the row type they return.

pub mod action_logs;
pub mod policies;
pub mod repositories;
pub mod scans;
pub mod violations;
