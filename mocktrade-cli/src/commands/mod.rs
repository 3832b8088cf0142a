//! Command implementations for the mocktrade CLI

pub mod migrate;
pub mod seed;
pub mod status;

pub use migrate::{run_list, run_migrate, run_migrate_one};
pub use seed::run_seed_account;
pub use status::run_status;
