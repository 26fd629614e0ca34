//! CLI command implementations
//!
//! Each subcommand has its own module with a `run` function.

pub mod inspect;
pub mod repair;
pub mod run;
pub mod scan;
pub mod test_connection;
