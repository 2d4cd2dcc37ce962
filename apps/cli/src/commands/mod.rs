//! Command implementations for the Foreman CLI.

pub mod check;
pub mod run;
