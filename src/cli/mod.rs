//! CLI module - argument parsing and the reconcile run

pub mod args;
pub mod helpers;
pub mod reconcile;
pub mod summary;

pub use args::{Cli, GlobalOpts};
pub use reconcile::run;
