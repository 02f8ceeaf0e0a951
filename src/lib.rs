//! tcassoc: Test Case association for Azure DevOps
//!
//! Reconciles the automated tests declared by a compiled test binary with
//! the "Test Case" work items of an Azure DevOps project, so every Test Case
//! records which automated test implements it.

pub mod cli;
pub mod core;
