//! CLI argument definitions using clap derive

use clap::Parser;
use std::path::PathBuf;

use crate::core::config::RawSettings;

#[derive(Parser, Debug)]
#[command(name = "tcassoc")]
#[command(author, version, about = "Associate automated tests with Azure DevOps Test Case work items")]
#[command(long_about = "Reconciles the automated tests declared by a compiled test binary with the \
Test Case work items of an Azure DevOps project: validates every [TestCaseId], binds each Test Case \
to the test implementing it, and clears Test Cases whose test is gone.")]
pub struct Cli {
    /// Azure DevOps host (e.g. https://org.visualstudio.com)
    #[arg(env = "AZURE_HOST")]
    pub host: Option<String>,

    /// Azure DevOps project name
    #[arg(env = "AZURE_PROJECT")]
    pub project: Option<String>,

    /// Automated test type label stored on each Test Case (e.g. UI)
    #[arg(env = "TEST_TYPE")]
    pub test_type: Option<String>,

    /// File name of the test binary to locate (e.g. MyProject.Tests.dll)
    #[arg(env = "TEST_DLL")]
    pub test_binary: Option<String>,

    /// Maximum number of tests allowed to lack a [TestCaseId] (empty means 0)
    #[arg(env = "MAX_MISSING_TEST_CASES")]
    pub max_missing: Option<String>,

    /// Validate only, without touching any work item (true/false)
    #[arg(env = "DRY_RUN")]
    pub dry_run: Option<String>,

    /// Personal access token
    #[arg(long, env = "AZURE_TOKEN", hide_env_values = true)]
    pub token: Option<String>,

    /// Root directory searched for the test binary (default: Build_SourcesDirectory or .)
    #[arg(long)]
    pub sources_dir: Option<PathBuf>,

    /// Inventory manifest to use instead of <binary>.tests.yaml next to the binary
    #[arg(long)]
    pub inventory: Option<PathBuf>,

    /// Per-request timeout in seconds
    #[arg(long)]
    pub timeout: Option<u64>,

    #[command(flatten)]
    pub global: GlobalOpts,
}

#[derive(clap::Args, Clone, Debug, Default)]
pub struct GlobalOpts {
    /// Suppress non-essential output
    #[arg(long, short = 'q', conflicts_with = "verbose")]
    pub quiet: bool,

    /// Enable verbose output
    #[arg(long, short = 'v')]
    pub verbose: bool,
}

impl Cli {
    /// Values for [`crate::core::Settings::resolve`]
    pub fn raw_settings(&self) -> RawSettings {
        RawSettings {
            host: self.host.clone(),
            project: self.project.clone(),
            test_type: self.test_type.clone(),
            test_binary: self.test_binary.clone(),
            max_missing: self.max_missing.clone(),
            dry_run: self.dry_run.clone(),
            token: self.token.clone(),
            sources_dir: self.sources_dir.clone(),
            inventory: self.inventory.clone(),
            timeout_secs: self.timeout,
        }
    }
}
