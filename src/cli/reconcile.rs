//! The `tcassoc` run: resolve settings, build the store and inventory, reconcile

use miette::Result;
use std::io::IsTerminal;

use crate::cli::args::{Cli, GlobalOpts};
use crate::cli::summary;
use crate::core::{
    AzureDevOpsStore, Config, ManifestInventory, ReconcileError, ReconcileOptions,
    ReconcileReport, Reconciler, Settings,
};

/// Install the tracing subscriber
///
/// `RUST_LOG` wins when set; otherwise verbosity flags pick the level.
/// Logs go to stderr so the summary on stdout stays clean.
pub fn init_logging(global: &GlobalOpts) {
    let default_level = if global.verbose {
        "tcassoc=debug,info"
    } else if global.quiet {
        "warn"
    } else {
        "info"
    };

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level));

    // A subscriber may already be installed when embedded; keep that one
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_ansi(std::io::stderr().is_terminal())
        .with_writer(std::io::stderr)
        .try_init();
}

pub fn run(cli: Cli) -> Result<()> {
    init_logging(&cli.global);

    let outcome = Config::load()
        .and_then(|config| Settings::resolve(cli.raw_settings(), config))
        .map_err(ReconcileError::from)
        .and_then(|settings| reconcile(&settings));

    match outcome {
        Ok(report) => {
            tracing::info!(termination = "success", "Test case association finished");
            summary::print(&report, cli.global.quiet);
            Ok(())
        }
        Err(e) => {
            tracing::error!(termination = %e.termination(), "Test case association stopped");
            Err(e.into())
        }
    }
}

/// One reconciliation against Azure DevOps with resolved settings
pub fn reconcile(settings: &Settings) -> Result<ReconcileReport, ReconcileError> {
    tracing::debug!(?settings, "resolved settings");

    let inventory = match &settings.inventory {
        Some(path) => ManifestInventory::new(path.clone()),
        None => ManifestInventory::discover(&settings.sources_dir, &settings.test_binary)?,
    };
    tracing::debug!(manifest = %inventory.path().display(), "using test inventory");

    let store = AzureDevOpsStore::new(
        &settings.host,
        &settings.project,
        &settings.token,
        settings.timeout,
    )?;

    let options = ReconcileOptions {
        test_binary: settings.test_binary.clone(),
        test_type: settings.test_type.clone(),
        max_missing: settings.max_missing,
        dry_run: settings.dry_run,
    };

    Reconciler::new(&store, &inventory, options).run()
}
