//! Thin demonstration binary wiring the library together for one or more
//! targets. Each target directory is wrapped in place: it is both the
//! backing tree and the mountpoint the virtualized view appears at, exactly
//! as `original_source/groot-ns.c`'s `wrapdirs` does. Flag parsing is an
//! external collaborator per `spec.md §1`'s Non-goals, so this takes its
//! arguments positionally.
//!
//! Usage: `probe <dir-to-wrap>...`

use std::path::PathBuf;
use std::process::ExitCode;

use grootfs::bringup::bring_up;
use grootfs::config::EngineConfig;

fn main() -> ExitCode {
    tracing_subscriber::fmt().with_env_filter(tracing_subscriber::EnvFilter::from_default_env()).init();

    let targets: Vec<PathBuf> = std::env::args_os().skip(1).map(PathBuf::from).collect();
    if targets.is_empty() {
        eprintln!("groot: usage: probe <dir-to-wrap>...");
        return ExitCode::FAILURE;
    }

    match bring_up(&targets, EngineConfig::default()) {
        Ok(report) => {
            for t in &report.mounted {
                tracing::info!(target = %t.display(), "groot: mounted");
            }
            for t in &report.skipped {
                tracing::warn!(target = %t.display(), "groot: skipped (could not open)");
            }
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("{e}");
            ExitCode::FAILURE
        }
    }
}
