use std::path::PathBuf;

use coverage_fetch_lib::settings::{self, Overrides};
use owo_colors::OwoColorize;
use owo_colors::Stream::Stdout;

use crate::commands::RunStatus;
use crate::error::CliError;

/// Show effective settings and their sources.
pub(crate) fn run_config_show() -> Result<RunStatus, CliError> {
    let path = settings::settings_path();

    log::info!(
        "{}",
        "coverage-fetch Configuration".if_supports_color(Stdout, |t| t.bold()),
    );
    log::info!("");
    if path.exists() {
        log::info!(
            "  Settings file: {} {}",
            path.display().if_supports_color(Stdout, |t| t.cyan()),
            "(exists)".if_supports_color(Stdout, |t| t.green()),
        );
    } else {
        log::info!(
            "  Settings file: {} {}",
            path.display().if_supports_color(Stdout, |t| t.cyan()),
            "(not found)".if_supports_color(Stdout, |t| t.dimmed()),
        );
    }
    log::info!("");

    let file = settings::load_settings(&path)?;
    let resolved = settings::resolve(PathBuf::new(), &Overrides::default(), file.as_ref(), |k| {
        std::env::var(k).ok()
    })?;

    for (name, value, source) in resolved.entries() {
        log::info!(
            "  {:<12} {} {}",
            name,
            value,
            format!("({})", source).if_supports_color(Stdout, |t| t.dimmed()),
        );
    }

    if let Err(e) = resolved.config.validate() {
        log::warn!("");
        log::warn!(
            "  {} {}",
            "\u{26A0}".if_supports_color(Stdout, |t| t.yellow()),
            e,
        );
    }
    Ok(RunStatus::Completed)
}

/// Print the settings file path.
pub(crate) fn run_config_path() -> Result<RunStatus, CliError> {
    println!("{}", settings::settings_path().display());
    Ok(RunStatus::Completed)
}
