use std::path::Path;

use coverage_fetch_core::BatchConfig;
use coverage_fetch_lib::async_util::run_with_events;
use coverage_fetch_lib::settings::{self, Overrides};
use coverage_fetch_lib::{
    BatchDriver, BatchEvent, BatchSummary, CancelFlag, CsvBoundsSource, PolygonSource,
    ReportStatus,
};
use coverage_fetch_wcs::WcsClient;
use owo_colors::OwoColorize;
use owo_colors::Stream::Stdout;

use crate::FetchArgs;
use crate::commands::RunStatus;
use crate::error::{CliError, EXIT_INTERRUPTED};
use crate::progress::ProgressDisplay;

/// Failures listed individually when there are at most this many.
const MAX_LISTED_FAILURES: usize = 5;
const MESSAGE_PREVIEW_CHARS: usize = 50;

/// Run the fetch command.
pub(crate) fn run_fetch(args: FetchArgs, quiet: bool) -> Result<RunStatus, CliError> {
    let overrides = Overrides {
        workers: args.workers,
        sleep: args.sleep,
        resolution: args.resolution,
        max_pixels: args.max_pixels,
        wcs_url: args.wcs_url,
        coverage_id: args.coverage_id,
        crs: args.crs,
        format: args.format,
        timeout: args.timeout,
    };
    let file = settings::load_settings(&settings::settings_path())?;
    let resolved = settings::resolve(&args.output_dir, &overrides, file.as_ref(), |k| {
        std::env::var(k).ok()
    })?;
    let config = resolved.config;
    config.validate()?;

    print_banner(&args.input, &config);

    let source = CsvBoundsSource::open(&args.input)?;
    log::info!(
        "{}",
        format!("Found {} polygons to process", source.len_hint().unwrap_or_default())
            .if_supports_color(Stdout, |t| t.green()),
    );

    let client = WcsClient::new(&config.service)?;
    let workers = config.workers;
    let output_dir = config.output_dir.clone();
    let driver = BatchDriver::prepare(config, client)?;

    let rt = tokio::runtime::Runtime::new().map_err(|e| CliError::runtime(e.to_string()))?;
    let summary = rt.block_on(async {
        spawn_interrupt_handler(driver.cancel_flag());

        let progress_rx = driver.progress();
        let mut display = ProgressDisplay::new(workers, source.len_hint(), quiet);
        let (event_tx, event_rx) = tokio::sync::mpsc::unbounded_channel::<BatchEvent>();

        let result = run_with_events(driver.run(&source, event_tx), event_rx, |event| {
            let snapshot = *progress_rx.borrow();
            display.handle(&event, snapshot);
        })
        .await;

        display.finish();
        result
    })?;

    print_summary(&summary, &output_dir);

    if summary.interrupted {
        Ok(RunStatus::Interrupted)
    } else {
        Ok(RunStatus::Completed)
    }
}

/// First Ctrl-C stops reading input and lets queued requests finish.
/// A second one exits immediately; artifacts are renamed into place only
/// when complete, so nothing half-written is left at a final path.
fn spawn_interrupt_handler(cancel: CancelFlag) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_err() {
            return;
        }
        cancel.cancel();
        log::warn!(
            "{} Interrupted: finishing queued requests (Ctrl-C again to exit now)",
            "\u{26A0}".if_supports_color(Stdout, |t| t.yellow()),
        );
        if tokio::signal::ctrl_c().await.is_ok() {
            std::process::exit(i32::from(EXIT_INTERRUPTED));
        }
    });
}

fn print_banner(input: &Path, config: &BatchConfig) {
    log::info!("");
    log::info!(
        "{}",
        "WCS Raster Downloader".if_supports_color(Stdout, |t| t.bold()),
    );
    log::info!("{}", "=".repeat(40));
    log::info!("Input:      {}", input.display().if_supports_color(Stdout, |t| t.cyan()));
    log::info!(
        "Output:     {}",
        config.output_dir.display().if_supports_color(Stdout, |t| t.cyan()),
    );
    log::info!("Workers:    {}", config.workers);
    log::info!("Sleep:      {}s", config.sleep_secs);
    log::info!("Resolution: {}m", config.resolution);
    log::info!("Max pixels: {}", config.max_pixels);
    log::info!("Coverage:   {} ({})", config.service.coverage_id, config.service.crs);
    log::info!(
        "Service:    {}",
        config.service.url.as_str().if_supports_color(Stdout, |t| t.dimmed()),
    );
    log::info!("");
}

fn print_summary(summary: &BatchSummary, output_dir: &Path) {
    log::info!("");
    log::info!(
        "{}",
        "Download Summary".if_supports_color(Stdout, |t| t.bold()),
    );
    log::info!(
        "  {} {:<20} {:>8}",
        "\u{2714}".if_supports_color(Stdout, |t| t.green()),
        "Completed",
        summary.completed,
    );
    log::info!(
        "  {} {:<20} {:>8}",
        "\u{23ED}".if_supports_color(Stdout, |t| t.yellow()),
        "Skipped (existing)",
        summary.skipped,
    );
    log::info!(
        "  {} {:<20} {:>8}",
        "\u{2718}".if_supports_color(Stdout, |t| t.red()),
        "Failed",
        summary.failed,
    );
    log::info!("    {:<20} {:>8}", "Total", summary.total);

    if summary.interrupted {
        log::warn!(
            "{} Interrupted before all polygons were read; run again to continue",
            "\u{26A0}".if_supports_color(Stdout, |t| t.yellow()),
        );
    }

    match &summary.report {
        ReportStatus::Written { path, .. } => {
            log::warn!("");
            log::warn!(
                "{} Failed polygons logged to: {}",
                "\u{2718}".if_supports_color(Stdout, |t| t.red()),
                path.display(),
            );
        }
        ReportStatus::Unwritten { path, error } => {
            log::error!(
                "{} Could not write failure report {}: {}",
                "\u{2718}".if_supports_color(Stdout, |t| t.red()),
                path.display(),
                error,
            );
        }
        ReportStatus::Cleared { path } => {
            log::info!(
                "{}",
                format!("Removed failure report from an earlier run: {}", path.display())
                    .if_supports_color(Stdout, |t| t.dimmed()),
            );
        }
        ReportStatus::NotNeeded => {}
    }

    if summary.has_failures() && summary.failures.len() <= MAX_LISTED_FAILURES {
        log::warn!("");
        log::warn!("{}", "Failed Polygons".if_supports_color(Stdout, |t| t.bold()));
        for failure in &summary.failures {
            log::warn!(
                "  {:>6}  {:<16} {}",
                failure.index,
                failure.error_type,
                preview(&failure.error_message),
            );
        }
    }

    log::info!("");
    log::info!(
        "{}",
        format!("Tiles are in {}", output_dir.display()).if_supports_color(Stdout, |t| t.dimmed()),
    );
}

fn preview(message: &str) -> String {
    message.chars().take(MESSAGE_PREVIEW_CHARS).collect()
}
