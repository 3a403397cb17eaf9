use std::path::Path;
use std::process;

use anyhow::Error;
use console::Term;
use log::{error, info, trace, warn};

use crate::backend::MediaBackend;
use crate::backend::radarr::RadarrBackend;
use crate::backend::sonarr::SonarrBackend;
use crate::cleanup::engine::{EngineError, ReconciliationEngine};
use crate::cleanup::progress::ConsoleProgress;
use crate::cleanup::{CancelToken, RunOptions};
use crate::config::{Cli, Config, ServiceChoice};
use crate::fsprobe::DiskProbe;
use crate::models::CleanupResult;
use crate::report;

/// The name of the cargo package.
const NAME: &str = env!("CARGO_PKG_NAME");

/// The version of the cargo package.
const VERSION: &str = env!("CARGO_PKG_VERSION");

/// A program class that handles the flow of one cleanup invocation across
/// the configured services.
pub(crate) struct Program {
    cli: Cli,
}

impl Program {
    /// Creates a new instance of the program.
    pub(crate) fn new(cli: Cli) -> Self {
        Program { cli }
    }

    /// Runs the cleanup against every selected service in turn.
    pub(crate) fn run(&self) -> Result<(), Error> {
        Term::stdout().set_title("refresharr");
        trace!("Starting {} {}...", NAME, VERSION);

        let config = Config::load(&self.cli)?;
        if config.dry_run {
            info!("Dry run requested: records and symlinks will be left untouched");
        }

        let services = self.selected_services(&config);
        let mut all_ok = true;
        for service in services {
            if !self.run_service(&config, service)? {
                all_ok = false;
            }
        }

        if !all_ok {
            warn!("Cleanup finished with errors");
            process::exit(1);
        }
        info!("Cleanup finished");
        Ok(())
    }

    fn selected_services(&self, config: &Config) -> Vec<ServiceChoice> {
        match self.cli.service {
            ServiceChoice::Sonarr => vec![ServiceChoice::Sonarr],
            ServiceChoice::Radarr => vec![ServiceChoice::Radarr],
            ServiceChoice::Auto => {
                let mut services = Vec::new();
                if config.sonarr.is_some() {
                    services.push(ServiceChoice::Sonarr);
                }
                if config.radarr.is_some() {
                    services.push(ServiceChoice::Radarr);
                }
                services
            }
        }
    }

    /// Runs one service end to end and returns whether it succeeded.
    fn run_service(&self, config: &Config, service: ServiceChoice) -> Result<bool, Error> {
        let options = RunOptions {
            concurrent_limit: config.concurrent_limit,
            request_delay: config.request_delay,
            dry_run: config.dry_run,
            add_missing_media: config.add_missing_media,
            quality_profile_id: config.quality_profile_id,
        };

        let probe = DiskProbe;
        let progress = ConsoleProgress::new();
        let cancel = CancelToken::new();

        // The backends only differ in wire shape, so each arm boils down
        // to constructing the right client and running the same engine.
        let outcome = match service {
            ServiceChoice::Sonarr => {
                // validate() guarantees the config is present here.
                let Some(service_config) = &config.sonarr else {
                    return Ok(true);
                };
                let backend = SonarrBackend::new(
                    &service_config.url,
                    &service_config.api_key,
                    config.request_timeout,
                )?;
                if config.add_missing_media {
                    check_quality_profile(&backend, config.quality_profile_id);
                }
                let engine =
                    ReconciliationEngine::new(&backend, &probe, &progress, options, cancel);
                if config.series_ids.is_empty() {
                    engine.run()
                } else {
                    info!("Restricting cleanup to series IDs {:?}", config.series_ids);
                    engine.run_filtered(&config.series_ids)
                }
            }
            ServiceChoice::Radarr => {
                let Some(service_config) = &config.radarr else {
                    return Ok(true);
                };
                let backend = RadarrBackend::new(
                    &service_config.url,
                    &service_config.api_key,
                    config.request_timeout,
                )?;
                if config.add_missing_media {
                    check_quality_profile(&backend, config.quality_profile_id);
                }
                let engine =
                    ReconciliationEngine::new(&backend, &probe, &progress, options, cancel);
                if config.movie_ids.is_empty() {
                    engine.run()
                } else {
                    info!("Restricting cleanup to movie IDs {:?}", config.movie_ids);
                    engine.run_filtered(&config.movie_ids)
                }
            }
            ServiceChoice::Auto => unreachable!("auto is resolved before dispatch"),
        };

        match outcome {
            Ok(result) => {
                self.emit_report(&result);
                Ok(result.success)
            }
            Err(EngineError::Cancelled { partial }) => {
                warn!("Run was cancelled; reporting partial results");
                self.emit_report(&partial);
                Ok(false)
            }
            Err(err) => {
                error!("Cleanup failed: {}", err);
                Ok(false)
            }
        }
    }

    /// Persists the JSON report and optionally prints it to the terminal.
    fn emit_report(&self, result: &CleanupResult) {
        for message in &result.messages {
            warn!("{}", message);
        }

        match report::write_report(&result.report, Path::new(report::REPORT_DIR)) {
            Ok(path) => trace!("Report written to {}", path.display()),
            Err(err) => warn!("Failed to write report: {:#}", err),
        }

        if !self.cli.no_report {
            report::render_terminal(&result.report);
        }
    }
}

/// Sanity check for the profile that symlink recovery will assign to
/// added items. Advisory only; the add call is the real authority.
fn check_quality_profile(backend: &dyn MediaBackend, profile_id: i32) {
    match backend.list_quality_profiles() {
        Ok(profiles) => {
            if !profiles.iter().any(|profile| profile.id == profile_id) {
                warn!(
                    "Quality profile {} is not configured on {}; adds may be rejected",
                    profile_id,
                    backend.name()
                );
            }
        }
        Err(err) => warn!("Could not list quality profiles: {}", err),
    }
}
