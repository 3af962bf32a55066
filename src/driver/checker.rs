//! Driver checker - one full update check and the periodic watch loop
//!
//! The GPU identity is resolved once when the checker is created. Every
//! check after that only resolves the driver page, scrapes it and decides.

use super::catalog::{CatalogResolver, ResolvedPage};
use super::decision::{decide, Decision};
use super::downloader::{existing_installer, DownloadJob};
use super::marker::MarkerStore;
use super::probe::DriverProbe;
use super::scraper::{PageFetcher, PageScraper, RegexExtractor, ScrapedRelease, VersionExtractor};
use super::types::{DriverChannel, GpuIdentity, LocalDriver, UpdateState};
use super::watcher::InstallerWatcher;
use super::DriverResult;
use log::{error, info, warn};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

/// Outcome of one check
#[derive(Debug, Clone, PartialEq)]
pub struct CheckReport {
    pub local: LocalDriver,
    pub online: ScrapedRelease,
    /// Driver page the online version was read from
    pub page_url: String,
    pub channel: DriverChannel,
    /// Studio was requested but this check used Standard
    pub fell_back: bool,
    pub decision: Decision,
    /// Installer for the online version already downloaded
    pub installer_ready: Option<PathBuf>,
}

/// What `download` and `install` should do with a report
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InstallPlan {
    /// Installer for the online version is already on disk
    Ready(PathBuf),
    /// Online version must be downloaded first
    Download,
    /// Newer version exists but the user skipped it
    Skipped,
    UpToDate,
}

impl CheckReport {
    /// A skipped version is left alone until it is unskipped, even when its
    /// installer was downloaded earlier
    pub fn install_plan(&self) -> InstallPlan {
        match self.decision.state {
            UpdateState::UpToDate => InstallPlan::UpToDate,
            UpdateState::UpdateSkipped => InstallPlan::Skipped,
            UpdateState::UpdateAvailable => match &self.installer_ready {
                Some(path) => InstallPlan::Ready(path.clone()),
                None if self.decision.show_download => InstallPlan::Download,
                None => InstallPlan::UpToDate,
            },
        }
    }
}

pub struct DriverChecker {
    probe: Box<dyn DriverProbe>,
    fetcher: Arc<dyn PageFetcher>,
    extractor: Box<dyn VersionExtractor>,
    markers: MarkerStore,
    identity: GpuIdentity,
    local: LocalDriver,
}

impl DriverChecker {
    /// Probe the local driver and resolve its catalog identity
    pub async fn connect(
        probe: Box<dyn DriverProbe>,
        fetcher: Arc<dyn PageFetcher>,
        data_dir: &Path,
        language_id: u32,
    ) -> DriverResult<Self> {
        let local = probe.probe()?;
        info!(
            "Local driver: {} on {} ({}, {})",
            local.version,
            local.gpu_name,
            if local.is_mobile { "notebook" } else { "desktop" },
            local.driver_type()
        );

        let identity = CatalogResolver::new(fetcher.as_ref())
            .identify(&local, probe.windows_build(), language_id)
            .await?;

        Ok(Self::with_identity(probe, fetcher, data_dir, identity, local))
    }

    /// Build a checker for an already known identity
    pub fn with_identity(
        probe: Box<dyn DriverProbe>,
        fetcher: Arc<dyn PageFetcher>,
        data_dir: &Path,
        identity: GpuIdentity,
        local: LocalDriver,
    ) -> Self {
        Self {
            probe,
            fetcher,
            extractor: Box::new(RegexExtractor::default()),
            markers: MarkerStore::new(data_dir),
            identity,
            local,
        }
    }

    pub fn with_extractor(mut self, extractor: Box<dyn VersionExtractor>) -> Self {
        self.extractor = extractor;
        self
    }

    pub fn local(&self) -> &LocalDriver {
        &self.local
    }

    pub fn identity(&self) -> &GpuIdentity {
        &self.identity
    }

    pub fn markers(&self) -> &MarkerStore {
        &self.markers
    }

    /// Re-read the installed driver version
    pub fn refresh_local(&mut self) -> DriverResult<()> {
        let local = self.probe.probe()?;
        if local.gpu_name != self.local.gpu_name {
            warn!(
                "GPU changed from '{}' to '{}', restart to re-resolve the catalog entry",
                self.local.gpu_name, local.gpu_name
            );
        }
        if local.version != self.local.version {
            info!(
                "Installed driver changed: {} -> {}",
                self.local.version, local.version
            );
        }
        self.local = local;
        Ok(())
    }

    /// Resolve, scrape and decide. Applies the marker side effects of the
    /// decision before returning.
    pub async fn check(&self) -> DriverResult<CheckReport> {
        let page: ResolvedPage = CatalogResolver::new(self.fetcher.as_ref())
            .resolve_with_fallback(&self.identity, &self.markers)
            .await?;

        let online = PageScraper::new(self.fetcher.as_ref(), self.extractor.as_ref())
            .scrape(&page.url)
            .await?;

        let skipped = self.markers.skipped_version();
        let decision = decide(&self.local.version, &online.version, skipped.as_deref())?;

        if decision.clear_skip_marker {
            info!("Online version {} differs from skipped version, clearing skip", online.version);
            self.markers.clear_skip();
        }

        info!(
            "Check complete: local {}, online {} -> {}",
            self.local.version, online.version, decision.state
        );

        let installer_ready = if decision.state.has_update() {
            existing_installer(self.markers.dir(), &online.version)
        } else {
            None
        };

        Ok(CheckReport {
            local: self.local.clone(),
            online,
            page_url: page.url,
            channel: page.channel,
            fell_back: page.fell_back,
            decision,
            installer_ready,
        })
    }

    /// Persist the online version of `report` as skipped
    pub fn skip(&self, report: &CheckReport) -> DriverResult<()> {
        info!("Skipping driver version {}", report.online.version);
        self.markers.skip_version(&report.online.version)
    }

    /// Download job for the online installer of `report`
    pub fn download_job(&self, report: &CheckReport) -> DownloadJob {
        DownloadJob::new(
            &report.online.download_url,
            &report.online.version,
            self.markers.dir(),
        )
    }

    /// Check every `interval` forever, handing each report to `on_report`.
    /// With an installer watcher, a finished driver installation triggers an
    /// extra check right away. A failed tick is logged and the loop keeps going.
    pub async fn watch<F>(
        &mut self,
        interval: Duration,
        mut installer: Option<InstallerWatcher>,
        mut on_report: F,
    ) where
        F: FnMut(&CheckReport),
    {
        let mut ticker = tokio::time::interval(interval);
        info!("Watching for driver updates every {:?}", interval);

        loop {
            let installed = tokio::select! {
                _ = ticker.tick() => None,
                alive = next_installation(installer.as_mut()) => Some(alive),
            };

            match installed {
                Some(false) => {
                    warn!("Installer watcher stopped, relying on the interval only");
                    installer = None;
                    continue;
                }
                Some(true) => info!("Driver installation detected, re-checking"),
                None => {}
            }

            if let Some(report) = self.tick().await {
                on_report(&report);
            }
        }
    }

    /// One watch iteration: re-probe, then check
    pub async fn tick(&mut self) -> Option<CheckReport> {
        if let Err(e) = self.refresh_local() {
            warn!("Could not re-read local driver, using last known version: {}", e);
        }

        match self.check().await {
            Ok(report) => Some(report),
            Err(e) => {
                error!("Driver check failed: {}", e);
                None
            }
        }
    }
}

/// Never resolves without a watcher
async fn next_installation(installer: Option<&mut InstallerWatcher>) -> bool {
    match installer {
        Some(watcher) => watcher.changed().await,
        None => std::future::pending().await,
    }
}
