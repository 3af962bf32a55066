use driverscout::driver::installer::launch_installer;
use driverscout::driver::{
    installer_core_dir, CheckReport, DownloadEvent, DownloadJob, DownloadManager, DownloadStatus,
    DriverChannel, DriverChecker, DriverError, HttpFetcher, InstallPlan, InstallerWatcher,
    UpdateState,
};
use driverscout::instance::{cleanup_if_owner, try_acquire_single_instance, SingleInstanceResult};
use driverscout::notification::{show_download_failed, show_update_available};
use driverscout::settings::{get_log_dir, get_settings_path, load_settings, save_settings_to};
use driverscout::AppContext;

use anyhow::{anyhow, bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use log::{error, info, warn};
use std::io::Write;
use std::panic;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Runtime;

/// Quiet period after the last installer file change before re-checking
const INSTALLER_SETTLE: Duration = Duration::from_secs(5);

#[derive(Parser, Debug)]
#[command(name = "driverscout", version)]
#[command(about = "Checks for, downloads and installs NVIDIA driver updates")]
struct Args {
    /// Pretend a known GPU is installed (for machines without NVIDIA hardware)
    #[arg(long, global = true)]
    fake: bool,

    /// Directory for downloaded installers and state files
    #[arg(long, global = true, value_name = "DIR")]
    dir: Option<PathBuf>,

    /// Debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug, Clone)]
enum Command {
    /// Compare the installed driver with the newest published one (default)
    Check,
    /// Check periodically and notify when an update appears
    Watch,
    /// Download the newest installer
    Download,
    /// Launch the newest installer, downloading it first if needed
    Install,
    /// Stop notifying about the newest version
    Skip,
    /// Forget a skipped version
    Unskip,
    /// Follow Game Ready (standard) or Studio drivers
    Channel {
        #[arg(value_enum)]
        channel: ChannelArg,
    },
}

#[derive(ValueEnum, Debug, Clone, Copy)]
enum ChannelArg {
    Standard,
    Studio,
}

impl Command {
    /// Commands that may start a download into the data directory
    fn writes_downloads(&self) -> bool {
        matches!(self, Command::Watch | Command::Download | Command::Install)
    }
}

impl From<ChannelArg> for DriverChannel {
    fn from(arg: ChannelArg) -> Self {
        match arg {
            ChannelArg::Standard => DriverChannel::Standard,
            ChannelArg::Studio => DriverChannel::Studio,
        }
    }
}

/// Set up crash logging to capture panics
fn setup_panic_hook() {
    panic::set_hook(Box::new(|info| {
        let location = info
            .location()
            .map(|l| format!("{}:{}:{}", l.file(), l.line(), l.column()))
            .unwrap_or_else(|| "unknown location".to_string());

        let message = if let Some(s) = info.payload().downcast_ref::<&str>() {
            s.to_string()
        } else if let Some(s) = info.payload().downcast_ref::<String>() {
            s.clone()
        } else {
            "Unknown panic".to_string()
        };

        eprintln!("PANIC at {}: {}", location, message);

        let crash_dir = get_log_dir();
        let _ = std::fs::create_dir_all(&crash_dir);
        let crash_file = crash_dir.join("crash.log");

        let crash_info = format!(
            "[{}] PANIC at {}: {}\nBacktrace (if RUST_BACKTRACE=1):\n{:?}\n\n",
            chrono::Local::now().format("%Y-%m-%d %H:%M:%S"),
            location,
            message,
            std::backtrace::Backtrace::capture()
        );

        if std::fs::write(&crash_file, &crash_info).is_ok() {
            eprintln!("Crash log written to: {}", crash_file.display());
        }
    }));
}

/// Log to a file in the per-user data directory, stderr if that fails
fn init_logging(verbose: bool) -> PathBuf {
    let log_dir = get_log_dir();
    let _ = std::fs::create_dir_all(&log_dir);
    let log_file_path = log_dir.join("driverscout.log");

    let log_level = if verbose || std::env::var("RUST_LOG").is_ok() {
        log::LevelFilter::Debug
    } else {
        log::LevelFilter::Info
    };

    if let Ok(log_file) = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&log_file_path)
    {
        env_logger::Builder::from_default_env()
            .filter_level(log_level)
            .format_timestamp_millis()
            .target(env_logger::Target::Pipe(Box::new(log_file)))
            .init();
    } else {
        env_logger::Builder::from_default_env()
            .filter_level(log_level)
            .format_timestamp_millis()
            .init();
    }

    info!("========================================");
    info!("Starting DriverScout v{}", env!("CARGO_PKG_VERSION"));
    info!("Log file: {}", log_file_path.display());
    info!("Log level: {:?}", log_level);
    log_file_path
}

fn main() -> ExitCode {
    setup_panic_hook();
    let args = Args::parse();
    init_logging(args.verbose);

    let rt = match Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("Failed to create tokio runtime: {}", e);
            return ExitCode::FAILURE;
        }
    };

    match rt.block_on(run(args)) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{:#}", e);
            eprintln!("Error: {:#}", e);
            let code = e
                .downcast_ref::<DriverError>()
                .map(DriverError::exit_code)
                .unwrap_or(1);
            ExitCode::from(code)
        }
    }
}

async fn run(args: Args) -> Result<()> {
    let settings = load_settings();
    if let Some(path) = get_settings_path() {
        if !path.exists() {
            if let Err(e) = save_settings_to(&settings, &path) {
                warn!("Could not write default settings: {}", e);
            }
        }
    }

    let ctx = AppContext::new(settings, args.dir, args.fake);
    std::fs::create_dir_all(&ctx.data_dir)
        .with_context(|| format!("Cannot create data directory {}", ctx.data_dir.display()))?;
    info!("Data directory: {}", ctx.data_dir.display());

    let command = args.command.unwrap_or(Command::Check);

    // Held until run() returns
    let instance = try_acquire_single_instance(&ctx.data_dir);
    if matches!(instance, SingleInstanceResult::AlreadyRunning) && command.writes_downloads() {
        bail!(
            "Another DriverScout instance is using {}",
            ctx.data_dir.display()
        );
    }

    let removed = cleanup_if_owner(&instance, &ctx.data_dir);
    if removed > 0 {
        info!("Removed {} abandoned download(s)", removed);
    }

    match command {
        Command::Unskip => {
            ctx.markers().clear_skip();
            println!("Skipped version cleared");
            Ok(())
        }
        Command::Channel { channel } => {
            let channel = DriverChannel::from(channel);
            let changed = ctx.markers().set_channel(channel)?;
            if changed {
                println!("Now following {} drivers", channel);
            } else {
                println!("Already following {} drivers", channel);
            }
            Ok(())
        }
        online => run_online(&ctx, online).await,
    }
}

/// Commands that need the catalog
async fn run_online(ctx: &AppContext, command: Command) -> Result<()> {
    let fetcher = Arc::new(HttpFetcher::new(
        &ctx.settings.user_agent,
        ctx.request_timeout(),
    )?);
    let mut checker = DriverChecker::connect(
        ctx.probe(),
        fetcher,
        &ctx.data_dir,
        ctx.settings.language_id,
    )
    .await
    .context("Could not identify the installed GPU")?;

    match command {
        Command::Check => {
            let report = checker.check().await?;
            print_report(&report);
            notify_update(ctx, &report);
        }
        Command::Watch => {
            let installer = installer_core_dir().and_then(|dir| {
                InstallerWatcher::new(&dir, INSTALLER_SETTLE)
                    .map_err(|e| warn!("Not watching for driver installations: {}", e))
                    .ok()
            });
            let mut last_notified: Option<String> = None;
            checker
                .watch(ctx.check_interval(), installer, |report| {
                    print_report(report);
                    if last_notified.as_deref() != Some(report.online.version.as_str()) {
                        notify_update(ctx, report);
                        if report.decision.notify {
                            last_notified = Some(report.online.version.clone());
                        }
                    }
                })
                .await;
        }
        Command::Download => {
            let report = checker.check().await?;
            print_report(&report);
            match report.install_plan() {
                InstallPlan::Ready(path) => {
                    println!("Installer already downloaded: {}", path.display());
                }
                InstallPlan::Download => {
                    download(ctx, checker.download_job(&report))?;
                }
                InstallPlan::Skipped => print_skipped(&report),
                InstallPlan::UpToDate => println!("Nothing to download"),
            }
        }
        Command::Install => {
            let report = checker.check().await?;
            print_report(&report);
            let path = match report.install_plan() {
                InstallPlan::Ready(path) => path,
                InstallPlan::Download => download(ctx, checker.download_job(&report))?,
                InstallPlan::Skipped => {
                    print_skipped(&report);
                    return Ok(());
                }
                InstallPlan::UpToDate => {
                    println!("Nothing to install");
                    return Ok(());
                }
            };
            launch_installer(&path)?;
            println!("Installer started");
        }
        Command::Skip => {
            let report = checker.check().await?;
            match report.decision.state {
                UpdateState::UpdateAvailable => {
                    checker.skip(&report)?;
                    println!("Version {} will be skipped", report.online.version);
                }
                UpdateState::UpdateSkipped => {
                    println!("Version {} is already skipped", report.online.version);
                }
                UpdateState::UpToDate => println!("No update to skip"),
            }
        }
        Command::Unskip | Command::Channel { .. } => {}
    }
    Ok(())
}

fn print_skipped(report: &CheckReport) {
    println!(
        "Version {} is skipped, run `driverscout unskip` to download it",
        report.online.version
    );
}

fn notify_update(ctx: &AppContext, report: &CheckReport) {
    if report.decision.notify && ctx.settings.notifications_enabled {
        show_update_available(&report.online.version);
    }
}

/// Run one download to completion, printing progress
fn download(ctx: &AppContext, job: DownloadJob) -> Result<PathBuf> {
    let version = job.version.clone();
    let mut manager = DownloadManager::new(ctx.download_client()?);
    manager.start(job)?;

    let status = manager.wait(|event| {
        if let DownloadEvent::Progress(percent) = event {
            print!("\rDownloading {}: {:>3}%", version, percent);
            let _ = std::io::stdout().flush();
        }
    });
    println!();

    match status {
        DownloadStatus::Completed(path) => {
            println!("Saved to {}", path.display());
            Ok(path)
        }
        DownloadStatus::Failed(reason) => {
            if ctx.settings.notifications_enabled {
                show_download_failed(&version, &reason);
            }
            Err(anyhow!("Download of driver {} failed: {}", version, reason))
        }
        other => Err(anyhow!("Download ended in state {:?}", other)),
    }
}

fn print_report(report: &CheckReport) {
    println!("GPU:             {}", report.local.gpu_name);
    println!("Installed:       {}", report.local.version);
    println!("Latest {:<9} {}", format!("{}:", report.channel), report.online.version);
    if report.fell_back {
        println!("Studio drivers are not offered for this GPU, using Game Ready drivers");
    }
    println!("Status:          {}", report.decision.state);

    if let Some(path) = &report.installer_ready {
        println!("Installer ready: {}", path.display());
    } else if report.decision.show_download {
        println!("Download:        {}", report.online.download_url);
    }
}
