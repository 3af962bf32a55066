//! Driver Update Flow Tests
//!
//! End-to-end checks of the update flow against in-memory NVIDIA pages and a
//! loopback HTTP server. No real GPU or internet connection is needed.
//! Run with: cargo test --test driver_flow

use async_trait::async_trait;
use driverscout::driver::catalog::process_driver_url;
use driverscout::driver::{
    DownloadJob, DownloadManager, DownloadStatus, DriverChannel, DriverChecker, DriverError,
    DriverResult, FakeProbe, GpuIdentity, PageFetcher, UpdateState,
};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

const PRODUCTS_URL: &str = "https://www.nvidia.com/Download/API/lookupValueSearch.aspx?TypeID=3";

const PRODUCTS: &str = r#"<?xml version="1.0" encoding="utf-8"?>
<LookupValueSearch><LookupValues>
<LookupValue ParentID="120" RequiresProduct="False"><Name>GeForce RTX 3080</Name><Value>929</Value></LookupValue>
<LookupValue ParentID="120" RequiresProduct="False"><Name>GeForce RTX 3070</Name><Value>933</Value></LookupValue>
</LookupValues></LookupValueSearch>"#;

const GAME_READY_PAGE: &str = "https://www.nvidia.com/download/driverResults.aspx/205320/en-us";
const STUDIO_PAGE: &str = "https://www.nvidia.com/download/driverResults.aspx/205350/en-us";

/// RTX 3080 on Windows 10 (build 19045), English, DCH
const IDENTITY: GpuIdentity = GpuIdentity {
    psid: 120,
    pfid: 929,
    osid: 57,
    lid: 1,
    dtcid: 1,
};

struct FakeNvidia {
    pages: Mutex<HashMap<String, String>>,
    requests: Mutex<Vec<String>>,
}

impl FakeNvidia {
    /// Catalog with a Game Ready release only
    fn new(online: &str) -> Self {
        let site = Self {
            pages: Mutex::new(HashMap::new()),
            requests: Mutex::new(Vec::new()),
        };
        site.serve(PRODUCTS_URL, PRODUCTS);
        site.serve(
            &process_driver_url(&IDENTITY, DriverChannel::Standard),
            GAME_READY_PAGE,
        );
        site.serve(
            &process_driver_url(&IDENTITY, DriverChannel::Studio),
            "No certified downloads were found for this configuration.",
        );
        site.serve(GAME_READY_PAGE, &driver_page(online, "dch-whql"));
        site
    }

    fn serve(&self, url: &str, body: &str) {
        self.pages
            .lock()
            .unwrap()
            .insert(url.to_string(), body.to_string());
    }

    fn requests(&self) -> Vec<String> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl PageFetcher for FakeNvidia {
    async fn fetch(&self, url: &str) -> DriverResult<String> {
        self.requests.lock().unwrap().push(url.to_string());
        self.pages
            .lock()
            .unwrap()
            .get(url)
            .cloned()
            .ok_or_else(|| DriverError::HttpStatus {
                status: 404,
                url: url.to_string(),
            })
    }
}

fn driver_page(version: &str, flavour: &str) -> String {
    format!(
        r#"<html><td id="tdVersion">{v}&nbsp;WHQL</td>
<a id="lnkDwnldBtn" href="/content/DriverDownloads/confirmation.php?url=/Windows/{v}/{v}-desktop-win10-win11-64bit-international-{f}.exe&lang=us">Download</a></html>"#,
        v = version,
        f = flavour
    )
}

async fn connect(dir: &std::path::Path, local: &str, site: Arc<FakeNvidia>) -> DriverChecker {
    let probe = FakeProbe::new("NVIDIA GeForce RTX 3080", local);
    DriverChecker::connect(Box::new(probe), site, dir, 1)
        .await
        .unwrap()
}

/// Tests for a full check against the fake catalog
mod check_tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_connect_resolves_identity() {
        let dir = TempDir::new().unwrap();
        let site = Arc::new(FakeNvidia::new("536.23"));

        let checker = connect(dir.path(), "535.98", site.clone()).await;

        assert_eq!(*checker.identity(), IDENTITY);
        assert_eq!(site.requests(), vec![PRODUCTS_URL.to_string()]);
    }

    #[tokio::test]
    async fn test_older_local_driver_gets_update() {
        let dir = TempDir::new().unwrap();
        let site = Arc::new(FakeNvidia::new("536.23"));
        let checker = connect(dir.path(), "535.98", site).await;

        let report = checker.check().await.unwrap();

        assert_eq!(report.decision.state, UpdateState::UpdateAvailable);
        assert!(report.decision.show_download);
        assert!(report.decision.skip_control.visible);
        assert!(report.decision.skip_control.enabled);
        assert_eq!(report.channel, DriverChannel::Standard);
        assert!(!report.fell_back);
        assert_eq!(
            report.online.download_url,
            "https://us.download.nvidia.com/Windows/536.23/536.23-desktop-win10-win11-64bit-international-dch-whql.exe"
        );
    }

    #[tokio::test]
    async fn test_same_version_is_up_to_date() {
        let dir = TempDir::new().unwrap();
        let site = Arc::new(FakeNvidia::new("536.23"));
        let checker = connect(dir.path(), "536.23", site).await;

        let report = checker.check().await.unwrap();

        assert_eq!(report.decision.state, UpdateState::UpToDate);
        assert!(!report.decision.show_download);
        assert!(!report.decision.skip_control.visible);
        assert!(!report.decision.notify);
    }

    #[tokio::test]
    async fn test_skipped_version_stays_quiet() {
        let dir = TempDir::new().unwrap();
        let site = Arc::new(FakeNvidia::new("536.23"));
        let checker = connect(dir.path(), "535.98", site).await;
        checker.markers().skip_version("536.23").unwrap();

        let report = checker.check().await.unwrap();

        assert_eq!(report.decision.state, UpdateState::UpdateSkipped);
        assert!(!report.decision.show_download);
        assert!(report.decision.skip_control.visible);
        assert!(!report.decision.skip_control.enabled);
        assert!(!report.decision.notify);
    }

    #[tokio::test]
    async fn test_newer_release_replaces_skip() {
        let dir = TempDir::new().unwrap();
        let site = Arc::new(FakeNvidia::new("537.10"));
        let checker = connect(dir.path(), "535.98", site).await;
        checker.markers().skip_version("536.23").unwrap();

        let report = checker.check().await.unwrap();

        assert_eq!(report.decision.state, UpdateState::UpdateAvailable);
        assert!(report.decision.skip_control.enabled);
        assert!(!dir.path().join("skip.flag").exists());
    }

    #[tokio::test]
    async fn test_studio_request_falls_back_to_game_ready() {
        let dir = TempDir::new().unwrap();
        let site = Arc::new(FakeNvidia::new("536.23"));
        let checker = connect(dir.path(), "535.98", site.clone()).await;
        checker.markers().set_channel(DriverChannel::Studio).unwrap();

        let report = checker.check().await.unwrap();

        assert!(report.fell_back);
        assert_eq!(report.channel, DriverChannel::Standard);
        assert_eq!(report.page_url, GAME_READY_PAGE);
        assert!(!dir.path().join("studio.flag").exists());

        let requests = site.requests();
        assert!(requests.contains(&process_driver_url(&IDENTITY, DriverChannel::Studio)));
        assert!(requests.contains(&process_driver_url(&IDENTITY, DriverChannel::Standard)));
    }

    #[tokio::test]
    async fn test_studio_channel_when_offered() {
        let dir = TempDir::new().unwrap();
        let site = Arc::new(FakeNvidia::new("536.23"));
        site.serve(
            &process_driver_url(&IDENTITY, DriverChannel::Studio),
            "//www.nvidia.com/download/driverResults.aspx/205350/en-us",
        );
        site.serve(STUDIO_PAGE, &driver_page("536.40", "dch-whql-studio"));

        let checker = connect(dir.path(), "535.98", site).await;
        checker.markers().set_channel(DriverChannel::Studio).unwrap();

        let report = checker.check().await.unwrap();

        assert!(!report.fell_back);
        assert_eq!(report.channel, DriverChannel::Studio);
        assert_eq!(report.online.version, "536.40");
        assert!(dir.path().join("studio.flag").exists());
    }

    #[tokio::test]
    async fn test_unparsable_page_is_parse_failure() {
        let dir = TempDir::new().unwrap();
        let site = Arc::new(FakeNvidia::new("536.23"));
        site.serve(GAME_READY_PAGE, "<html>Site maintenance</html>");
        let checker = connect(dir.path(), "535.98", site).await;

        let result = checker.check().await;

        assert!(matches!(
            result,
            Err(DriverError::ParseFailure { url, .. }) if url == GAME_READY_PAGE
        ));
    }

    #[tokio::test]
    async fn test_unknown_gpu_is_reported() {
        let dir = TempDir::new().unwrap();
        let site = Arc::new(FakeNvidia::new("536.23"));
        let probe = FakeProbe::new("NVIDIA GeForce RTX 9999", "535.98");

        let result = DriverChecker::connect(Box::new(probe), site, dir.path(), 1).await;

        assert!(matches!(result, Err(DriverError::GpuNotInCatalog(name)) if name == "GeForce RTX 9999"));
    }
}

/// Tests for the background download against a loopback server
mod download_tests {
    use super::*;
    use std::io::{Read, Write};
    use driverscout::{AppContext, AppSettings};
    use std::net::TcpListener;
    use std::time::{Duration, Instant};
    use tempfile::TempDir;

    /// Serve one HTTP response on 127.0.0.1 and return its base URL
    fn serve_once(status_line: &'static str, body: Vec<u8>) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();

        std::thread::spawn(move || {
            let (mut stream, _) = listener.accept().unwrap();
            let mut request = Vec::new();
            let mut buf = [0u8; 1024];
            while !request.windows(4).any(|w| w == b"\r\n\r\n") {
                let n = stream.read(&mut buf).unwrap();
                if n == 0 {
                    break;
                }
                request.extend_from_slice(&buf[..n]);
            }

            let header = format!(
                "{}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
                status_line,
                body.len()
            );
            stream.write_all(header.as_bytes()).unwrap();
            stream.write_all(&body).unwrap();
        });

        format!("http://{}", addr)
    }

    /// Send headers and part of the body, then go silent while keeping the
    /// connection open
    fn serve_stalled(declared: usize, sent: usize, hold: Duration) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();

        std::thread::spawn(move || {
            let (mut stream, _) = listener.accept().unwrap();
            let mut buf = [0u8; 1024];
            let _ = stream.read(&mut buf);

            let header = format!(
                "HTTP/1.1 200 OK\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
                declared
            );
            stream.write_all(header.as_bytes()).unwrap();
            stream.write_all(&vec![b'x'; sent]).unwrap();
            stream.flush().unwrap();
            std::thread::sleep(hold);
        });

        format!("http://{}", addr)
    }

    fn client() -> reqwest::Client {
        reqwest::Client::builder().no_proxy().build().unwrap()
    }

    #[test]
    fn test_download_completes_without_partial_file() {
        let dir = TempDir::new().unwrap();
        let body: Vec<u8> = (0..64 * 1024).map(|i| (i % 251) as u8).collect();
        let base = serve_once("HTTP/1.1 200 OK", body.clone());
        let job = DownloadJob::new(&format!("{}/driver.exe", base), "536.23", dir.path());
        std::fs::write(&job.partial_path, b"left over from a crash").unwrap();

        let mut manager = DownloadManager::new(client());
        manager.start(job.clone()).unwrap();

        let mut progress = Vec::new();
        let status = manager.wait(|event| {
            if let driverscout::driver::DownloadEvent::Progress(p) = event {
                progress.push(*p);
            }
        });

        assert_eq!(status, DownloadStatus::Completed(job.final_path.clone()));
        assert_eq!(std::fs::read(&job.final_path).unwrap(), body);
        assert!(!job.partial_path.exists());
        assert_eq!(progress.first(), Some(&0));
        assert_eq!(progress.last(), Some(&100));
        assert!(progress.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn test_http_error_leaves_nothing_behind() {
        let dir = TempDir::new().unwrap();
        let base = serve_once("HTTP/1.1 404 Not Found", b"not here".to_vec());
        let job = DownloadJob::new(&format!("{}/driver.exe", base), "536.23", dir.path());

        let mut manager = DownloadManager::new(client());
        manager.start(job.clone()).unwrap();
        let status = manager.wait(|_| {});

        assert!(matches!(status, DownloadStatus::Failed(reason) if reason.contains("404")));
        assert!(!job.partial_path.exists());
        assert!(!job.final_path.exists());
        assert!(!manager.is_active());
    }

    #[test]
    fn test_poll_reaches_terminal_state() {
        let dir = TempDir::new().unwrap();
        let base = serve_once("HTTP/1.1 200 OK", b"MZ installer".to_vec());
        let job = DownloadJob::new(&format!("{}/driver.exe", base), "536.23", dir.path());

        let mut manager = DownloadManager::new(client());
        manager.start(job.clone()).unwrap();

        while !manager.status().is_finished() {
            manager.poll();
            std::thread::sleep(std::time::Duration::from_millis(10));
        }

        assert_eq!(*manager.status(), DownloadStatus::Completed(job.final_path.clone()));
        assert!(!manager.is_active());
    }

    #[test]
    fn test_stalled_transfer_times_out() {
        let dir = TempDir::new().unwrap();
        let mut settings = AppSettings::default();
        settings.request_timeout_secs = 1;
        let ctx = AppContext::new(settings, Some(dir.path().to_path_buf()), true);

        let base = serve_stalled(1000, 10, Duration::from_secs(15));
        let job = DownloadJob::new(&format!("{}/driver.exe", base), "536.23", dir.path());

        let client = ctx.download_client_builder().no_proxy().build().unwrap();
        let mut manager = DownloadManager::new(client);
        let started = Instant::now();
        manager.start(job.clone()).unwrap();
        let status = manager.wait(|_| {});

        assert!(matches!(status, DownloadStatus::Failed(_)));
        assert!(started.elapsed() < Duration::from_secs(10));
        assert!(!job.partial_path.exists());
        assert!(!job.final_path.exists());
    }
}
