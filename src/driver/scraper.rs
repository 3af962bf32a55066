//! Driver page scraper - fetches NVIDIA's driver-results page and extracts
//! the published version and the installer link
//!
//! The page is plain HTML, not an API. Extraction sits behind
//! `VersionExtractor` so the heuristic can change without touching the
//! decision logic.

use super::{DriverError, DriverResult};
use async_trait::async_trait;
use log::{debug, info};
use regex::Regex;
use std::sync::OnceLock;
use std::time::Duration;

/// Host serving the installer binaries
const DOWNLOAD_HOST: &str = "https://us.download.nvidia.com";

/// First "Windows/NNN.NN" on the page is the published version
const VERSION_PATTERN: &str = r"Windows/(\d{3}\.\d{2})";

/// Installer path, e.g. /Windows/536.23/536.23-desktop-win10-win11-64bit-international-dch-whql.exe
const DOWNLOAD_PATTERN: &str = r"(?:https?://[\w\-.]+)?/Windows/\d{3}\.\d{2}/[\w\-./]*?\.exe";

/// Version and installer link of the newest published driver
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScrapedRelease {
    pub version: String,
    pub download_url: String,
}

/// HTTP GET returning the response body
#[async_trait]
pub trait PageFetcher: Send + Sync {
    async fn fetch(&self, url: &str) -> DriverResult<String>;
}

/// reqwest-backed fetcher shared by the catalog resolver and the scraper
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: reqwest::Client,
}

impl HttpFetcher {
    pub fn new(user_agent: &str, timeout: Duration) -> DriverResult<Self> {
        let client = reqwest::Client::builder()
            .user_agent(user_agent)
            .timeout(timeout)
            .build()
            .map_err(|e| DriverError::Network(format!("Failed to create HTTP client: {}", e)))?;
        Ok(Self { client })
    }
}

#[async_trait]
impl PageFetcher for HttpFetcher {
    async fn fetch(&self, url: &str) -> DriverResult<String> {
        debug!("GET {}", url);
        let response = self.client.get(url).send().await?;

        if !response.status().is_success() {
            return Err(DriverError::HttpStatus {
                status: response.status().as_u16(),
                url: url.to_string(),
            });
        }

        Ok(response.text().await?)
    }
}

/// Pulls version and installer link out of a driver page
pub trait VersionExtractor: Send + Sync {
    fn extract_version(&self, page: &str) -> Option<String>;
    fn extract_download_url(&self, page: &str) -> Option<String>;
}

/// Regex heuristic, first match wins
#[derive(Debug, Clone)]
pub struct RegexExtractor {
    version: Regex,
    download: Regex,
}

impl RegexExtractor {
    /// Custom patterns. The version pattern must have one capture group.
    pub fn with_patterns(version: &str, download: &str) -> Result<Self, regex::Error> {
        Ok(Self {
            version: Regex::new(version)?,
            download: Regex::new(download)?,
        })
    }
}

impl Default for RegexExtractor {
    fn default() -> Self {
        static VERSION: OnceLock<Regex> = OnceLock::new();
        static DOWNLOAD: OnceLock<Regex> = OnceLock::new();
        Self {
            version: VERSION
                .get_or_init(|| Regex::new(VERSION_PATTERN).expect("valid version pattern"))
                .clone(),
            download: DOWNLOAD
                .get_or_init(|| Regex::new(DOWNLOAD_PATTERN).expect("valid download pattern"))
                .clone(),
        }
    }
}

impl VersionExtractor for RegexExtractor {
    fn extract_version(&self, page: &str) -> Option<String> {
        let caps = self.version.captures(page)?;
        Some(caps.get(1)?.as_str().to_string())
    }

    fn extract_download_url(&self, page: &str) -> Option<String> {
        let found = self.download.find(page)?.as_str();
        if found.starts_with("http") {
            Some(found.to_string())
        } else {
            Some(format!("{}{}", DOWNLOAD_HOST, found))
        }
    }
}

/// Fetches a driver page and runs an extractor over it
pub struct PageScraper<'a> {
    fetcher: &'a dyn PageFetcher,
    extractor: &'a dyn VersionExtractor,
}

impl<'a> PageScraper<'a> {
    pub fn new(fetcher: &'a dyn PageFetcher, extractor: &'a dyn VersionExtractor) -> Self {
        Self { fetcher, extractor }
    }

    pub async fn scrape(&self, url: &str) -> DriverResult<ScrapedRelease> {
        info!("Trying to get newest driver version from {}", url);
        let page = self.fetcher.fetch(url).await?;
        let release = parse_release(self.extractor, &page, url)?;
        info!(
            "Got online driver version: {} ({})",
            release.version, release.download_url
        );
        Ok(release)
    }
}

/// Zero matches is a parse failure rather than an empty result
pub fn parse_release(
    extractor: &dyn VersionExtractor,
    page: &str,
    url: &str,
) -> DriverResult<ScrapedRelease> {
    let version = extractor
        .extract_version(page)
        .ok_or_else(|| DriverError::ParseFailure {
            url: url.to_string(),
            what: "driver version",
        })?;

    let download_url = extractor
        .extract_download_url(page)
        .ok_or_else(|| DriverError::ParseFailure {
            url: url.to_string(),
            what: "installer download link",
        })?;

    Ok(ScrapedRelease {
        version,
        download_url,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const DRIVER_PAGE: &str = r#"
        <td class="contentsummaryleft">Version:</td>
        <td id="tdVersion">536.23&nbsp;&nbsp;WHQL</td>
        <a id="lnkDwnldBtn" href="/content/DriverDownloads/confirmation.php?url=/Windows/536.23/536.23-desktop-win10-win11-64bit-international-dch-whql.exe&lang=us&type=GeForce">
        <a href="/Windows/535.98/535.98-desktop-win10-win11-64bit-international-dch-whql.exe">older</a>
    "#;

    #[test]
    fn test_extracts_first_version() {
        let extractor = RegexExtractor::default();
        assert_eq!(extractor.extract_version(DRIVER_PAGE).as_deref(), Some("536.23"));
    }

    #[test]
    fn test_extracts_download_url() {
        let extractor = RegexExtractor::default();
        assert_eq!(
            extractor.extract_download_url(DRIVER_PAGE).as_deref(),
            Some("https://us.download.nvidia.com/Windows/536.23/536.23-desktop-win10-win11-64bit-international-dch-whql.exe")
        );
    }

    #[test]
    fn test_absolute_download_url_kept() {
        let page = r#"href="https://international.download.nvidia.com/Windows/551.86/551.86-notebook-win10-win11-64bit-international-dch-whql.exe""#;
        let extractor = RegexExtractor::default();
        assert_eq!(
            extractor.extract_download_url(page).as_deref(),
            Some("https://international.download.nvidia.com/Windows/551.86/551.86-notebook-win10-win11-64bit-international-dch-whql.exe")
        );
    }

    #[test]
    fn test_no_match_is_parse_failure() {
        let extractor = RegexExtractor::default();
        let result = parse_release(&extractor, "<html>maintenance</html>", "https://example.test/page");
        match result {
            Err(DriverError::ParseFailure { url, what }) => {
                assert_eq!(url, "https://example.test/page");
                assert_eq!(what, "driver version");
            }
            other => panic!("expected parse failure, got {:?}", other),
        }
    }

    #[test]
    fn test_missing_link_is_parse_failure() {
        let extractor = RegexExtractor::default();
        let result = parse_release(&extractor, "Windows/536.23 but no installer", "u");
        assert!(matches!(
            result,
            Err(DriverError::ParseFailure {
                what: "installer download link",
                ..
            })
        ));
    }

    #[test]
    fn test_custom_patterns() {
        let extractor =
            RegexExtractor::with_patterns(r"Version (\d+\.\d+)", r"https://cdn\.test/\S+\.exe").unwrap();
        let page = "Version 551.86 at https://cdn.test/driver.exe";
        let release = parse_release(&extractor, page, "u").unwrap();
        assert_eq!(release.version, "551.86");
        assert_eq!(release.download_url, "https://cdn.test/driver.exe");
    }

    #[test]
    fn test_invalid_custom_pattern() {
        assert!(RegexExtractor::with_patterns("(", "x").is_err());
    }
}
