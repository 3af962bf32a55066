//! Catalog resolver - maps a GPU to NVIDIA's driver-results page
//!
//! NVIDIA's lookup service lists products (TypeID=3) and product series
//! (TypeID=2) as XML. A product entry carries its series id as ParentID:
//!
//! ```text
//! <LookupValue ParentID="120"><Name>GeForce RTX 3080</Name><Value>929</Value></LookupValue>
//! ```
//!
//! processDriver.aspx then answers with the URL of the matching driver page,
//! or with an error text when the combination doesn't exist.

use super::marker::MarkerStore;
use super::scraper::PageFetcher;
use super::types::{DriverChannel, GpuIdentity, LocalDriver};
use super::{DriverError, DriverResult};
use crate::utils::with_retry;
use log::{debug, error, info, warn};
use regex::Regex;
use std::sync::OnceLock;

const LOOKUP_URL: &str = "https://www.nvidia.com/Download/API/lookupValueSearch.aspx";
const PROCESS_DRIVER_URL: &str = "https://www.nvidia.com/Download/processDriver.aspx";

/// Lookup type ids
const TYPE_SERIES: u32 = 2;
const TYPE_PRODUCT: u32 = 3;

/// Catalog OS ids
const OS_WINDOWS_10_64: u32 = 57;
const OS_WINDOWS_11: u32 = 135;

/// First build number of Windows 11
const WINDOWS_11_BUILD: u32 = 22000;

/// One `<LookupValue>` entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LookupEntry {
    pub parent_id: u32,
    pub name: String,
    pub value: u32,
}

/// Driver page selected for a GPU
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedPage {
    pub url: String,
    pub channel: DriverChannel,
    /// Studio was requested but unavailable, Standard was used instead
    pub fell_back: bool,
}

/// Parse lookupValueSearch XML
pub fn parse_lookup(xml: &str) -> Vec<LookupEntry> {
    static ENTRY: OnceLock<Regex> = OnceLock::new();
    let pattern = ENTRY.get_or_init(|| {
        Regex::new(
            r#"<LookupValue\s+ParentID="(\d+)"[^>]*>\s*<Name>([^<]*)</Name>\s*<Value>(\d+)</Value>"#,
        )
        .expect("valid lookup pattern")
    });

    pattern
        .captures_iter(xml)
        .filter_map(|caps| {
            Some(LookupEntry {
                parent_id: caps.get(1)?.as_str().parse().ok()?,
                name: caps.get(2)?.as_str().trim().to_string(),
                value: caps.get(3)?.as_str().parse().ok()?,
            })
        })
        .collect()
}

/// Catalog OS id for a Windows build
pub fn os_id(windows_build: Option<u32>) -> u32 {
    match windows_build {
        Some(build) if build >= WINDOWS_11_BUILD => OS_WINDOWS_11,
        _ => OS_WINDOWS_10_64,
    }
}

/// Build the processDriver request for an identity and channel
pub fn process_driver_url(identity: &GpuIdentity, channel: DriverChannel) -> String {
    format!(
        "{}?psid={}&pfid={}&osid={}&lid={}&dtcid={}&dtid={}",
        PROCESS_DRIVER_URL,
        identity.psid,
        identity.pfid,
        identity.osid,
        identity.lid,
        identity.dtcid,
        channel.dtid()
    )
}

/// Resolves GPU identities and driver pages through a `PageFetcher`
pub struct CatalogResolver<'a> {
    fetcher: &'a dyn PageFetcher,
}

impl<'a> CatalogResolver<'a> {
    pub fn new(fetcher: &'a dyn PageFetcher) -> Self {
        Self { fetcher }
    }

    async fn lookup(&self, type_id: u32) -> DriverResult<Vec<LookupEntry>> {
        let url = format!("{}?TypeID={}", LOOKUP_URL, type_id);
        let fetcher = self.fetcher;
        let url_ref = url.as_str();
        let xml = with_retry(3, move || fetcher.fetch(url_ref)).await?;
        Ok(parse_lookup(&xml))
    }

    /// Find the catalog ids of the local GPU. Done once at startup.
    pub async fn identify(
        &self,
        driver: &LocalDriver,
        windows_build: Option<u32>,
        language_id: u32,
    ) -> DriverResult<GpuIdentity> {
        let name = driver.catalog_name();
        info!("Looking up '{}' in the NVIDIA catalog", name);

        let products = self.lookup(TYPE_PRODUCT).await?;
        if products.is_empty() {
            error!("NVIDIA returned an empty product list");
            return Err(DriverError::Network(
                "Could not get list of GPU models from NVIDIA".to_string(),
            ));
        }

        let candidates: Vec<&LookupEntry> = products
            .iter()
            .filter(|p| p.name.eq_ignore_ascii_case(&name))
            .collect();

        let product = match candidates.as_slice() {
            [] => return Err(DriverError::GpuNotInCatalog(name)),
            [only] => *only,
            several => {
                debug!("{} catalog entries for '{}'", several.len(), name);
                let series = match self.lookup(TYPE_SERIES).await {
                    Ok(series) => series,
                    Err(e) => {
                        warn!("Could not load series list, using first match: {}", e);
                        Vec::new()
                    }
                };
                pick_product(several, &series, driver.is_mobile)
            }
        };

        let identity = GpuIdentity {
            psid: product.parent_id,
            pfid: product.value,
            osid: os_id(windows_build),
            lid: language_id,
            dtcid: u32::from(driver.is_dch),
        };
        info!("Resolved GPU identity: {:?}", identity);
        Ok(identity)
    }

    /// Ask processDriver for the driver page of `identity` on `channel`
    pub async fn resolve(
        &self,
        identity: &GpuIdentity,
        channel: DriverChannel,
    ) -> DriverResult<String> {
        let request = process_driver_url(identity, channel);
        info!("Trying to get GPU update URL ({})", channel);

        let body = self.fetcher.fetch(&request).await?;
        let body = body.trim();

        if body.starts_with("https://") {
            Ok(body.to_string())
        } else if body.starts_with("//") {
            Ok(format!("https:{}", body))
        } else if body.starts_with("http://") {
            Ok(body.replacen("http://", "https://", 1))
        } else if channel == DriverChannel::Studio {
            Err(DriverError::ChannelUnsupported)
        } else {
            error!("Invalid API response from NVIDIA for {}: {}", request, body);
            Err(DriverError::InvalidCatalogResponse { request })
        }
    }

    /// Resolve on the persisted channel, falling back to Standard once when
    /// Studio isn't offered for this GPU. The fallback clears the studio marker.
    pub async fn resolve_with_fallback(
        &self,
        identity: &GpuIdentity,
        markers: &MarkerStore,
    ) -> DriverResult<ResolvedPage> {
        let channel = markers.channel();
        match self.resolve(identity, channel).await {
            Ok(url) => Ok(ResolvedPage {
                url,
                channel,
                fell_back: false,
            }),
            Err(DriverError::ChannelUnsupported) => {
                warn!("Could not get GPU update URL, trying again with non-studio driver");
                if let Err(e) = markers.set_channel(DriverChannel::Standard) {
                    warn!("Failed to clear studio marker: {}", e);
                }
                let url = self.resolve(identity, DriverChannel::Standard).await?;
                Ok(ResolvedPage {
                    url,
                    channel: DriverChannel::Standard,
                    fell_back: true,
                })
            }
            Err(e) => Err(e),
        }
    }
}

/// Choose between products with the same name in different series
/// (desktop vs notebook)
fn pick_product<'e>(
    candidates: &[&'e LookupEntry],
    series: &[LookupEntry],
    is_mobile: bool,
) -> &'e LookupEntry {
    let is_notebook_series = |id: u32| {
        series
            .iter()
            .find(|s| s.value == id)
            .map(|s| s.name.contains("Notebook"))
            .unwrap_or(false)
    };

    candidates
        .iter()
        .copied()
        .find(|c| is_notebook_series(c.parent_id) == is_mobile)
        .unwrap_or(candidates[0])
}
