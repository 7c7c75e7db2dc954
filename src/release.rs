//! Published releases of the client.
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{
    config::ProvisionConfig,
    error::{ProvisionError, ProvisionErrorKind, ResultExt},
    fetch::Fetcher,
    version::Version,
};

/// A downloadable file attached to a release.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Asset {
    /// File name.
    pub name: String,
    /// Direct download URL.
    pub browser_download_url: String,
}

/// A published upstream release as listed by the feed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Release {
    /// Tag such as `v1.8.1911`.
    pub tag_name: String,
    /// Whether the release is marked as a prerelease.
    #[serde(default)]
    pub prerelease: bool,
    /// Publish time. Drafts have none.
    pub published_at: Option<DateTime<Utc>>,
    /// Attached files.
    #[serde(default)]
    pub assets: Vec<Asset>,
}

impl Release {
    /// Returns the version named by the tag.
    pub fn version(&self) -> Result<Version, ProvisionError> {
        Version::parse_tag(&self.tag_name)
            .or_provision_with(ProvisionErrorKind::InvalidReleaseTag, || {
                format!("release {:?}", self.tag_name)
            })
    }

    /// Returns the first asset whose name ends with `suffix`, ignoring case.
    pub fn find_asset(&self, suffix: &str) -> Option<&Asset> {
        let suffix = suffix.to_ascii_lowercase();

        self.assets
            .iter()
            .find(|asset| asset.name.to_ascii_lowercase().ends_with(&suffix))
    }

    /// Like [`Self::find_asset`] but missing assets are an error.
    pub fn require_asset(&self, suffix: &str) -> Result<&Asset, ProvisionError> {
        self.find_asset(suffix).ok_or_else(|| {
            tracing::error!(tag = %self.tag_name, suffix, "release has no matching asset");

            ProvisionError::new(ProvisionErrorKind::MissingAsset)
                .with_context(format!("release {:?} asset *{suffix}", self.tag_name))
        })
    }
}

/// The newest stable release together with its parsed version.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LatestRelease {
    /// The release.
    pub release: Release,
    /// Version derived from the tag.
    pub version: Version,
}

/// Parses the feed's JSON array of releases.
pub fn parse_releases(body: &str) -> Result<Vec<Release>, ProvisionError> {
    serde_json::from_str(body)
        .or_provision(ProvisionErrorKind::FeedUnavailable, "malformed release list")
}

/// Returns the non-prerelease with the latest publish time.
///
/// When publish times are equal, the earlier entry in `releases` wins.
/// Releases without a publish time are never selected.
pub fn select_latest_stable(releases: &[Release]) -> Option<&Release> {
    releases
        .iter()
        .filter(|release| !release.prerelease)
        .filter(|release| release.published_at.is_some())
        .fold(None, |best: Option<&Release>, release| match best {
            Some(best) if best.published_at >= release.published_at => Some(best),
            _ => Some(release),
        })
}

/// Queries the feed and returns the newest stable release.
pub fn resolve_latest(
    fetcher: &dyn Fetcher,
    config: &ProvisionConfig,
) -> Result<LatestRelease, ProvisionError> {
    let span = tracing::info_span!("release resolver");
    let _guard = span.enter();

    let url = config.feed_page_url();
    tracing::info!(%url, "querying release feed");

    let body = fetcher.fetch_text(&url).map_err(|error| {
        tracing::error!(%error, "release feed unreachable");
        ProvisionError::new(ProvisionErrorKind::FeedUnavailable)
            .with_context(&url)
            .with_source(error)
    })?;

    let releases = parse_releases(&body)?;
    tracing::debug!(count = releases.len(), "fetched releases");

    let release = select_latest_stable(&releases).ok_or_else(|| {
        tracing::error!(count = releases.len(), "feed has no stable release");
        ProvisionError::new(ProvisionErrorKind::NoStableRelease)
    })?;

    let version = release.version()?;
    tracing::info!(tag = %release.tag_name, %version, "latest stable release");

    Ok(LatestRelease {
        release: release.clone(),
        version,
    })
}
