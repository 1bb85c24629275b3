//! Snippet catalog records
//!
//! The catalog arrives as a JSON array produced by the content service. Field
//! names follow that wire format; Rust names describe what each field means.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use snippets_common::{Error, Result};
use std::fmt;
use tracing::{debug, warn};

const DEFAULT_WEIGHT: f64 = 100.0;
const DEFAULT_RESOLUTIONS: &str = "0-1024;1024-1920;1920-50000";

/// Block-list identity: the campaign name, or the decimal snippet id when the
/// snippet has no campaign
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BlockId(String);

impl BlockId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn from_snippet_id(id: i64) -> Self {
        Self(id.to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for BlockId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for BlockId {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for BlockId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Yes / no / don't-care constraint against a boolean host fact
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TriState {
    Yes,
    No,
    #[default]
    Any,
}

impl TriState {
    /// Unknown facts only satisfy `Any`
    pub fn admits(self, fact: Option<bool>) -> bool {
        match (self, fact) {
            (TriState::Any, _) => true,
            (TriState::Yes, Some(true)) => true,
            (TriState::No, Some(false)) => true,
            _ => false,
        }
    }
}

/// One side of a version range
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(try_from = "RawVersionBound", into = "String")]
pub enum VersionBound {
    #[default]
    Any,
    /// Exactly the current release
    CurrentRelease,
    /// Strictly older than the current release
    OlderThanCurrentRelease,
    /// Literal major version
    Version(u32),
}

impl VersionBound {
    /// Evaluate as a lower bound (literal versions are inclusive)
    ///
    /// Only `CurrentRelease` is meaningful here; `OlderThanCurrentRelease`
    /// on the lower side admits everything. Relative markers also admit
    /// everything while the current release is unknown.
    pub fn admits_lower(self, version: u32, current_release: Option<u32>) -> bool {
        match (self, current_release) {
            (VersionBound::Version(min), _) => version >= min,
            (VersionBound::CurrentRelease, Some(current)) => version == current,
            _ => true,
        }
    }

    /// Evaluate as an upper bound (literal versions are inclusive)
    ///
    /// Only `OlderThanCurrentRelease` is meaningful here; `CurrentRelease`
    /// on the upper side admits everything.
    pub fn admits_upper(self, version: u32, current_release: Option<u32>) -> bool {
        match (self, current_release) {
            (VersionBound::Version(max), _) => version <= max,
            (VersionBound::OlderThanCurrentRelease, Some(current)) => version < current,
            _ => true,
        }
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawVersionBound {
    Number(u32),
    Text(String),
}

impl TryFrom<RawVersionBound> for VersionBound {
    type Error = String;

    fn try_from(raw: RawVersionBound) -> std::result::Result<Self, Self::Error> {
        match raw {
            RawVersionBound::Number(v) => Ok(VersionBound::Version(v)),
            RawVersionBound::Text(text) => match text.trim() {
                "" | "any" => Ok(VersionBound::Any),
                "current_release" => Ok(VersionBound::CurrentRelease),
                "older_than_current_release" => Ok(VersionBound::OlderThanCurrentRelease),
                other => other
                    .parse::<u32>()
                    .map(VersionBound::Version)
                    .map_err(|_| format!("invalid version bound: {:?}", other)),
            },
        }
    }
}

impl From<VersionBound> for String {
    fn from(bound: VersionBound) -> Self {
        match bound {
            VersionBound::Any => "any".to_string(),
            VersionBound::CurrentRelease => "current_release".to_string(),
            VersionBound::OlderThanCurrentRelease => "older_than_current_release".to_string(),
            VersionBound::Version(v) => v.to_string(),
        }
    }
}

/// Screen width band, `min` inclusive and `max` exclusive
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResolutionBand {
    pub min: u32,
    pub max: u32,
}

impl ResolutionBand {
    pub fn contains(&self, width: u32) -> bool {
        self.min <= width && width < self.max
    }
}

/// Set of width bands, wire format `min-max;min-max`
///
/// Segments that do not parse are dropped; a snippet whose bands all fail to
/// parse can never be shown.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub struct ResolutionBands(Vec<ResolutionBand>);

impl ResolutionBands {
    pub fn parse(raw: &str) -> Self {
        let bands = raw
            .split(';')
            .filter(|segment| !segment.trim().is_empty())
            .filter_map(|segment| {
                let parsed = segment.split_once('-').and_then(|(min, max)| {
                    Some(ResolutionBand {
                        min: min.trim().parse().ok()?,
                        max: max.trim().parse().ok()?,
                    })
                });
                if parsed.is_none() {
                    debug!(segment = segment, "Ignoring malformed resolution band");
                }
                parsed
            })
            .collect();
        Self(bands)
    }

    pub fn admits(&self, width: u32) -> bool {
        self.0.iter().any(|band| band.contains(width))
    }

    pub fn bands(&self) -> &[ResolutionBand] {
        &self.0
    }
}

impl Default for ResolutionBands {
    fn default() -> Self {
        Self::parse(DEFAULT_RESOLUTIONS)
    }
}

impl From<String> for ResolutionBands {
    fn from(raw: String) -> Self {
        Self::parse(&raw)
    }
}

impl From<ResolutionBands> for String {
    fn from(bands: ResolutionBands) -> Self {
        bands
            .0
            .iter()
            .map(|b| format!("{}-{}", b.min, b.max))
            .collect::<Vec<_>>()
            .join(";")
    }
}

/// Client-side eligibility constraints
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ClientOptions {
    #[serde(default, rename = "has_fxaccount")]
    pub account_required: TriState,
    #[serde(default, rename = "has_testpilot")]
    pub test_cohort: TriState,
    #[serde(default, rename = "is_default_browser")]
    pub default_browser: TriState,
    #[serde(default)]
    pub version_lower_bound: VersionBound,
    #[serde(default)]
    pub version_upper_bound: VersionBound,
    #[serde(default)]
    pub screen_resolutions: ResolutionBands,
    /// Weeks, inclusive; `-1` on the wire means unbounded
    #[serde(default, rename = "profileage_lower_bound", with = "weeks_bound")]
    pub profile_age_lower: Option<u32>,
    /// Weeks, exclusive; `-1` on the wire means unbounded
    #[serde(default, rename = "profileage_upper_bound", with = "weeks_bound")]
    pub profile_age_upper: Option<u32>,
}

impl ClientOptions {
    pub fn declares_profile_age(&self) -> bool {
        self.profile_age_lower.is_some() || self.profile_age_upper.is_some()
    }
}

mod weeks_bound {
    use super::*;

    pub fn serialize<S: Serializer>(
        value: &Option<u32>,
        serializer: S,
    ) -> std::result::Result<S::Ok, S::Error> {
        match value {
            Some(weeks) => serializer.serialize_i64(i64::from(*weeks)),
            None => serializer.serialize_i64(-1),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> std::result::Result<Option<u32>, D::Error> {
        let raw = Option::<i64>::deserialize(deserializer)?;
        Ok(raw.and_then(|v| u32::try_from(v).ok()))
    }
}

fn empty_as_none<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> std::result::Result<Option<String>, D::Error> {
    let raw = Option::<String>::deserialize(deserializer)?;
    Ok(raw.filter(|s| !s.is_empty()))
}

fn default_weight() -> f64 {
    DEFAULT_WEIGHT
}

/// A candidate promotional message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snippet {
    pub id: i64,
    #[serde(default, deserialize_with = "empty_as_none")]
    pub campaign: Option<String>,
    #[serde(default)]
    pub name: String,
    #[serde(default = "default_weight")]
    pub weight: f64,
    /// Lowercase country codes; empty means unrestricted
    #[serde(default)]
    pub countries: Vec<String>,
    #[serde(default)]
    pub exclude_from_search_engines: Vec<String>,
    #[serde(default)]
    pub client_options: ClientOptions,
    /// Rendered markup, possibly containing script fragments
    #[serde(alias = "code")]
    pub content: String,
}

impl Snippet {
    /// Identity used when this snippet is dismissed
    pub fn block_id(&self) -> BlockId {
        match &self.campaign {
            Some(campaign) => BlockId::new(campaign.clone()),
            None => BlockId::from_snippet_id(self.id),
        }
    }
}

/// Parse a catalog JSON array
///
/// Records that fail to parse are skipped with a warning so one bad entry
/// cannot suppress the rest. A payload that is not an array is an error.
pub fn parse_catalog(json: &str) -> Result<Vec<Snippet>> {
    let raw: serde_json::Value = serde_json::from_str(json)?;
    let entries = raw
        .as_array()
        .ok_or_else(|| Error::InvalidInput("snippet catalog must be a JSON array".to_string()))?;

    let mut snippets = Vec::with_capacity(entries.len());
    for (position, entry) in entries.iter().enumerate() {
        match Snippet::deserialize(entry) {
            Ok(mut snippet) => {
                for country in snippet.countries.iter_mut() {
                    *country = country.to_lowercase();
                }
                snippets.push(snippet);
            }
            Err(e) => {
                warn!(position = position, error = %e, "Skipping invalid catalog record");
            }
        }
    }

    debug!(count = snippets.len(), "Catalog parsed");
    Ok(snippets)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_block_id_prefers_campaign() {
        let mut snippet: Snippet =
            serde_json::from_value(json!({"id": 7, "campaign": "spring-sale", "content": ""}))
                .unwrap();
        assert_eq!(snippet.block_id(), BlockId::new("spring-sale"));

        snippet.campaign = None;
        assert_eq!(snippet.block_id(), BlockId::new("7"));
    }

    #[test]
    fn test_empty_campaign_is_none() {
        let snippet: Snippet =
            serde_json::from_value(json!({"id": 3, "campaign": "", "content": ""})).unwrap();
        assert_eq!(snippet.campaign, None);
        assert_eq!(snippet.block_id().as_str(), "3");
    }

    #[test]
    fn test_defaults_for_sparse_record() {
        let snippet: Snippet = serde_json::from_value(json!({"id": 1, "code": "<p>hi</p>"})).unwrap();
        assert_eq!(snippet.weight, 100.0);
        assert_eq!(snippet.content, "<p>hi</p>");
        assert_eq!(snippet.client_options.account_required, TriState::Any);
        assert_eq!(snippet.client_options.version_lower_bound, VersionBound::Any);
        assert_eq!(snippet.client_options.screen_resolutions.bands().len(), 3);
        assert!(!snippet.client_options.declares_profile_age());
    }

    #[test]
    fn test_tri_state_admits() {
        assert!(TriState::Any.admits(None));
        assert!(TriState::Any.admits(Some(true)));
        assert!(TriState::Yes.admits(Some(true)));
        assert!(!TriState::Yes.admits(Some(false)));
        assert!(!TriState::Yes.admits(None));
        assert!(TriState::No.admits(Some(false)));
        assert!(!TriState::No.admits(None));
    }

    #[test]
    fn test_version_bound_wire_forms() {
        let options: ClientOptions = serde_json::from_value(json!({
            "version_lower_bound": "current_release",
            "version_upper_bound": 70,
        }))
        .unwrap();
        assert_eq!(options.version_lower_bound, VersionBound::CurrentRelease);
        assert_eq!(options.version_upper_bound, VersionBound::Version(70));

        let options: ClientOptions = serde_json::from_value(json!({
            "version_lower_bound": "60",
            "version_upper_bound": "older_than_current_release",
        }))
        .unwrap();
        assert_eq!(options.version_lower_bound, VersionBound::Version(60));
        assert_eq!(options.version_upper_bound, VersionBound::OlderThanCurrentRelease);
    }

    #[test]
    fn test_version_bound_rejects_garbage() {
        let result: std::result::Result<ClientOptions, _> =
            serde_json::from_value(json!({"version_lower_bound": "soon"}));
        assert!(result.is_err());
    }

    #[test]
    fn test_version_bound_evaluation() {
        let current = Some(68);
        assert!(VersionBound::Version(60).admits_lower(60, current));
        assert!(!VersionBound::Version(60).admits_lower(59, current));
        assert!(VersionBound::Version(60).admits_upper(60, current));
        assert!(!VersionBound::Version(60).admits_upper(61, current));
        assert!(VersionBound::CurrentRelease.admits_lower(68, current));
        assert!(!VersionBound::CurrentRelease.admits_lower(67, current));
        assert!(VersionBound::OlderThanCurrentRelease.admits_upper(67, current));
        assert!(!VersionBound::OlderThanCurrentRelease.admits_upper(68, current));
    }

    #[test]
    fn test_relative_markers_only_bind_on_their_own_side() {
        let current = Some(68);
        assert!(VersionBound::OlderThanCurrentRelease.admits_lower(90, current));
        assert!(VersionBound::CurrentRelease.admits_upper(40, current));
    }

    #[test]
    fn test_relative_markers_admit_without_current_release() {
        assert!(VersionBound::CurrentRelease.admits_lower(68, None));
        assert!(VersionBound::OlderThanCurrentRelease.admits_upper(68, None));
        assert!(!VersionBound::Version(70).admits_lower(68, None));
    }

    #[test]
    fn test_resolution_bands() {
        let bands = ResolutionBands::parse("0-1024;1024-1920");
        assert!(bands.admits(0));
        assert!(bands.admits(1023));
        assert!(bands.admits(1024));
        assert!(!bands.admits(1920), "upper edge is exclusive");
    }

    #[test]
    fn test_resolution_bands_skip_malformed_segments() {
        let bands = ResolutionBands::parse("abc;800-1200;-;5");
        assert_eq!(bands.bands(), &[ResolutionBand { min: 800, max: 1200 }]);

        let none = ResolutionBands::parse("wide");
        assert!(!none.admits(1000));
    }

    #[test]
    fn test_profile_age_sentinel() {
        let options: ClientOptions = serde_json::from_value(json!({
            "profileage_lower_bound": 2,
            "profileage_upper_bound": -1,
        }))
        .unwrap();
        assert_eq!(options.profile_age_lower, Some(2));
        assert_eq!(options.profile_age_upper, None);
        assert!(options.declares_profile_age());

        let wire = serde_json::to_value(&options).unwrap();
        assert_eq!(wire["profileage_upper_bound"], json!(-1));
    }

    #[test]
    fn test_parse_catalog_skips_bad_records() {
        let catalog = json!([
            {"id": 1, "content": "a", "countries": ["FR", "de"]},
            {"id": "not-a-number", "content": "b"},
            {"id": 3, "content": "c"},
        ])
        .to_string();

        let snippets = parse_catalog(&catalog).unwrap();
        assert_eq!(snippets.len(), 2);
        assert_eq!(snippets[0].countries, vec!["fr", "de"]);
        assert_eq!(snippets[1].id, 3);
    }

    #[test]
    fn test_parse_catalog_requires_array() {
        assert!(parse_catalog(r#"{"id": 1}"#).is_err());
        assert!(parse_catalog("not json").is_err());
    }
}
