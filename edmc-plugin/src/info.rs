use crate::Error;
use once_cell::sync::Lazy;
use regex::Regex;
use semver::{BuildMetadata, Version};

/// Version reported for plugins that do not declare one
pub const UNKNOWN_VERSION: &str = "0.0.0+UNKNOWN";

/// [`UNKNOWN_VERSION`] as a [`Version`]
pub fn unknown_version() -> Version {
    let mut version = Version::new(0, 0, 0);
    version.build = BuildMetadata::new("UNKNOWN").unwrap_or(BuildMetadata::EMPTY);
    version
}

static LOOSE_VERSION: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^v?(\d+)(?:\.(\d+)(?:\.(\d+))?)?").expect("static regex"));

static INVALID_CHARS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[^a-zA-Z0-9+.\-]").expect("static regex"));

/// Coerce a loosely formed version string into a strict semantic version.
///
/// Missing minor/patch components default to zero and leading zeros are
/// dropped. Whatever follows the numeric part becomes pre-release and/or
/// build metadata: `"1.2"` is `1.2.0`, `"1.2.3.4"` is `1.2.3+4` and
/// `"0.1.2a3"` is `0.1.2-a3`.
pub fn coerce_version(raw: &str) -> Result<Version, Error> {
    let raw = raw.trim();
    let caps = LOOSE_VERSION
        .captures(raw)
        .ok_or_else(|| Error::Version(format!("'{}' does not start with a version number", raw)))?;

    let component = |idx: usize| -> Result<u64, Error> {
        match caps.get(idx) {
            Some(m) => m
                .as_str()
                .parse::<u64>()
                .map_err(|e| Error::Version(format!("'{}': {}", raw, e))),
            None => Ok(0),
        }
    };
    let mut version = format!("{}.{}.{}", component(1)?, component(2)?, component(3)?);

    let consumed = caps.get(0).map(|m| m.end()).unwrap_or(0);
    let rest = INVALID_CHARS.replace_all(&raw[consumed..], "-");
    if !rest.is_empty() {
        let (prerelease, build) = split_remainder(&rest);
        if !prerelease.is_empty() {
            version.push('-');
            version.push_str(prerelease);
        }
        if !build.is_empty() {
            version.push('+');
            version.push_str(&build.replace('+', "."));
        }
    }

    Version::parse(&version).map_err(|e| Error::Version(format!("'{}': {}", raw, e)))
}

fn split_remainder(rest: &str) -> (&str, &str) {
    if let Some(build) = rest.strip_prefix('+').or_else(|| rest.strip_prefix('.')) {
        return ("", build);
    }
    let rest = rest.strip_prefix('-').unwrap_or(rest);
    match rest.split_once('+') {
        Some((prerelease, build)) => (prerelease, build),
        None => (rest, ""),
    }
}

/// Anything a plugin may hand over as its version.
pub trait IntoSemanticVersion {
    fn into_semantic_version(self) -> Result<Version, Error>;
}

impl IntoSemanticVersion for Version {
    fn into_semantic_version(self) -> Result<Version, Error> {
        Ok(self)
    }
}

impl IntoSemanticVersion for &Version {
    fn into_semantic_version(self) -> Result<Version, Error> {
        Ok(self.clone())
    }
}

impl IntoSemanticVersion for &str {
    fn into_semantic_version(self) -> Result<Version, Error> {
        coerce_version(self)
    }
}

impl IntoSemanticVersion for String {
    fn into_semantic_version(self) -> Result<Version, Error> {
        coerce_version(&self)
    }
}

impl IntoSemanticVersion for &String {
    fn into_semantic_version(self) -> Result<Version, Error> {
        coerce_version(self)
    }
}

/// Identity of a loaded plugin, returned by its `load()`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PluginInfo {
    name: String,
    version: Version,
    authors: Option<Vec<String>>,
    comment: Option<String>,
    update_url: Option<String>,
}

impl PluginInfo {
    /// Create plugin info, coercing `version` into a strict semantic version
    pub fn new(name: impl Into<String>, version: impl IntoSemanticVersion) -> Result<Self, Error> {
        Ok(Self {
            name: name.into(),
            version: version.into_semantic_version()?,
            authors: None,
            comment: None,
            update_url: None,
        })
    }

    /// Set the author list
    pub fn with_authors<I, S>(mut self, authors: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.authors = Some(authors.into_iter().map(Into::into).collect());
        self
    }

    /// Set a single author
    pub fn with_author(self, author: impl Into<String>) -> Self {
        self.with_authors([author.into()])
    }

    /// Set the free-form comment
    pub fn with_comment(mut self, comment: impl Into<String>) -> Self {
        self.comment = Some(comment.into());
        self
    }

    /// Set the update URL
    pub fn with_update_url(mut self, url: impl Into<String>) -> Self {
        self.update_url = Some(url.into());
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn version(&self) -> &Version {
        &self.version
    }

    pub fn authors(&self) -> Option<&[String]> {
        self.authors.as_deref()
    }

    pub fn comment(&self) -> Option<&str> {
        self.comment.as_deref()
    }

    pub fn update_url(&self) -> Option<&str> {
        self.update_url.as_deref()
    }
}

impl std::fmt::Display for PluginInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {}", self.name, self.version)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_coerce_pads_missing_components() {
        assert_eq!(coerce_version("1").unwrap(), Version::new(1, 0, 0));
        assert_eq!(coerce_version("0.1").unwrap(), Version::new(0, 1, 0));
        assert_eq!(coerce_version("0.0.1").unwrap(), Version::new(0, 0, 1));
        assert_eq!(coerce_version("v2.01.003").unwrap(), Version::new(2, 1, 3));
    }

    #[test]
    fn test_coerce_remainder() {
        assert_eq!(coerce_version("1.2.3.4").unwrap().to_string(), "1.2.3+4");
        assert_eq!(coerce_version("0.1.2a3").unwrap().to_string(), "0.1.2-a3");
        assert_eq!(coerce_version("1.0-beta+exp.sha").unwrap().to_string(), "1.0.0-beta+exp.sha");
        assert_eq!(coerce_version("5.4.0 final").unwrap().to_string(), "5.4.0-final");
        assert_eq!(coerce_version(UNKNOWN_VERSION).unwrap(), unknown_version());
    }

    #[test]
    fn test_coerce_rejects_garbage() {
        assert!(matches!(coerce_version("banana"), Err(Error::Version(_))));
        assert!(coerce_version("").is_err());
    }

    #[test]
    fn test_info_version_round_trip() {
        let loose = PluginInfo::new("test", "0.0.1").unwrap();
        let strict = PluginInfo::new("test", Version::new(0, 0, 1)).unwrap();
        assert_eq!(loose.version(), strict.version());
        assert_eq!(loose, strict);

        let version = Version::parse("1.2.3-rc.1+build.5").unwrap();
        let info = PluginInfo::new("test", &version).unwrap();
        assert_eq!(info.version(), &version);
    }

    #[test]
    fn test_info_builders() {
        let info = PluginInfo::new("EDSM", "1.2")
            .unwrap()
            .with_author("Jane")
            .with_comment("Sends data to EDSM")
            .with_update_url("https://example.invalid/edsm");

        assert_eq!(info.name(), "EDSM");
        assert_eq!(info.authors(), Some(&["Jane".to_string()][..]));
        assert_eq!(info.comment(), Some("Sends data to EDSM"));
        assert_eq!(info.update_url(), Some("https://example.invalid/edsm"));
        assert_eq!(info.to_string(), "EDSM 1.2.0");
    }
}
