use std::fmt;

/// Version as reported by a package manager. Homebrew revisions (`1.2.3_1`)
/// and cask build suffixes (`126.0,abc`) are ignored when classifying.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Version {
    pub original: String,
    pub parsed: VersionType,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VersionType {
    Semantic(semver::Version),
    Numeric(Vec<u64>),
    Unknown,
}

impl Version {
    pub fn parse(version: &str) -> Self {
        let core = version
            .split([',', '_'])
            .next()
            .unwrap_or(version)
            .trim()
            .trim_start_matches('v');

        let parsed = if let Ok(v) = semver::Version::parse(core) {
            VersionType::Semantic(v)
        } else if let Some(numeric) = Self::parse_numeric(core) {
            VersionType::Numeric(numeric)
        } else {
            VersionType::Unknown
        };

        Version {
            original: version.to_string(),
            parsed,
        }
    }

    fn parse_numeric(version: &str) -> Option<Vec<u64>> {
        let numbers: Option<Vec<u64>> = version.split('.').map(|p| p.parse().ok()).collect();
        numbers.filter(|n| !n.is_empty())
    }

    /// `[major, minor, patch]`, padded with zeros.
    fn components(&self) -> Option<[u64; 3]> {
        match &self.parsed {
            VersionType::Semantic(v) => Some([v.major, v.minor, v.patch]),
            VersionType::Numeric(parts) => {
                let at = |i: usize| parts.get(i).copied().unwrap_or(0);
                Some([at(0), at(1), at(2)])
            }
            VersionType::Unknown => None,
        }
    }

    pub fn is_prerelease(&self) -> bool {
        match &self.parsed {
            VersionType::Semantic(v) => !v.pre.is_empty(),
            _ => {
                let lower = self.original.to_lowercase();
                ["alpha", "beta", "rc", "preview", "canary", "nightly"]
                    .iter()
                    .any(|marker| lower.contains(marker))
            }
        }
    }
}

/// How large an available update is relative to the installed version.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateKind {
    Major,
    Minor,
    Patch,
    PreRelease,
    Unknown,
}

impl UpdateKind {
    pub fn classify(current: &str, available: &str) -> Self {
        let current = Version::parse(current);
        let available = Version::parse(available);

        if available.is_prerelease() {
            return UpdateKind::PreRelease;
        }

        match (current.components(), available.components()) {
            (Some(c), Some(a)) if a[0] != c[0] => UpdateKind::Major,
            (Some(c), Some(a)) if a[1] != c[1] => UpdateKind::Minor,
            (Some(c), Some(a)) if a[2] != c[2] => UpdateKind::Patch,
            _ => UpdateKind::Unknown,
        }
    }
}

impl fmt::Display for UpdateKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            UpdateKind::Major => "major",
            UpdateKind::Minor => "minor",
            UpdateKind::Patch => "patch",
            UpdateKind::PreRelease => "pre-release",
            UpdateKind::Unknown => "other",
        };
        f.write_str(label)
    }
}
