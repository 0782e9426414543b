use log::warn;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use snafu::{OptionExt, ResultExt, Snafu};
use std::cmp::Ordering;
use std::fmt::{Display, Formatter};
use std::num::ParseIntError;
use std::str::FromStr;

/// A Kubernetes server version such as `v1.24.3`. Pre-release and build suffixes
/// (`v1.24.3-eks-1234`, `v1.24.3+k3s1`) are dropped when parsing and do not take part in
/// comparisons.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash, Default)]
pub struct KubeVersion {
    major: u32,
    minor: u32,
    patch: u32,
}

#[derive(Debug, Snafu)]
pub enum VersionError {
    #[snafu(display("Unable to find the {} version number when parsing '{}'", what, version))]
    Missing { what: String, version: String },

    #[snafu(display(
        "Unable to parse the {} version number of '{}': {}",
        what,
        version,
        source
    ))]
    Number {
        what: String,
        version: String,
        source: ParseIntError,
    },

    #[snafu(display(
        "minimum supported Kubernetes version is {}, but the server version is {}",
        minimum,
        server
    ))]
    BelowMinimum {
        minimum: KubeVersion,
        server: KubeVersion,
    },
}

impl KubeVersion {
    pub const fn new(major: u32, minor: u32, patch: u32) -> Self {
        Self {
            major,
            minor,
            patch,
        }
    }

    pub fn major(&self) -> u32 {
        self.major
    }

    pub fn minor(&self) -> u32 {
        self.minor
    }

    pub fn patch(&self) -> u32 {
        self.patch
    }

    /// The version with a `v` prefix, e.g. `v1.24.3`. This is the form used in conformance image
    /// tags.
    pub fn with_v(&self) -> String {
        format!("v{}", self)
    }

    pub fn parse<S: AsRef<str>>(s: S) -> Result<Self, VersionError> {
        let original = s.as_ref().trim();
        let no_v = original.strip_prefix('v').unwrap_or(original);
        // Anything after the first '-' or '+' is a pre-release or build tag.
        let core = no_v
            .split(|c: char| c == '-' || c == '+')
            .next()
            .unwrap_or_default();
        let mut iter = core.split('.');
        let mut next = |what: &str| -> Result<Option<u32>, VersionError> {
            match iter.next() {
                None => Ok(None),
                Some(n) => n.parse::<u32>().map(Some).context(NumberSnafu {
                    what,
                    version: original,
                }),
            }
        };
        let major = next("major")?.context(MissingSnafu {
            what: "major",
            version: original,
        })?;
        let minor = next("minor")?.context(MissingSnafu {
            what: "minor",
            version: original,
        })?;
        let patch = next("patch")?.unwrap_or_default();
        Ok(Self::new(major, minor, patch))
    }

    fn as_tuple(&self) -> (u32, u32, u32) {
        (self.major, self.minor, self.patch)
    }
}

impl Ord for KubeVersion {
    fn cmp(&self, other: &Self) -> Ordering {
        self.as_tuple().cmp(&other.as_tuple())
    }
}

impl PartialOrd for KubeVersion {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Display for KubeVersion {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}

impl FromStr for KubeVersion {
    type Err = VersionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl Serialize for KubeVersion {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&self.with_v())
    }
}

impl<'de> Deserialize<'de> for KubeVersion {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let original = String::deserialize(deserializer)?;
        Self::parse(original).map_err(serde::de::Error::custom)
    }
}

/// Compare the server version against the supported range. Being below `minimum` is an error,
/// being above `maximum` only logs a warning since newer clusters usually work.
pub fn check_version(
    server: &KubeVersion,
    minimum: &KubeVersion,
    maximum: &KubeVersion,
) -> Result<(), VersionError> {
    if server < minimum {
        return BelowMinimumSnafu {
            minimum: *minimum,
            server: *server,
        }
        .fail();
    }
    if server > maximum {
        warn!(
            "The maximum supported Kubernetes version is {}, but the server version is {}; \
            continuing anyway",
            maximum, server
        );
    }
    Ok(())
}
