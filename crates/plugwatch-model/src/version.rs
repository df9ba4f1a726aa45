use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;

/// A file version as embedded in a binary's version resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(from = "[u16; 4]", into = "[u16; 4]")]
pub struct Version {
    pub major: u16,
    pub minor: u16,
    pub build: u16,
    pub revision: u16,
}

impl Version {
    #[must_use]
    pub fn new(major: u16, minor: u16, build: u16, revision: u16) -> Self {
        Self {
            major,
            minor,
            build,
            revision,
        }
    }

    /// Decode a most-significant/least-significant word pair as stored in
    /// the fixed file info block.
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub fn from_words(ms: u32, ls: u32) -> Self {
        Self::new(
            (ms >> 16) as u16,
            (ms & 0xFFFF) as u16,
            (ls >> 16) as u16,
            (ls & 0xFFFF) as u16,
        )
    }

    /// All-zero means "no version present", never a real `0.0.0.0`.
    #[must_use]
    pub fn is_zero(&self) -> bool {
        *self == Self::default()
    }

    #[must_use]
    pub fn is_greater(&self, other: &Self) -> bool {
        self > other
    }
}

impl Ord for Version {
    fn cmp(&self, other: &Self) -> Ordering {
        self.major
            .cmp(&other.major)
            .then(self.minor.cmp(&other.minor))
            .then(self.build.cmp(&other.build))
            .then(self.revision.cmp(&other.revision))
    }
}

impl PartialOrd for Version {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}.{}.{}.{}",
            self.major, self.minor, self.build, self.revision
        )
    }
}

impl From<[u16; 4]> for Version {
    fn from([major, minor, build, revision]: [u16; 4]) -> Self {
        Self::new(major, minor, build, revision)
    }
}

impl From<Version> for [u16; 4] {
    fn from(version: Version) -> Self {
        [version.major, version.minor, version.build, version.revision]
    }
}
