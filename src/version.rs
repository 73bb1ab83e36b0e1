//! Protocol version numbers.

use core::fmt;
use core::str::FromStr;

use crate::error::InvalidVersion;

/// A two-part protocol version as carried by the `ver` and `xmpp:version`
/// attributes.
///
/// Ordering is lexicographic on `(major, minor)`, so the mutually supported
/// version of two parties is simply [`Ord::min`] of the two.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Version {
    /// Major version number.
    pub major: u32,

    /// Minor version number.
    pub minor: u32,
}

impl Version {
    /// Create a version from its parts.
    #[must_use]
    pub const fn new(major: u32, minor: u32) -> Self {
        Self { major, minor }
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.major, self.minor)
    }
}

impl FromStr for Version {
    type Err = InvalidVersion;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (major, minor) = s.split_once('.').ok_or(InvalidVersion)?;
        Ok(Self {
            major: major.parse().map_err(|_| InvalidVersion)?,
            minor: minor.parse().map_err(|_| InvalidVersion)?,
        })
    }
}
