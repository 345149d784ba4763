//! Lexicographically sortable entity identifiers

use std::fmt::{self, Display, Formatter};
use std::str::FromStr;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use ulid::Ulid;
use crate::error::{Error, ErrorKind};

/// An opaque 128-bit identifier rendered as a 26-character
/// Crockford base-32 string.
///
/// Identifiers sort lexicographically in creation order, so listings keyed
/// by id follow insertion time without a separate sort column.
///
/// # Example
/// ```
/// use stoker::Id;
///
/// let id = Id::new();
/// let text = id.to_string();
///
/// assert_eq!(text.len(), 26);
/// assert_eq!(text.parse::<Id>().unwrap(), id);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Id(Ulid);

impl Id {
    /// Creates a fresh [`Id`]
    #[inline]
    pub fn new() -> Self {
        Self(Ulid::new())
    }
}

impl Default for Id {
    #[inline]
    fn default() -> Self {
        Self::new()
    }
}

impl Display for Id {
    #[inline]
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl FromStr for Id {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ulid::from_string(s)
            .map(Self)
            .map_err(|_| Error::new(
                ErrorKind::InvalidId,
                format!("invalid identifier: {s}")))
    }
}

impl Serialize for Id {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.collect_str(&self.0)
    }
}

impl<'de> Deserialize<'de> for Id {
    fn deserialize<D>(deserializer: D) -> Result<Id, D::Error>
    where
        D: Deserializer<'de>,
    {
        let value = String::deserialize(deserializer)?;
        value.parse().map_err(serde::de::Error::custom)
    }
}
