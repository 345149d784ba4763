//! Stable machine-readable error kinds

use std::fmt::Display;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use crate::error::Error;

/// Failure kinds exposed at the service boundary.
///
/// The textual form of each kind is stable; an HTTP layer fronting the core
/// maps it to a problem-details type URN.
#[derive(Default, Debug, Copy, Clone, Eq, PartialEq)]
pub enum ErrorKind {
    /// An absent task, job, artifact or registered callable.
    NotFound,

    /// A malformed identifier in a request.
    InvalidId,

    /// A disabled-task execution, a missing required parameter
    /// or a bad payload shape.
    Validation,

    /// A missing prerequisite or a duplicate registry name.
    Conflict,

    /// Everything the other kinds do not cover.
    #[default]
    Internal,
}

impl ErrorKind {
    /// Returns the stable textual form of the kind
    #[inline]
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::NotFound => "not-found",
            ErrorKind::InvalidId => "invalid-id",
            ErrorKind::Validation => "validation-failed",
            ErrorKind::Conflict => "conflict",
            ErrorKind::Internal => "internal",
        }
    }
}

impl TryFrom<&str> for ErrorKind {
    type Error = ();

    #[inline]
    fn try_from(value: &str) -> Result<Self, Self::Error> {
        match value {
            "not-found" => Ok(ErrorKind::NotFound),
            "invalid-id" => Ok(ErrorKind::InvalidId),
            "validation-failed" => Ok(ErrorKind::Validation),
            "conflict" => Ok(ErrorKind::Conflict),
            "internal" => Ok(ErrorKind::Internal),
            _ => Err(()),
        }
    }
}

impl Serialize for ErrorKind {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for ErrorKind {
    fn deserialize<D>(deserializer: D) -> Result<ErrorKind, D::Error>
    where
        D: Deserializer<'de>,
    {
        let value = String::deserialize(deserializer)?;
        ErrorKind::try_from(value.as_str()).map_err(|_| {
            serde::de::Error::custom(format!("Invalid error kind: {value}"))
        })
    }
}

impl Display for ErrorKind {
    #[inline]
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<ErrorKind> for Error {
    fn from(kind: ErrorKind) -> Self {
        Error::new(kind, kind.to_string())
    }
}
