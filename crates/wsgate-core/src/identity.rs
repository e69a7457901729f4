//! Identity newtype for connections and envelopes.
//!
//! An [`Identity`] wraps a random (v4) [`Uuid`] so it cannot be mixed up with
//! other 128-bit values. The text form is always the canonical lowercase,
//! hyphenated, 36-character representation.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// Length of the canonical hyphenated text form.
pub const IDENTITY_TEXT_LEN: usize = 36;

/// Errors from parsing an [`Identity`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum IdentityError {
    /// Input is not a hyphenated 36-character UUID.
    #[error("invalid identity format: {input:?}")]
    InvalidFormat {
        /// The rejected input.
        input: String,
    },
}

/// Globally unique, immutable identifier.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Identity(Uuid);

impl Identity {
    /// Generate a fresh random identity.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// The all-zero identity.
    #[must_use]
    pub const fn nil() -> Self {
        Self(Uuid::nil())
    }

    /// Wrap an existing UUID.
    #[must_use]
    pub const fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// The wrapped UUID.
    #[must_use]
    pub const fn as_uuid(&self) -> &Uuid {
        &self.0
    }

    /// Whether this is the all-zero identity.
    #[must_use]
    pub fn is_nil(&self) -> bool {
        self.0.is_nil()
    }

    /// Parse the canonical hyphenated form. Uppercase hex is accepted and
    /// normalized; braced, URN and unhyphenated forms are rejected.
    pub fn parse(input: &str) -> Result<Self, IdentityError> {
        let invalid = || IdentityError::InvalidFormat {
            input: input.to_owned(),
        };
        if input.len() != IDENTITY_TEXT_LEN {
            return Err(invalid());
        }
        Uuid::try_parse(input).map(Self).map_err(|_| invalid())
    }
}

/// The nil identity. Use [`Identity::new`] for a fresh one.
impl Default for Identity {
    fn default() -> Self {
        Self::nil()
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0.hyphenated(), f)
    }
}

impl FromStr for Identity {
    type Err = IdentityError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for Identity {
    type Error = IdentityError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<Identity> for String {
    fn from(id: Identity) -> Self {
        id.to_string()
    }
}

impl From<Uuid> for Identity {
    fn from(uuid: Uuid) -> Self {
        Self(uuid)
    }
}
