use std::fmt;
use std::str::FromStr;

use rand::rngs::OsRng;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::TypeError;

/// Length of the canonical hyphenated form, e.g. `0b7c9e1a-...`.
const CANONICAL_LEN: usize = 36;

/// Random, unguessable identifier for a stored object.
///
/// An `ObjectId` is a version-4 UUID drawn from the operating system's
/// entropy source (122 random bits). It carries no information about the
/// object it names and is rendered in the canonical lowercase hyphenated form,
/// which is also the stem of the object's file name on disk.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ObjectId(Uuid);

impl ObjectId {
    /// Draw a fresh identifier from the OS entropy source.
    ///
    /// Fails only if the entropy source cannot be read.
    pub fn generate() -> Result<Self, TypeError> {
        let mut bytes = [0u8; 16];
        OsRng
            .try_fill_bytes(&mut bytes)
            .map_err(|e| TypeError::Entropy(e.to_string()))?;
        Ok(Self(uuid::Builder::from_random_bytes(bytes).into_uuid()))
    }

    /// Parse an identifier from its canonical text form.
    ///
    /// Only the lowercase hyphenated rendering is accepted, so a parsed id
    /// always round-trips to the exact same string and is safe to splice
    /// into a file name.
    pub fn parse(s: &str) -> Result<Self, TypeError> {
        if s.len() != CANONICAL_LEN {
            return Err(TypeError::InvalidId(s.to_string()));
        }
        let uuid = Uuid::try_parse(s).map_err(|_| TypeError::InvalidId(s.to_string()))?;
        let id = Self(uuid);
        if id.to_string() != s {
            return Err(TypeError::InvalidId(s.to_string()));
        }
        Ok(id)
    }

    /// The underlying UUID.
    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }

    /// Short form (first 8 characters) for log lines.
    pub fn short(&self) -> String {
        let mut s = self.to_string();
        s.truncate(8);
        s
    }
}

impl fmt::Debug for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ObjectId({})", self.short())
    }
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.hyphenated())
    }
}

impl FromStr for ObjectId {
    type Err = TypeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for ObjectId {
    type Error = TypeError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        Self::parse(&s)
    }
}

impl From<ObjectId> for String {
    fn from(id: ObjectId) -> Self {
        id.to_string()
    }
}
