use std::fmt;

use serde::{Deserialize, Serialize};

use crate::id::ObjectId;

/// How a stored object may be retrieved.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RetentionMode {
    /// Retrievable any number of times until the TTL elapses.
    Normal,
    /// Retrievable exactly once, then deleted.
    Burn,
}

impl RetentionMode {
    /// File name suffix for normal objects.
    pub const NORMAL_SUFFIX: &'static str = ".bin";
    /// File name suffix for burn objects.
    pub const BURN_SUFFIX: &'static str = ".burn.bin";

    /// Map the upload `burn` flag to a mode.
    pub fn from_burn_flag(burn: bool) -> Self {
        if burn {
            Self::Burn
        } else {
            Self::Normal
        }
    }

    pub fn is_burn(self) -> bool {
        matches!(self, Self::Burn)
    }

    /// The on-disk suffix that encodes this mode.
    pub fn suffix(self) -> &'static str {
        match self {
            Self::Normal => Self::NORMAL_SUFFIX,
            Self::Burn => Self::BURN_SUFFIX,
        }
    }

    /// Committed file name for an object, e.g. `<id>.burn.bin`.
    pub fn file_name(self, id: &ObjectId) -> String {
        format!("{id}{}", self.suffix())
    }

    /// Split a committed file name back into its id and mode.
    ///
    /// The burn suffix is checked first since it also ends in `.bin`.
    /// Returns `None` for anything that is not an object file.
    pub fn parse_file_name(name: &str) -> Option<(ObjectId, Self)> {
        let (stem, mode) = if let Some(stem) = name.strip_suffix(Self::BURN_SUFFIX) {
            (stem, Self::Burn)
        } else {
            (name.strip_suffix(Self::NORMAL_SUFFIX)?, Self::Normal)
        };
        ObjectId::parse(stem).ok().map(|id| (id, mode))
    }
}

impl fmt::Display for RetentionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Normal => write!(f, "normal"),
            Self::Burn => write!(f, "burn"),
        }
    }
}
