use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub const TEMP_ID_PREFIX: &str = "tmp-";

/// Client-generated placeholder id, used until the hosted service assigns a real one.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TempId(String);

impl TempId {
    pub fn generate() -> Self {
        Self(format!("{TEMP_ID_PREFIX}{}", Uuid::new_v4()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TempId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Identity of an entity in the local store.
///
/// A freshly created entity is `Pending` until its create call is reconciled, at which
/// point the store swaps it for `Committed` with the id the service returned.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityId {
    Pending(TempId),
    Committed(String),
}

impl EntityId {
    pub fn pending() -> Self {
        Self::Pending(TempId::generate())
    }

    pub fn as_str(&self) -> &str {
        match self {
            Self::Pending(temp) => temp.as_str(),
            Self::Committed(id) => id,
        }
    }

    pub fn is_pending(&self) -> bool {
        matches!(self, Self::Pending(_))
    }

    pub fn server_id(&self) -> Option<&str> {
        match self {
            Self::Pending(_) => None,
            Self::Committed(id) => Some(id),
        }
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

pub fn is_temp_id(id: &str) -> bool {
    id.starts_with(TEMP_ID_PREFIX)
}
