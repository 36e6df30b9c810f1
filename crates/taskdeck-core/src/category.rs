use std::fmt;
use std::str::FromStr;

use anyhow::anyhow;
use serde::{Deserialize, Serialize};

use crate::id::EntityId;

/// Id of the built-in "every task" category. It only exists locally.
pub const ALL_CATEGORY: &str = "all";

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum CategoryColor {
    Red,
    Orange,
    Yellow,
    Green,
    Teal,
    #[default]
    Blue,
    Indigo,
    Purple,
    Pink,
    Gray,
}

impl CategoryColor {
    pub const ALL: [CategoryColor; 10] = [
        CategoryColor::Red,
        CategoryColor::Orange,
        CategoryColor::Yellow,
        CategoryColor::Green,
        CategoryColor::Teal,
        CategoryColor::Blue,
        CategoryColor::Indigo,
        CategoryColor::Purple,
        CategoryColor::Pink,
        CategoryColor::Gray,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            CategoryColor::Red => "red",
            CategoryColor::Orange => "orange",
            CategoryColor::Yellow => "yellow",
            CategoryColor::Green => "green",
            CategoryColor::Teal => "teal",
            CategoryColor::Blue => "blue",
            CategoryColor::Indigo => "indigo",
            CategoryColor::Purple => "purple",
            CategoryColor::Pink => "pink",
            CategoryColor::Gray => "gray",
        }
    }

    /// ANSI foreground code used by the table renderer.
    pub fn ansi_code(self) -> &'static str {
        match self {
            CategoryColor::Red => "31",
            CategoryColor::Orange => "38;5;208",
            CategoryColor::Yellow => "33",
            CategoryColor::Green => "32",
            CategoryColor::Teal => "36",
            CategoryColor::Blue => "34",
            CategoryColor::Indigo => "38;5;61",
            CategoryColor::Purple => "35",
            CategoryColor::Pink => "38;5;205",
            CategoryColor::Gray => "90",
        }
    }
}

impl FromStr for CategoryColor {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_ascii_lowercase();
        let wanted = if wanted == "grey" { "gray".to_string() } else { wanted };
        CategoryColor::ALL
            .into_iter()
            .find(|color| color.as_str() == wanted)
            .ok_or_else(|| anyhow!("unknown color: {s} (expected one of red, orange, yellow, green, teal, blue, indigo, purple, pink, gray)"))
    }
}

impl fmt::Display for CategoryColor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The remotely persisted part of a category. `count` is derived locally and never sent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CategoryFields {
    pub name: String,

    #[serde(default)]
    pub color: CategoryColor,
}

pub type NewCategory = CategoryFields;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Category {
    pub id: EntityId,

    #[serde(flatten)]
    pub fields: CategoryFields,

    #[serde(default)]
    pub count: usize,
}

impl Category {
    pub fn new(id: EntityId, fields: CategoryFields) -> Self {
        Self {
            id,
            fields,
            count: 0,
        }
    }

    pub fn sentinel(count: usize) -> Self {
        Self {
            id: EntityId::Committed(ALL_CATEGORY.to_string()),
            fields: CategoryFields {
                name: "All".to_string(),
                color: CategoryColor::Gray,
            },
            count,
        }
    }

    pub fn is_sentinel(&self) -> bool {
        self.id.as_str() == ALL_CATEGORY
    }

    pub fn name(&self) -> &str {
        &self.fields.name
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CategoryPatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub color: Option<CategoryColor>,
}

impl CategoryPatch {
    pub fn is_empty(&self) -> bool {
        self.name.is_none() && self.color.is_none()
    }

    pub fn apply_to(&self, fields: &mut CategoryFields) {
        if let Some(name) = &self.name {
            fields.name = name.clone();
        }
        if let Some(color) = self.color {
            fields.color = color;
        }
    }
}

/// Builds an update payload from a full local category, dropping the derived count.
impl From<&Category> for CategoryPatch {
    fn from(category: &Category) -> Self {
        Self {
            name: Some(category.fields.name.clone()),
            color: Some(category.fields.color),
        }
    }
}
