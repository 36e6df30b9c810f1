use std::fmt;
use std::str::FromStr;

use anyhow::anyhow;
use chrono::{NaiveDate, NaiveTime};
use serde::{Deserialize, Serialize};

use crate::category::ALL_CATEGORY;
use crate::datetime::clock_time_serde;
use crate::id::EntityId;

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    High,
    #[default]
    Medium,
    Low,
}

impl Priority {
    pub const ALL: [Priority; 3] = [Priority::High, Priority::Medium, Priority::Low];

    /// Sort rank, high first.
    pub fn rank(self) -> u8 {
        match self {
            Priority::High => 0,
            Priority::Medium => 1,
            Priority::Low => 2,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Priority::High => "high",
            Priority::Medium => "medium",
            Priority::Low => "low",
        }
    }
}

impl FromStr for Priority {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "h" | "high" => Ok(Priority::High),
            "m" | "med" | "medium" => Ok(Priority::Medium),
            "l" | "low" => Ok(Priority::Low),
            other => Err(anyhow!("unknown priority: {other}")),
        }
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Repeat {
    #[default]
    None,
    Daily,
    Weekly,
    Monthly,
}

impl FromStr for Repeat {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "" | "none" | "never" => Ok(Repeat::None),
            "daily" | "day" => Ok(Repeat::Daily),
            "weekly" | "week" => Ok(Repeat::Weekly),
            "monthly" | "month" => Ok(Repeat::Monthly),
            other => Err(anyhow!("unknown repeat rule: {other}")),
        }
    }
}

impl fmt::Display for Repeat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Repeat::None => "none",
            Repeat::Daily => "daily",
            Repeat::Weekly => "weekly",
            Repeat::Monthly => "monthly",
        };
        f.write_str(name)
    }
}

/// Category membership of a task. On the wire this is a bare string, `"all"` meaning
/// uncategorized.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum CategoryRef {
    #[default]
    All,
    Category(String),
}

impl CategoryRef {
    pub fn id(&self) -> Option<&str> {
        match self {
            CategoryRef::All => None,
            CategoryRef::Category(id) => Some(id),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            CategoryRef::All => ALL_CATEGORY,
            CategoryRef::Category(id) => id,
        }
    }
}

impl From<String> for CategoryRef {
    fn from(value: String) -> Self {
        if value.is_empty() || value == ALL_CATEGORY {
            CategoryRef::All
        } else {
            CategoryRef::Category(value)
        }
    }
}

impl From<CategoryRef> for String {
    fn from(value: CategoryRef) -> Self {
        match value {
            CategoryRef::All => ALL_CATEGORY.to_string(),
            CategoryRef::Category(id) => id,
        }
    }
}

/// Every user-editable field of a task. Also the payload of a create call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskFields {
    pub title: String,

    #[serde(default)]
    pub description: String,

    pub due_date: NaiveDate,

    #[serde(default, with = "clock_time_serde")]
    pub due_time: Option<NaiveTime>,

    #[serde(default)]
    pub category: CategoryRef,

    #[serde(default)]
    pub priority: Priority,

    #[serde(default)]
    pub location: Option<String>,

    #[serde(default, with = "reminder_serde")]
    pub reminder: Option<u32>,

    #[serde(default)]
    pub repeat: Repeat,

    #[serde(default)]
    pub is_completed: bool,

    #[serde(default)]
    pub is_favorite: bool,
}

pub type NewTask = TaskFields;

impl TaskFields {
    pub fn new(title: impl Into<String>, due_date: NaiveDate) -> Self {
        Self {
            title: title.into(),
            description: String::new(),
            due_date,
            due_time: None,
            category: CategoryRef::All,
            priority: Priority::default(),
            location: None,
            reminder: None,
            repeat: Repeat::None,
            is_completed: false,
            is_favorite: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Task {
    pub id: EntityId,

    #[serde(flatten)]
    pub fields: TaskFields,
}

impl Task {
    pub fn title(&self) -> &str {
        &self.fields.title
    }

    pub fn is_completed(&self) -> bool {
        self.fields.is_completed
    }
}

/// Field-level partial update. Only fields that are `Some` are serialized, so the
/// outgoing payload carries exactly what changed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskPatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub due_date: Option<NaiveDate>,

    #[serde(
        skip_serializing_if = "Option::is_none",
        serialize_with = "clock_time_serde::serialize_patch"
    )]
    pub due_time: Option<Option<NaiveTime>>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub category: Option<CategoryRef>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub priority: Option<Priority>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub location: Option<Option<String>>,

    #[serde(
        skip_serializing_if = "Option::is_none",
        serialize_with = "reminder_serde::serialize_patch"
    )]
    pub reminder: Option<Option<u32>>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub repeat: Option<Repeat>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_completed: Option<bool>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_favorite: Option<bool>,
}

impl TaskPatch {
    pub fn is_empty(&self) -> bool {
        *self == TaskPatch::default()
    }

    pub fn apply_to(&self, fields: &mut TaskFields) {
        if let Some(title) = &self.title {
            fields.title = title.clone();
        }
        if let Some(description) = &self.description {
            fields.description = description.clone();
        }
        if let Some(due_date) = self.due_date {
            fields.due_date = due_date;
        }
        if let Some(due_time) = self.due_time {
            fields.due_time = due_time;
        }
        if let Some(category) = &self.category {
            fields.category = category.clone();
        }
        if let Some(priority) = self.priority {
            fields.priority = priority;
        }
        if let Some(location) = &self.location {
            fields.location = location.clone();
        }
        if let Some(reminder) = self.reminder {
            fields.reminder = reminder;
        }
        if let Some(repeat) = self.repeat {
            fields.repeat = repeat;
        }
        if let Some(is_completed) = self.is_completed {
            fields.is_completed = is_completed;
        }
        if let Some(is_favorite) = self.is_favorite {
            fields.is_favorite = is_favorite;
        }
    }
}

/// Reminders travel as strings of minutes; `"0"`, `""` and null all mean none.
pub mod reminder_serde {
    use serde::{Deserialize, Deserializer, Serializer, de};
    use serde_json::Value;

    pub fn serialize<S>(value: &Option<u32>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match value {
            Some(minutes) if *minutes > 0 => serializer.serialize_str(&minutes.to_string()),
            _ => serializer.serialize_str("0"),
        }
    }

    pub fn serialize_patch<S>(value: &Option<Option<u32>>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serialize(&value.flatten(), serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<u32>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = Option::<Value>::deserialize(deserializer)?;
        let minutes = match raw {
            None | Some(Value::Null) => 0,
            Some(Value::String(text)) => {
                let text = text.trim();
                if text.is_empty() {
                    0
                } else {
                    text.parse::<u32>()
                        .map_err(|_| de::Error::custom(format!("invalid reminder: {text}")))?
                }
            }
            Some(Value::Number(number)) => number
                .as_u64()
                .and_then(|n| u32::try_from(n).ok())
                .ok_or_else(|| de::Error::custom(format!("invalid reminder: {number}")))?,
            Some(other) => {
                return Err(de::Error::custom(format!("invalid reminder: {other}")));
            }
        };
        Ok((minutes > 0).then_some(minutes))
    }
}
