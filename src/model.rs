use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// One of the three fixed caddie lists. Encoded as `1`, `2` or `3` on the wire.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(try_from = "u8", into = "u8")]
pub enum ListNumber {
    One,
    Two,
    Three,
}

impl ListNumber {
    pub const ALL: [ListNumber; 3] = [ListNumber::One, ListNumber::Two, ListNumber::Three];

    pub fn get(self) -> u8 {
        match self {
            ListNumber::One => 1,
            ListNumber::Two => 2,
            ListNumber::Three => 3,
        }
    }
}

impl TryFrom<u8> for ListNumber {
    type Error = String;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(ListNumber::One),
            2 => Ok(ListNumber::Two),
            3 => Ok(ListNumber::Three),
            other => Err(format!("list number must be 1, 2 or 3, got {}", other)),
        }
    }
}

impl From<ListNumber> for u8 {
    fn from(value: ListNumber) -> Self {
        value.get()
    }
}

impl fmt::Display for ListNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.get())
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum CaddieStatus {
    #[serde(rename = "Disponible")]
    Available,
    #[serde(rename = "En campo")]
    InField,
    #[serde(rename = "Ausente")]
    Absent,
}

impl CaddieStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CaddieStatus::Available => "Disponible",
            CaddieStatus::InField => "En campo",
            CaddieStatus::Absent => "Ausente",
        }
    }
}

impl fmt::Display for CaddieStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum AttendanceStatus {
    #[serde(rename = "Presente")]
    Present,
    #[serde(rename = "Llegó tarde")]
    Late,
    #[serde(rename = "No vino")]
    Absent,
    #[serde(rename = "Permiso")]
    Excused,
}

impl AttendanceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AttendanceStatus::Present => "Presente",
            AttendanceStatus::Late => "Llegó tarde",
            AttendanceStatus::Absent => "No vino",
            AttendanceStatus::Excused => "Permiso",
        }
    }
}

impl fmt::Display for AttendanceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub enum ListOrder {
    #[default]
    #[serde(rename = "ascendente")]
    Ascending,
    #[serde(rename = "descendente")]
    Descending,
}

impl ListOrder {
    pub fn as_str(&self) -> &'static str {
        match self {
            ListOrder::Ascending => "ascendente",
            ListOrder::Descending => "descendente",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Caddie {
    pub id: String,
    pub name: String,
    pub list_number: ListNumber,
    pub status: CaddieStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phone_number: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// One work cycle of a caddie, from going out to returning.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Turn {
    pub id: String,
    pub caddie_id: String,
    pub caddie_name: String,
    pub list_number: ListNumber,
    pub start_time: DateTime<Utc>,
    #[serde(default)]
    pub end_time: Option<DateTime<Utc>>,
    pub completed: bool,
}

impl Turn {
    pub fn is_open(&self) -> bool {
        !self.completed
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct AttendanceRecord {
    pub id: String,
    pub caddie_id: String,
    pub caddie_name: String,
    pub list_number: ListNumber,
    pub date: NaiveDate,
    pub status: AttendanceStatus,
    pub call_time: DateTime<Utc>,
    #[serde(default)]
    pub arrival_time: Option<DateTime<Utc>>,
    pub turns_count: u32,
    #[serde(default)]
    pub end_time: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ListSettings {
    pub list_number: ListNumber,
    /// Daily call time, `HH:mm`.
    pub call_time: String,
    #[serde(default)]
    pub order: ListOrder,
    #[serde(default)]
    pub range_start: Option<u32>,
    #[serde(default)]
    pub range_end: Option<u32>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ListSettings {
    /// Settings used before the backend has supplied any for `list_number`.
    pub fn initial(list_number: ListNumber, call_time: impl Into<String>) -> Self {
        Self {
            list_number,
            call_time: call_time.into(),
            order: ListOrder::Ascending,
            range_start: None,
            range_end: None,
            created_at: DateTime::<Utc>::UNIX_EPOCH,
            updated_at: DateTime::<Utc>::UNIX_EPOCH,
        }
    }

    /// The 1-based positional window, present only when both bounds are set.
    pub fn range(&self) -> Option<(u32, u32)> {
        match (self.range_start, self.range_end) {
            (Some(start), Some(end)) => Some((start, end)),
            _ => None,
        }
    }
}
