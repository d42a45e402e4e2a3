use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::model::{AttendanceStatus, CaddieStatus, ListNumber, ListOrder};

#[derive(Serialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CreateCaddie {
    pub name: String,
    pub list_number: ListNumber,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phone_number: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<CaddieStatus>,
}

/// Partial caddie update; absent fields are left alone by the backend.
#[derive(Serialize, Debug, Clone, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct UpdateCaddie {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub list_number: Option<ListNumber>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<CaddieStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phone_number: Option<String>,
}

impl UpdateCaddie {
    pub fn status(status: CaddieStatus) -> Self {
        Self {
            status: Some(status),
            ..Self::default()
        }
    }
}

#[derive(Serialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CreateTurn {
    pub caddie_id: String,
    pub caddie_name: String,
    pub list_number: ListNumber,
}

#[derive(Serialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct UpdateTurn {
    /// Sent as `null` to reopen a turn.
    pub end_time: Option<DateTime<Utc>>,
    pub completed: bool,
}

impl UpdateTurn {
    pub fn close(at: DateTime<Utc>) -> Self {
        Self {
            end_time: Some(at),
            completed: true,
        }
    }

    pub fn reopen() -> Self {
        Self {
            end_time: None,
            completed: false,
        }
    }
}

#[derive(Serialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CreateAttendance {
    pub caddie_id: String,
    pub caddie_name: String,
    pub list_number: ListNumber,
    pub date: NaiveDate,
    pub status: AttendanceStatus,
}

#[derive(Serialize, Debug)]
pub(crate) struct UpdateOrder {
    pub order: ListOrder,
}

/// Both bounds are always sent; `null` clears the window.
#[derive(Serialize, Debug)]
#[serde(rename_all = "camelCase")]
pub(crate) struct UpdateRange {
    pub range_start: Option<u32>,
    pub range_end: Option<u32>,
}

#[derive(Serialize, Debug)]
#[serde(rename_all = "camelCase")]
pub(crate) struct UpdateCallTime<'a> {
    pub call_time: &'a str,
}

#[derive(Serialize, Debug)]
pub(crate) struct LoginRequest<'a> {
    pub password: &'a str,
}

#[derive(Deserialize, Debug, Clone, PartialEq)]
pub struct LoginResponse {
    pub token: String,
    #[serde(default)]
    pub admin: bool,
}

#[derive(Deserialize, Debug)]
pub(crate) struct VerifyResponse {
    #[serde(default)]
    pub valid: bool,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: String,
    pub content: String,
    pub target_list: Option<ListNumber>,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub read: bool,
}

#[derive(Serialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CreateMessage {
    pub content: String,
    pub target_list: Option<ListNumber>,
}

#[derive(Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
pub(crate) struct WhatsAppUrl {
    pub whatsapp_url: String,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DailyReport {
    pub date: NaiveDate,
    pub records: Vec<ReportRow>,
    pub summary: ReportSummary,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ReportRow {
    pub id: String,
    pub caddie_name: String,
    pub list_number: ListNumber,
    pub date: NaiveDate,
    pub status: AttendanceStatus,
    pub turns_count: u32,
}

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ReportSummary {
    pub total_caddies: u32,
    pub present: u32,
    pub late: u32,
    pub absent: u32,
    pub permission: u32,
    pub total_turns: u32,
}

#[derive(Deserialize, Debug)]
pub(crate) struct ErrorBody {
    pub error: Option<String>,
}
