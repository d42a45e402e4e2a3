//! Push updates about caddies.
//!
//! Events arrive as `{ "event": name, "data": payload }`. Some relays wrap the
//! payload once more as `{ "data": ... }`; that wrapper is removed before
//! decoding.
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;
use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::model::{Caddie, CaddieStatus, ListNumber};
use crate::store::Store;

pub const STATUS_CHANGED: &str = "caddie:status_changed";
pub const ADDED: &str = "caddie:added";
pub const UPDATED: &str = "caddie:updated";
pub const DELETED: &str = "caddie:deleted";

#[derive(Debug, Error)]
pub enum FeedError {
    #[error("unknown event {0:?}")]
    UnknownEvent(String),
    #[error("malformed event payload: {0}")]
    Payload(#[from] serde_json::Error),
}

/// A caddie changed on another client.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CaddieUpdate {
    pub caddie_id: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub status: Option<CaddieStatus>,
    #[serde(default)]
    pub list_number: Option<ListNumber>,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AddedPayload {
    caddie_id: String,
    name: String,
    list_number: ListNumber,
    status: CaddieStatus,
    #[serde(default)]
    phone_number: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl From<AddedPayload> for Caddie {
    fn from(p: AddedPayload) -> Self {
        Caddie {
            id: p.caddie_id,
            name: p.name,
            list_number: p.list_number,
            status: p.status,
            phone_number: p.phone_number,
            created_at: p.created_at,
            updated_at: p.updated_at,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DeletedPayload {
    caddie_id: String,
    timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum PushEvent {
    StatusChanged(CaddieUpdate),
    Updated(CaddieUpdate),
    Added(Caddie),
    Deleted {
        caddie_id: String,
        timestamp: DateTime<Utc>,
    },
}

#[derive(Debug, Deserialize)]
struct Envelope {
    event: String,
    #[serde(default)]
    data: Value,
}

fn unwrap_data(payload: Value) -> Value {
    match payload {
        Value::Object(mut map) if map.contains_key("data") => {
            map.remove("data").unwrap_or(Value::Null)
        }
        other => other,
    }
}

impl PushEvent {
    pub fn decode(event: &str, payload: Value) -> Result<Self, FeedError> {
        let data = unwrap_data(payload);
        Ok(match event {
            STATUS_CHANGED => PushEvent::StatusChanged(serde_json::from_value(data)?),
            UPDATED => PushEvent::Updated(serde_json::from_value(data)?),
            ADDED => PushEvent::Added(serde_json::from_value::<AddedPayload>(data)?.into()),
            DELETED => {
                let p: DeletedPayload = serde_json::from_value(data)?;
                PushEvent::Deleted {
                    caddie_id: p.caddie_id,
                    timestamp: p.timestamp,
                }
            }
            other => return Err(FeedError::UnknownEvent(other.to_string())),
        })
    }

    /// Decode one newline-delimited envelope.
    pub fn from_line(line: &str) -> Result<Self, FeedError> {
        let envelope: Envelope = serde_json::from_str(line)?;
        Self::decode(&envelope.event, envelope.data)
    }

    pub fn caddie_id(&self) -> &str {
        match self {
            PushEvent::StatusChanged(u) | PushEvent::Updated(u) => &u.caddie_id,
            PushEvent::Added(c) => &c.id,
            PushEvent::Deleted { caddie_id, .. } => caddie_id,
        }
    }

    /// Apply to the store. Returns false for stale, duplicate or unknown-id events.
    pub fn apply(self, store: &mut Store) -> bool {
        match self {
            PushEvent::StatusChanged(update) | PushEvent::Updated(update) => {
                let Some(local) = store.caddie(&update.caddie_id) else {
                    return false;
                };
                let patched = Caddie {
                    name: update.name.unwrap_or_else(|| local.name.clone()),
                    status: update.status.unwrap_or(local.status),
                    list_number: update.list_number.unwrap_or(local.list_number),
                    updated_at: update.timestamp,
                    ..local.clone()
                };
                store.upsert_caddie(patched)
            }
            PushEvent::Added(caddie) => store.upsert_caddie(caddie),
            PushEvent::Deleted {
                caddie_id,
                timestamp,
            } => store.remove_caddie(&caddie_id, timestamp),
        }
    }
}

/// Decode newline-delimited envelopes from `reader` on a background task.
///
/// Malformed lines are logged and skipped. The channel closes at end of input.
pub fn read_events<R>(reader: R) -> mpsc::Receiver<PushEvent>
where
    R: AsyncBufRead + Unpin + Send + 'static,
{
    let (tx, rx) = mpsc::channel(64);
    tokio::spawn(async move {
        let mut lines = reader.lines();
        loop {
            let line = match lines.next_line().await {
                Ok(Some(line)) => line,
                Ok(None) => break,
                Err(err) => {
                    warn!(?err, "push feed read failed");
                    break;
                }
            };
            if line.trim().is_empty() {
                continue;
            }
            match PushEvent::from_line(&line) {
                Ok(event) => {
                    debug!(caddie_id = event.caddie_id(), "push event");
                    if tx.send(event).await.is_err() {
                        break;
                    }
                }
                Err(err) => warn!(%err, "skipping push event"),
            }
        }
    });
    rx
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ListSettings;
    use chrono::{Duration, TimeZone};
    use serde_json::json;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, 7, 0, 0).unwrap()
    }

    fn store() -> Store {
        let mut store = Store::new([ListSettings::initial(ListNumber::One, "06:00")]);
        store.upsert_caddie(Caddie {
            id: "c1".into(),
            name: "Luis".into(),
            list_number: ListNumber::One,
            status: CaddieStatus::Available,
            phone_number: None,
            created_at: t0(),
            updated_at: t0(),
        });
        store
    }

    fn status_event(status: &str, at: DateTime<Utc>) -> PushEvent {
        PushEvent::decode(
            STATUS_CHANGED,
            json!({ "caddieId": "c1", "name": "Luis", "status": status, "listNumber": 1, "timestamp": at }),
        )
        .unwrap()
    }

    #[test]
    fn wrapped_payload_is_unwrapped() {
        let event = PushEvent::decode(
            DELETED,
            json!({ "data": { "caddieId": "c9", "timestamp": t0() }, "event": "caddie:deleted" }),
        )
        .unwrap();
        assert_eq!(
            event,
            PushEvent::Deleted {
                caddie_id: "c9".into(),
                timestamp: t0()
            }
        );
    }

    #[test]
    fn newer_status_applies_once() {
        let mut store = store();
        let later = t0() + Duration::seconds(30);
        assert!(status_event("En campo", later).apply(&mut store));
        assert_eq!(store.caddie("c1").unwrap().status, CaddieStatus::InField);
        // Duplicate delivery is a no-op.
        assert!(!status_event("En campo", later).apply(&mut store));
    }

    #[test]
    fn stale_status_is_ignored() {
        let mut store = store();
        assert!(status_event("En campo", t0() + Duration::minutes(5)).apply(&mut store));
        assert!(!status_event("Disponible", t0() + Duration::minutes(1)).apply(&mut store));
        assert_eq!(store.caddie("c1").unwrap().status, CaddieStatus::InField);
    }

    #[test]
    fn unknown_caddie_update_is_ignored() {
        let mut store = store();
        let event = PushEvent::decode(
            UPDATED,
            json!({ "caddieId": "ghost", "name": "X", "status": "Ausente", "listNumber": 2, "timestamp": t0() }),
        )
        .unwrap();
        assert!(!event.apply(&mut store));
        assert!(store.caddie("ghost").is_none());
    }

    #[test]
    fn added_then_deleted() {
        let mut store = store();
        let added = PushEvent::decode(
            ADDED,
            json!({
                "caddieId": "c2", "name": "Ana", "listNumber": 2, "status": "Disponible",
                "createdAt": t0(), "updatedAt": t0()
            }),
        )
        .unwrap();
        assert!(added.apply(&mut store));
        assert_eq!(store.caddie("c2").unwrap().list_number, ListNumber::Two);

        let stale_delete = PushEvent::Deleted {
            caddie_id: "c2".into(),
            timestamp: t0() - Duration::minutes(1),
        };
        assert!(!stale_delete.apply(&mut store));

        let delete = PushEvent::from_line(&format!(
            r#"{{"event":"caddie:deleted","data":{{"caddieId":"c2","timestamp":"{}"}}}}"#,
            (t0() + Duration::minutes(1)).to_rfc3339()
        ))
        .unwrap();
        assert!(delete.apply(&mut store));
        assert!(store.caddie("c2").is_none());
    }

    #[test]
    fn unknown_event_name() {
        assert!(matches!(
            PushEvent::decode("turn:started", json!({})),
            Err(FeedError::UnknownEvent(name)) if name == "turn:started"
        ));
    }

    #[tokio::test]
    async fn read_events_skips_bad_lines() {
        let input = format!(
            "{}\nnot json\n\n{}\n",
            json!({ "event": STATUS_CHANGED, "data": { "caddieId": "c1", "status": "Ausente", "timestamp": t0() } }),
            json!({ "event": DELETED, "data": { "caddieId": "c1", "timestamp": t0() } }),
        );
        let mut rx = read_events(std::io::Cursor::new(input.into_bytes()));
        let first = rx.recv().await.unwrap();
        assert!(matches!(first, PushEvent::StatusChanged(ref u) if u.status == Some(CaddieStatus::Absent)));
        let second = rx.recv().await.unwrap();
        assert_eq!(second.caddie_id(), "c1");
        assert!(rx.recv().await.is_none());
    }
}
