//! Turn lifecycle: `Available -> InField -> Available`.
//!
//! The functions here only plan a transition against the current store; the
//! session stages the plan, writes it to the backend and settles it.
use chrono::{DateTime, Duration, Utc};
use uuid::Uuid;

use crate::error::CoreError;
use crate::model::{Caddie, CaddieStatus, Turn};
use crate::store::{Change, Store};

/// A caddie going out to work.
#[derive(Debug, Clone, PartialEq)]
pub struct TurnStart {
    pub caddie: Caddie,
    pub turn: Turn,
}

impl TurnStart {
    pub fn changes(&self) -> Vec<Change> {
        vec![
            Change::Caddie(self.caddie.clone()),
            Change::Turn(self.turn.clone()),
        ]
    }
}

/// A caddie returning: every open turn on their list is closed.
#[derive(Debug, Clone, PartialEq)]
pub struct TurnEnd {
    pub caddie: Caddie,
    pub closed: Vec<Turn>,
}

impl TurnEnd {
    pub fn changes(&self) -> Vec<Change> {
        let mut changes = vec![Change::Caddie(self.caddie.clone())];
        changes.extend(self.closed.iter().cloned().map(Change::Turn));
        changes
    }
}

pub fn provisional_id(prefix: &str) -> String {
    format!("local-{}-{}", prefix, Uuid::new_v4())
}

pub fn start(store: &Store, caddie_id: &str, now: DateTime<Utc>) -> Result<TurnStart, CoreError> {
    let caddie = store
        .caddie(caddie_id)
        .ok_or_else(|| CoreError::caddie_not_found(caddie_id))?;
    if caddie.status != CaddieStatus::Available {
        return Err(CoreError::InvalidStateTransition {
            caddie_id: caddie_id.to_string(),
            from: caddie.status,
            action: "start a turn",
        });
    }

    let turn = Turn {
        id: provisional_id("turn"),
        caddie_id: caddie.id.clone(),
        caddie_name: caddie.name.clone(),
        list_number: caddie.list_number,
        start_time: now,
        end_time: None,
        completed: false,
    };
    let caddie = Caddie {
        status: CaddieStatus::InField,
        updated_at: now,
        ..caddie.clone()
    };
    Ok(TurnStart { caddie, turn })
}

pub fn end(store: &Store, caddie_id: &str, now: DateTime<Utc>) -> Result<TurnEnd, CoreError> {
    let caddie = store
        .caddie(caddie_id)
        .ok_or_else(|| CoreError::caddie_not_found(caddie_id))?;
    if caddie.status != CaddieStatus::InField {
        return Err(CoreError::InvalidStateTransition {
            caddie_id: caddie_id.to_string(),
            from: caddie.status,
            action: "end a turn",
        });
    }

    let closed = store
        .open_turns(caddie_id, caddie.list_number)
        .map(|turn| Turn {
            // A turn never closes at or before its start.
            end_time: Some(now.max(turn.start_time + Duration::milliseconds(1))),
            completed: true,
            ..turn.clone()
        })
        .collect();
    let caddie = Caddie {
        status: CaddieStatus::Available,
        updated_at: now,
        ..caddie.clone()
    };
    Ok(TurnEnd { caddie, closed })
}
