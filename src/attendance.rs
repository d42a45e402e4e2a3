//! Attendance recording and the caddie status it implies.
use chrono::{DateTime, Utc};

use crate::error::CoreError;
use crate::model::{AttendanceRecord, AttendanceStatus, Caddie, CaddieStatus};
use crate::store::{Change, Store};
use crate::turns::provisional_id;

/// Status a caddie ends up in after an attendance mark.
///
/// Arriving late while already out on a turn pulls the caddie from rotation.
pub fn resulting_status(current: CaddieStatus, mark: AttendanceStatus) -> CaddieStatus {
    match (mark, current) {
        (AttendanceStatus::Absent, _) => CaddieStatus::Absent,
        (AttendanceStatus::Late, CaddieStatus::InField) => CaddieStatus::Absent,
        _ => CaddieStatus::Available,
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct AttendanceMark {
    pub record: AttendanceRecord,
    pub caddie: Caddie,
    pub previous_status: CaddieStatus,
}

impl AttendanceMark {
    pub fn status_changed(&self) -> bool {
        self.previous_status != self.caddie.status
    }

    pub fn changes(&self) -> Vec<Change> {
        let mut changes = Vec::with_capacity(2);
        if self.status_changed() {
            changes.push(Change::Caddie(self.caddie.clone()));
        }
        changes.push(Change::Attendance(self.record.clone()));
        changes
    }
}

/// Plan an attendance mark. Each call is a distinct event and yields a new record.
pub fn record(
    store: &Store,
    caddie_id: &str,
    mark: AttendanceStatus,
    now: DateTime<Utc>,
) -> Result<AttendanceMark, CoreError> {
    let caddie = store
        .caddie(caddie_id)
        .ok_or_else(|| CoreError::caddie_not_found(caddie_id))?;

    let record = AttendanceRecord {
        id: provisional_id("attendance"),
        caddie_id: caddie.id.clone(),
        caddie_name: caddie.name.clone(),
        list_number: caddie.list_number,
        date: now.date_naive(),
        status: mark,
        call_time: now,
        arrival_time: None,
        turns_count: u32::try_from(store.completed_turns(caddie_id)).unwrap_or(u32::MAX),
        end_time: None,
        created_at: now,
    };
    let next = resulting_status(caddie.status, mark);
    let updated = Caddie {
        status: next,
        updated_at: if next == caddie.status {
            caddie.updated_at
        } else {
            now
        },
        ..caddie.clone()
    };
    Ok(AttendanceMark {
        record,
        caddie: updated,
        previous_status: caddie.status,
    })
}
