//! Application state container.
//!
//! Entities live in ordered collections keyed by id. Insertion order is the
//! source order the queue projection works from. Every entity carries a version
//! timestamp; data arriving from the backend or the push feed only replaces a
//! local entity when it is strictly newer, so reconciliation does not depend on
//! arrival order.
//!
//! Local mutations go through [`Store::stage`], which returns a [`Staged`] undo
//! record. The caller then either [`Store::settle`]s it with the records the
//! backend confirmed or [`Store::rollback`]s it.
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};

use crate::model::{AttendanceRecord, Caddie, ListNumber, ListSettings, Turn};
use crate::queue;

pub trait Entity: Clone {
    fn id(&self) -> &str;
    fn version(&self) -> DateTime<Utc>;
}

impl Entity for Caddie {
    fn id(&self) -> &str {
        &self.id
    }

    fn version(&self) -> DateTime<Utc> {
        self.updated_at
    }
}

impl Entity for Turn {
    fn id(&self) -> &str {
        &self.id
    }

    fn version(&self) -> DateTime<Utc> {
        self.end_time.unwrap_or(self.start_time)
    }
}

impl Entity for AttendanceRecord {
    fn id(&self) -> &str {
        &self.id
    }

    fn version(&self) -> DateTime<Utc> {
        self.created_at
    }
}

/// Prior occupant of an id, captured so a staged change can be undone.
/// `staged` is the version written in its place, `None` for a removal.
#[derive(Debug, Clone)]
struct Slot<T> {
    id: String,
    prior: Option<(usize, T)>,
    staged: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone)]
pub struct Collection<T> {
    items: Vec<T>,
    index: HashMap<String, usize>,
}

impl<T> Default for Collection<T> {
    fn default() -> Self {
        Self {
            items: Vec::new(),
            index: HashMap::new(),
        }
    }
}

impl<T: Entity> Collection<T> {
    pub fn from_items(items: impl IntoIterator<Item = T>) -> Self {
        let mut collection = Self::default();
        for item in items {
            collection.put(item);
        }
        collection
    }

    pub fn get(&self, id: &str) -> Option<&T> {
        self.index.get(id).map(|&pos| &self.items[pos])
    }

    pub fn as_slice(&self) -> &[T] {
        &self.items
    }

    fn reindex(&mut self) {
        self.index = self
            .items
            .iter()
            .enumerate()
            .map(|(pos, item)| (item.id().to_string(), pos))
            .collect();
    }

    /// Replace in place, or append when the id is new.
    fn put(&mut self, item: T) -> Slot<T> {
        let id = item.id().to_string();
        let staged = Some(item.version());
        match self.index.get(&id) {
            Some(&pos) => {
                let prior = std::mem::replace(&mut self.items[pos], item);
                Slot {
                    id,
                    prior: Some((pos, prior)),
                    staged,
                }
            }
            None => {
                self.index.insert(id.clone(), self.items.len());
                self.items.push(item);
                Slot {
                    id,
                    prior: None,
                    staged,
                }
            }
        }
    }

    fn take(&mut self, id: &str) -> Slot<T> {
        match self.index.get(id).copied() {
            Some(pos) => {
                let prior = self.items.remove(pos);
                self.reindex();
                Slot {
                    id: id.to_string(),
                    prior: Some((pos, prior)),
                    staged: None,
                }
            }
            None => Slot {
                id: id.to_string(),
                prior: None,
                staged: None,
            },
        }
    }

    /// Undo a staged write. A record that moved past the staged version in the
    /// meantime (push or refresh) is left alone, as is one re-added after a removal.
    fn restore(&mut self, slot: Slot<T>) {
        if let Some(pos) = self.index.get(&slot.id).copied() {
            match slot.staged {
                Some(staged) if self.items[pos].version() <= staged => {}
                _ => return,
            }
            self.items.remove(pos);
        }
        if let Some((pos, prior)) = slot.prior {
            let pos = pos.min(self.items.len());
            self.items.insert(pos, prior);
        }
        self.reindex();
    }

    /// Insert unknown ids; replace known ones only with a strictly newer version.
    pub fn upsert_if_newer(&mut self, item: T) -> bool {
        match self.get(item.id()) {
            Some(local) if local.version() >= item.version() => false,
            _ => {
                self.put(item);
                true
            }
        }
    }

    /// Remove `id` unless the local record is newer than `at`.
    pub fn remove_unless_newer(&mut self, id: &str, at: DateTime<Utc>) -> bool {
        match self.get(id) {
            Some(local) if local.version() <= at => {
                self.take(id);
                true
            }
            _ => false,
        }
    }

    /// Adopt a full server listing: server order, newer version per id, and
    /// local entities in `keep` that the server does not know yet.
    fn merge(&mut self, incoming: Vec<T>, keep: &HashSet<String>) {
        let mut merged = Collection::<T>::default();
        for item in incoming {
            let newest = match self.get(item.id()) {
                Some(local) if local.version() > item.version() => local.clone(),
                _ => item,
            };
            match merged.get(newest.id()) {
                Some(seen) if seen.version() >= newest.version() => {}
                _ => {
                    merged.put(newest);
                }
            }
        }
        for local in &self.items {
            if keep.contains(local.id()) && merged.get(local.id()).is_none() {
                merged.put(local.clone());
            }
        }
        *self = merged;
    }
}

/// One speculative or confirmed mutation of the store.
#[derive(Debug, Clone, PartialEq)]
pub enum Change {
    Caddie(Caddie),
    RemoveCaddie(String),
    Turn(Turn),
    Attendance(AttendanceRecord),
    Settings(ListSettings),
}

#[derive(Debug)]
enum Undo {
    Caddie(Slot<Caddie>),
    Turn(Slot<Turn>),
    Attendance(Slot<AttendanceRecord>),
    Settings {
        list: ListNumber,
        prior: Option<ListSettings>,
        staged: DateTime<Utc>,
    },
}

/// Undo record for a staged change set.
#[derive(Debug)]
#[must_use = "a staged change must be settled or rolled back"]
pub struct Staged {
    undo: Vec<Undo>,
    provisional: Vec<String>,
}

impl Staged {
    /// Ids created locally that the backend has not confirmed yet.
    pub fn provisional(&self) -> &[String] {
        &self.provisional
    }
}

/// Full listing returned by a poll of the backend.
#[derive(Debug, Clone, Default)]
pub struct Refresh {
    pub caddies: Vec<Caddie>,
    pub turns: Vec<Turn>,
    pub attendance: Vec<AttendanceRecord>,
    pub settings: Vec<ListSettings>,
}

/// Serializable copy of the store, used by the local cache.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Snapshot {
    pub caddies: Vec<Caddie>,
    pub turns: Vec<Turn>,
    pub attendance: Vec<AttendanceRecord>,
    pub settings: Vec<ListSettings>,
}

#[derive(Debug, Clone, Default)]
pub struct Store {
    caddies: Collection<Caddie>,
    turns: Collection<Turn>,
    attendance: Collection<AttendanceRecord>,
    settings: BTreeMap<ListNumber, ListSettings>,
    pending: HashSet<String>,
}

impl Store {
    pub fn new(defaults: impl IntoIterator<Item = ListSettings>) -> Self {
        Self {
            settings: defaults.into_iter().map(|s| (s.list_number, s)).collect(),
            ..Default::default()
        }
    }

    pub fn from_snapshot(snapshot: Snapshot) -> Self {
        Self {
            caddies: Collection::from_items(snapshot.caddies),
            turns: Collection::from_items(snapshot.turns),
            attendance: Collection::from_items(snapshot.attendance),
            settings: snapshot
                .settings
                .into_iter()
                .map(|s| (s.list_number, s))
                .collect(),
            pending: HashSet::new(),
        }
    }

    pub fn snapshot(&self) -> Snapshot {
        Snapshot {
            caddies: self.caddies.as_slice().to_vec(),
            turns: self.turns.as_slice().to_vec(),
            attendance: self.attendance.as_slice().to_vec(),
            settings: self.settings.values().cloned().collect(),
        }
    }

    pub fn caddie(&self, id: &str) -> Option<&Caddie> {
        self.caddies.get(id)
    }

    pub fn caddies(&self) -> &[Caddie] {
        self.caddies.as_slice()
    }

    pub fn turns(&self) -> &[Turn] {
        self.turns.as_slice()
    }

    pub fn attendance(&self) -> &[AttendanceRecord] {
        self.attendance.as_slice()
    }

    pub fn settings(&self, list: ListNumber) -> Option<&ListSettings> {
        self.settings.get(&list)
    }

    pub fn all_settings(&self) -> impl Iterator<Item = &ListSettings> {
        self.settings.values()
    }

    pub fn queue(&self, list: ListNumber) -> Vec<&Caddie> {
        queue::project(list, self.caddies(), self.settings(list))
    }

    pub fn open_turns<'a>(
        &'a self,
        caddie_id: &'a str,
        list: ListNumber,
    ) -> impl Iterator<Item = &'a Turn> + 'a {
        self.turns()
            .iter()
            .filter(move |t| t.caddie_id == caddie_id && t.list_number == list && t.is_open())
    }

    pub fn completed_turns(&self, caddie_id: &str) -> usize {
        self.turns()
            .iter()
            .filter(|t| t.caddie_id == caddie_id && t.completed)
            .count()
    }

    pub fn is_pending(&self, id: &str) -> bool {
        self.pending.contains(id)
    }

    fn apply_unconditionally(&mut self, change: Change) -> Undo {
        match change {
            Change::Caddie(caddie) => Undo::Caddie(self.caddies.put(caddie)),
            Change::RemoveCaddie(id) => Undo::Caddie(self.caddies.take(&id)),
            Change::Turn(turn) => Undo::Turn(self.turns.put(turn)),
            Change::Attendance(record) => Undo::Attendance(self.attendance.put(record)),
            Change::Settings(settings) => {
                let list = settings.list_number;
                let staged = settings.updated_at;
                Undo::Settings {
                    list,
                    prior: self.settings.insert(list, settings),
                    staged,
                }
            }
        }
    }

    /// Apply a change set speculatively.
    pub fn stage(&mut self, changes: Vec<Change>) -> Staged {
        let mut staged = Staged {
            undo: Vec::with_capacity(changes.len()),
            provisional: Vec::new(),
        };
        for change in changes {
            let undo = self.apply_unconditionally(change);
            let created = match &undo {
                Undo::Caddie(slot) if slot.prior.is_none() => Some(slot.id.clone()),
                Undo::Turn(slot) if slot.prior.is_none() => Some(slot.id.clone()),
                Undo::Attendance(slot) if slot.prior.is_none() => Some(slot.id.clone()),
                _ => None,
            };
            if let Some(id) = created {
                self.pending.insert(id.clone());
                staged.provisional.push(id);
            }
            staged.undo.push(undo);
        }
        staged
    }

    /// Restore every entity a staged change set touched.
    pub fn rollback(&mut self, staged: Staged) {
        for id in &staged.provisional {
            self.pending.remove(id);
        }
        for undo in staged.undo.into_iter().rev() {
            match undo {
                Undo::Caddie(slot) => self.caddies.restore(slot),
                Undo::Turn(slot) => self.turns.restore(slot),
                Undo::Attendance(slot) => self.attendance.restore(slot),
                Undo::Settings {
                    list,
                    prior,
                    staged,
                } => {
                    if self
                        .settings
                        .get(&list)
                        .is_some_and(|current| current.updated_at > staged)
                    {
                        continue;
                    }
                    match prior {
                        Some(settings) => {
                            self.settings.insert(list, settings);
                        }
                        None => {
                            self.settings.remove(&list);
                        }
                    }
                }
            }
        }
    }

    /// Replace a staged change set with the records the backend confirmed.
    pub fn settle(&mut self, staged: Staged, confirmed: Vec<Change>) {
        self.rollback(staged);
        for change in confirmed {
            let _ = self.apply_unconditionally(change);
        }
    }

    /// Apply a confirmed change with no speculative phase.
    pub fn apply(&mut self, change: Change) {
        let _ = self.apply_unconditionally(change);
    }

    pub fn upsert_caddie(&mut self, caddie: Caddie) -> bool {
        self.caddies.upsert_if_newer(caddie)
    }

    pub fn remove_caddie(&mut self, id: &str, at: DateTime<Utc>) -> bool {
        self.caddies.remove_unless_newer(id, at)
    }

    pub fn upsert_settings(&mut self, settings: ListSettings) -> bool {
        match self.settings.get(&settings.list_number) {
            Some(local) if local.updated_at >= settings.updated_at => false,
            _ => {
                self.settings.insert(settings.list_number, settings);
                true
            }
        }
    }

    /// Reconcile with a full listing from the backend.
    pub fn merge(&mut self, refresh: Refresh) {
        let keep = self.pending.clone();
        self.caddies.merge(refresh.caddies, &keep);
        self.turns.merge(refresh.turns, &keep);
        self.attendance.merge(refresh.attendance, &keep);
        for settings in refresh.settings {
            self.upsert_settings(settings);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{CaddieStatus, ListOrder};
    use chrono::{Duration, TimeZone};

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, 6, 0, 0).unwrap()
    }

    fn caddie(id: &str, status: CaddieStatus, minutes: i64) -> Caddie {
        Caddie {
            id: id.into(),
            name: id.to_uppercase(),
            list_number: ListNumber::One,
            status,
            phone_number: None,
            created_at: t0(),
            updated_at: t0() + Duration::minutes(minutes),
        }
    }

    fn store_with(caddies: Vec<Caddie>) -> Store {
        let mut store = Store::new(
            ListNumber::ALL
                .iter()
                .map(|&l| ListSettings::initial(l, "06:00")),
        );
        for c in caddies {
            store.apply(Change::Caddie(c));
        }
        store
    }

    fn ids(store: &Store) -> Vec<&str> {
        store.caddies().iter().map(|c| c.id.as_str()).collect()
    }

    #[test]
    fn upsert_only_accepts_strictly_newer() {
        let mut store = store_with(vec![caddie("a", CaddieStatus::Available, 10)]);
        assert!(!store.upsert_caddie(caddie("a", CaddieStatus::InField, 10)));
        assert!(!store.upsert_caddie(caddie("a", CaddieStatus::InField, 5)));
        assert_eq!(store.caddie("a").unwrap().status, CaddieStatus::Available);
        assert!(store.upsert_caddie(caddie("a", CaddieStatus::InField, 11)));
        assert_eq!(store.caddie("a").unwrap().status, CaddieStatus::InField);
    }

    #[test]
    fn rollback_restores_values_and_positions() {
        let mut store = store_with(vec![
            caddie("a", CaddieStatus::Available, 0),
            caddie("b", CaddieStatus::Available, 0),
            caddie("c", CaddieStatus::Available, 0),
        ]);
        let before = store.snapshot();
        let staged = store.stage(vec![
            Change::RemoveCaddie("b".into()),
            Change::Caddie(caddie("a", CaddieStatus::Absent, 1)),
            Change::Caddie(caddie("d", CaddieStatus::Available, 1)),
        ]);
        assert_eq!(ids(&store), vec!["a", "c", "d"]);
        assert!(store.is_pending("d"));
        store.rollback(staged);
        assert_eq!(store.snapshot(), before);
        assert!(!store.is_pending("d"));
    }

    #[test]
    fn rollback_keeps_records_that_moved_on() {
        let mut store = store_with(vec![
            caddie("a", CaddieStatus::Available, 0),
            caddie("b", CaddieStatus::Available, 0),
        ]);
        let staged = store.stage(vec![
            Change::Caddie(caddie("a", CaddieStatus::InField, 1)),
            Change::Caddie(caddie("b", CaddieStatus::InField, 1)),
        ]);
        // A push lands for "a" while the write is in flight.
        assert!(store.upsert_caddie(caddie("a", CaddieStatus::Absent, 2)));
        store.rollback(staged);

        let a = store.caddie("a").unwrap();
        assert_eq!(a.status, CaddieStatus::Absent);
        assert_eq!(a.updated_at, t0() + Duration::minutes(2));
        assert_eq!(store.caddie("b").unwrap().status, CaddieStatus::Available);
        assert_eq!(ids(&store), vec!["a", "b"]);
    }

    #[test]
    fn rollback_keeps_newer_settings() {
        let mut store = store_with(vec![]);
        let mut planned = store.settings(ListNumber::One).unwrap().clone();
        planned.order = ListOrder::Descending;
        planned.updated_at = t0();
        let staged = store.stage(vec![Change::Settings(planned.clone())]);

        let mut pushed = planned;
        pushed.call_time = "07:15".into();
        pushed.updated_at = t0() + Duration::minutes(1);
        assert!(store.upsert_settings(pushed));
        store.rollback(staged);
        assert_eq!(store.settings(ListNumber::One).unwrap().call_time, "07:15");
    }

    #[test]
    fn settle_swaps_provisional_for_confirmed() {
        let mut store = store_with(vec![caddie("a", CaddieStatus::Available, 0)]);
        let local_turn = Turn {
            id: "local-1".into(),
            caddie_id: "a".into(),
            caddie_name: "A".into(),
            list_number: ListNumber::One,
            start_time: t0(),
            end_time: None,
            completed: false,
        };
        let staged = store.stage(vec![
            Change::Caddie(caddie("a", CaddieStatus::InField, 1)),
            Change::Turn(local_turn.clone()),
        ]);
        assert_eq!(staged.provisional().to_vec(), vec!["local-1".to_string()]);

        let server_turn = Turn {
            id: "t-77".into(),
            ..local_turn
        };
        store.settle(
            staged,
            vec![
                Change::Caddie(caddie("a", CaddieStatus::InField, 2)),
                Change::Turn(server_turn),
            ],
        );
        assert_eq!(store.turns().len(), 1);
        assert_eq!(store.turns()[0].id, "t-77");
        assert_eq!(store.caddie("a").unwrap().status, CaddieStatus::InField);
        assert!(!store.is_pending("local-1"));
    }

    #[test]
    fn merge_follows_server_order_and_keeps_newer_local() {
        let mut store = store_with(vec![
            caddie("a", CaddieStatus::InField, 30),
            caddie("b", CaddieStatus::Available, 0),
            caddie("gone", CaddieStatus::Available, 0),
        ]);
        let _staged = store.stage(vec![Change::Caddie(caddie(
            "new",
            CaddieStatus::Available,
            0,
        ))]);
        store.merge(Refresh {
            caddies: vec![
                caddie("b", CaddieStatus::Available, 1),
                caddie("a", CaddieStatus::Available, 20),
                caddie("c", CaddieStatus::Available, 0),
            ],
            ..Default::default()
        });
        assert_eq!(ids(&store), vec!["b", "a", "c", "new"]);
        assert_eq!(store.caddie("a").unwrap().status, CaddieStatus::InField);
    }

    #[test]
    fn merge_settings_by_version() {
        let mut store = store_with(vec![]);
        let mut incoming = ListSettings::initial(ListNumber::Two, "08:00");
        incoming.order = ListOrder::Descending;
        incoming.updated_at = t0();
        store.merge(Refresh {
            settings: vec![incoming.clone()],
            ..Default::default()
        });
        assert_eq!(
            store.settings(ListNumber::Two).unwrap().order,
            ListOrder::Descending
        );

        let mut stale = incoming;
        stale.order = ListOrder::Ascending;
        assert!(!store.upsert_settings(stale));
    }

    #[test]
    fn remove_respects_newer_local_record() {
        let mut store = store_with(vec![caddie("a", CaddieStatus::Available, 10)]);
        assert!(!store.remove_caddie("a", t0()));
        assert!(store.remove_caddie("a", t0() + Duration::minutes(10)));
        assert!(store.caddie("a").is_none());
        assert!(!store.remove_caddie("a", t0()));
    }

    #[test]
    fn snapshot_round_trips_order() {
        let store = store_with(vec![
            caddie("z", CaddieStatus::Available, 0),
            caddie("a", CaddieStatus::Absent, 0),
        ]);
        let restored = Store::from_snapshot(store.snapshot());
        assert_eq!(ids(&restored), vec!["z", "a"]);
        assert_eq!(restored.all_settings().count(), 3);
    }
}
