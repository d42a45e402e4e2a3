//! The state synchronization shell.
//!
//! A [`Session`] owns the store, the backend and an optional local cache. Every
//! mutation follows the same shape: plan against the store and stage the plan
//! under the lock, release the lock for the backend calls, then settle with the
//! confirmed records or roll back. The store lock is never held across a
//! network await.
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use chrono::Utc;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::{self, MissedTickBehavior};
use tracing::{debug, info, instrument, warn};

use crate::api::model::{CreateAttendance, CreateCaddie, CreateTurn, UpdateCaddie, UpdateTurn};
use crate::api::{Backend, BackendError};
use crate::attendance::{self, AttendanceMark};
use crate::cache::{self, Pool};
use crate::error::CoreError;
use crate::feed::PushEvent;
use crate::messaging;
use crate::model::{
    AttendanceRecord, AttendanceStatus, Caddie, CaddieStatus, ListNumber, ListOrder,
    ListSettings, Turn,
};
use crate::queue;
use crate::settings;
use crate::store::{Change, Refresh, Snapshot, Store};
use crate::turns::{self, TurnEnd, TurnStart};
use crate::validation;

/// Number of waiting caddies shown on a board.
pub const UP_NEXT: usize = 3;

/// What a list's turn screen shows.
#[derive(Debug, Clone, PartialEq)]
pub struct Board {
    pub list: ListNumber,
    pub current: Option<Caddie>,
    pub next: Vec<Caddie>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewCaddie {
    pub name: String,
    pub list_number: ListNumber,
    pub phone_number: Option<String>,
}

/// Roster edit; `None` leaves a field unchanged.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CaddieEdit {
    pub name: Option<String>,
    pub list_number: Option<ListNumber>,
    pub phone_number: Option<String>,
}

pub struct Session<B> {
    backend: B,
    store: Mutex<Store>,
    defaults: Vec<ListSettings>,
    cache: Option<Pool>,
}

impl<B: Backend> Session<B> {
    pub fn new(backend: B, defaults: Vec<ListSettings>) -> Self {
        Self {
            backend,
            store: Mutex::new(Store::new(defaults.clone())),
            defaults,
            cache: None,
        }
    }

    /// Start from the cached snapshot when there is one.
    pub async fn restore(backend: B, defaults: Vec<ListSettings>, pool: Pool) -> Result<Self> {
        let store = match cache::load_snapshot(&pool).await? {
            Some(snapshot) => {
                info!(caddies = snapshot.caddies.len(), "restored cached state");
                let mut store = Store::from_snapshot(snapshot);
                // Lists the cache never saw still get their defaults.
                for default in &defaults {
                    if store.settings(default.list_number).is_none() {
                        store.apply(Change::Settings(default.clone()));
                    }
                }
                store
            }
            None => Store::new(defaults.clone()),
        };
        Ok(Self {
            backend,
            store: Mutex::new(store),
            defaults,
            cache: Some(pool),
        })
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub async fn snapshot(&self) -> Snapshot {
        self.store.lock().await.snapshot()
    }

    async fn persist(&self) {
        let Some(pool) = &self.cache else {
            return;
        };
        let snapshot = self.store.lock().await.snapshot();
        if let Err(err) = cache::save_snapshot(pool, &snapshot).await {
            warn!(?err, "failed to cache session state");
        }
    }

    /// Pull every collection from the backend and reconcile.
    #[instrument(skip_all)]
    pub async fn refresh(&self) -> Result<(), CoreError> {
        let (caddies, turns, attendance, settings) = futures::try_join!(
            self.backend.list_caddies(),
            self.backend.list_turns(),
            self.backend.list_attendance(),
            self.backend.list_settings(),
        )?;
        debug!(
            caddies = caddies.len(),
            turns = turns.len(),
            attendance = attendance.len(),
            "refreshed from backend"
        );
        self.store.lock().await.merge(Refresh {
            caddies,
            turns,
            attendance,
            settings,
        });
        self.persist().await;
        Ok(())
    }

    /// Apply a push update. Returns whether it changed anything.
    pub async fn apply_event(&self, event: PushEvent) -> bool {
        let applied = event.apply(&mut *self.store.lock().await);
        if applied {
            self.persist().await;
        }
        applied
    }

    pub async fn queue(&self, list: ListNumber) -> Vec<Caddie> {
        let store = self.store.lock().await;
        store.queue(list).into_iter().cloned().collect()
    }

    pub async fn board(&self, list: ListNumber) -> Board {
        let store = self.store.lock().await;
        let queue = store.queue(list);
        Board {
            list,
            current: queue::current_turn(&queue).cloned(),
            next: queue::up_next(&queue, UP_NEXT)
                .into_iter()
                .cloned()
                .collect(),
        }
    }

    pub async fn settings(&self, list: ListNumber) -> Option<ListSettings> {
        self.store.lock().await.settings(list).cloned()
    }

    pub async fn announcement(&self, list: ListNumber) -> String {
        let store = self.store.lock().await;
        messaging::announcement(list, &store.queue(list))
    }

    /// Write a caddie status back after a failed follow-up call.
    async fn compensate(&self, caddie_id: &str, status: CaddieStatus) {
        if let Err(err) = self
            .backend
            .update_caddie(caddie_id, &UpdateCaddie::status(status))
            .await
        {
            warn!(caddie_id, %status, ?err, "failed to restore caddie status");
        }
    }

    /// Caddie status first, then the turn. A failed turn write puts the
    /// status back.
    async fn write_turn_start(&self, plan: &TurnStart) -> Result<(Caddie, Turn), BackendError> {
        let caddie_id = plan.caddie.id.as_str();
        let caddie = self
            .backend
            .update_caddie(caddie_id, &UpdateCaddie::status(CaddieStatus::InField))
            .await?;
        let created = self
            .backend
            .create_turn(&CreateTurn {
                caddie_id: plan.turn.caddie_id.clone(),
                caddie_name: plan.turn.caddie_name.clone(),
                list_number: plan.turn.list_number,
            })
            .await;
        match created {
            Ok(turn) => Ok((caddie, turn)),
            Err(err) => {
                self.compensate(caddie_id, CaddieStatus::Available).await;
                Err(err)
            }
        }
    }

    /// Close the turns, then free the caddie. On failure every turn already
    /// closed is reopened.
    async fn write_turn_end(
        &self,
        caddie_id: &str,
        plan: &TurnEnd,
    ) -> Result<(Caddie, Vec<Turn>), BackendError> {
        let mut closed = Vec::with_capacity(plan.closed.len());
        let mut failure = None;
        for turn in &plan.closed {
            let patch = UpdateTurn::close(turn.end_time.unwrap_or_else(Utc::now));
            match self.backend.update_turn(&turn.id, &patch).await {
                Ok(turn) => closed.push(turn),
                Err(err) => {
                    failure = Some(err);
                    break;
                }
            }
        }
        let err = match failure {
            Some(err) => err,
            None => match self
                .backend
                .update_caddie(caddie_id, &UpdateCaddie::status(CaddieStatus::Available))
                .await
            {
                Ok(caddie) => return Ok((caddie, closed)),
                Err(err) => err,
            },
        };
        for turn in &closed {
            if let Err(reopen) = self
                .backend
                .update_turn(&turn.id, &UpdateTurn::reopen())
                .await
            {
                warn!(caddie_id, turn_id = %turn.id, err = ?reopen, "failed to reopen turn");
            }
        }
        Err(err)
    }

    /// Status change (if any) first, then the attendance record.
    async fn write_attendance(
        &self,
        plan: &AttendanceMark,
    ) -> Result<(Option<Caddie>, AttendanceRecord), BackendError> {
        let caddie_id = plan.caddie.id.as_str();
        let caddie = if plan.status_changed() {
            Some(
                self.backend
                    .update_caddie(caddie_id, &UpdateCaddie::status(plan.caddie.status))
                    .await?,
            )
        } else {
            None
        };
        let created = self
            .backend
            .create_attendance(&CreateAttendance {
                caddie_id: plan.record.caddie_id.clone(),
                caddie_name: plan.record.caddie_name.clone(),
                list_number: plan.record.list_number,
                date: plan.record.date,
                status: plan.record.status,
            })
            .await;
        match created {
            Ok(record) => Ok((caddie, record)),
            Err(err) => {
                if caddie.is_some() {
                    self.compensate(caddie_id, plan.previous_status).await;
                }
                Err(err)
            }
        }
    }

    #[instrument(skip(self))]
    pub async fn start_turn(&self, caddie_id: &str) -> Result<Turn, CoreError> {
        let (plan, staged) = {
            let mut store = self.store.lock().await;
            let plan = turns::start(&store, caddie_id, Utc::now())?;
            let staged = store.stage(plan.changes());
            (plan, staged)
        };

        let result = self.write_turn_start(&plan).await;

        let mut store = self.store.lock().await;
        match result {
            Ok((caddie, turn)) => {
                store.settle(staged, vec![Change::Caddie(caddie), Change::Turn(turn.clone())]);
                drop(store);
                info!(caddie_id, turn_id = %turn.id, "turn started");
                self.persist().await;
                Ok(turn)
            }
            Err(err) => {
                store.rollback(staged);
                Err(err.into())
            }
        }
    }

    /// Close every open turn of the caddie on their list and make them available.
    #[instrument(skip(self))]
    pub async fn end_turn(&self, caddie_id: &str) -> Result<Vec<Turn>, CoreError> {
        let (plan, staged) = {
            let mut store = self.store.lock().await;
            let plan = turns::end(&store, caddie_id, Utc::now())?;
            if plan.closed.iter().any(|t| store.is_pending(&t.id)) {
                return Err(CoreError::InvalidStateTransition {
                    caddie_id: caddie_id.to_string(),
                    from: CaddieStatus::InField,
                    action: "end a turn that is still starting",
                });
            }
            let staged = store.stage(plan.changes());
            (plan, staged)
        };

        let result = self.write_turn_end(caddie_id, &plan).await;

        let mut store = self.store.lock().await;
        match result {
            Ok((caddie, closed)) => {
                let mut confirmed = vec![Change::Caddie(caddie)];
                confirmed.extend(closed.iter().cloned().map(Change::Turn));
                store.settle(staged, confirmed);
                drop(store);
                info!(caddie_id, closed = closed.len(), "turn ended");
                self.persist().await;
                Ok(closed)
            }
            Err(err) => {
                store.rollback(staged);
                Err(err.into())
            }
        }
    }

    #[instrument(skip(self))]
    pub async fn record_attendance(
        &self,
        caddie_id: &str,
        mark: AttendanceStatus,
    ) -> Result<AttendanceRecord, CoreError> {
        let (plan, staged) = {
            let mut store = self.store.lock().await;
            let plan = attendance::record(&store, caddie_id, mark, Utc::now())?;
            let staged = store.stage(plan.changes());
            (plan, staged)
        };

        let result = self.write_attendance(&plan).await;

        let mut store = self.store.lock().await;
        match result {
            Ok((caddie, record)) => {
                let mut confirmed: Vec<Change> = caddie.into_iter().map(Change::Caddie).collect();
                confirmed.push(Change::Attendance(record.clone()));
                store.settle(staged, confirmed);
                drop(store);
                info!(caddie_id, status = %record.status, "attendance recorded");
                self.persist().await;
                Ok(record)
            }
            Err(err) => {
                store.rollback(staged);
                Err(err.into())
            }
        }
    }

    async fn require_admin(&self) -> Result<(), CoreError> {
        if self.backend.is_admin().await? {
            Ok(())
        } else {
            Err(CoreError::Unauthorized)
        }
    }

    /// Stage a settings change, write it with `write`, and settle.
    async fn change_settings<F, Fut>(
        &self,
        planned: ListSettings,
        write: F,
    ) -> Result<ListSettings, CoreError>
    where
        F: FnOnce(ListSettings) -> Fut,
        Fut: std::future::Future<Output = Result<ListSettings, BackendError>>,
    {
        let staged = self
            .store
            .lock()
            .await
            .stage(vec![Change::Settings(planned.clone())]);
        let result = write(planned).await;
        let mut store = self.store.lock().await;
        match result {
            Ok(confirmed) => {
                store.settle(staged, vec![Change::Settings(confirmed.clone())]);
                drop(store);
                self.persist().await;
                Ok(confirmed)
            }
            Err(err) => {
                store.rollback(staged);
                Err(err.into())
            }
        }
    }

    #[instrument(skip(self))]
    pub async fn set_order(
        &self,
        list: ListNumber,
        order: ListOrder,
    ) -> Result<ListSettings, CoreError> {
        self.require_admin().await?;
        let planned = settings::set_order(&*self.store.lock().await, list, order, Utc::now());
        self.change_settings(planned, |s| async move {
            self.backend.update_order(list, s.order).await
        })
        .await
    }

    /// Set or clear the positional window. A single missing bound clears both.
    #[instrument(skip(self))]
    pub async fn set_range(
        &self,
        list: ListNumber,
        start: Option<u32>,
        end: Option<u32>,
    ) -> Result<ListSettings, CoreError> {
        start.map(validation::range_bound).transpose()?;
        end.map(validation::range_bound).transpose()?;
        self.require_admin().await?;
        let planned =
            settings::set_range(&*self.store.lock().await, list, start, end, Utc::now())?;
        self.change_settings(planned, |s| async move {
            self.backend
                .update_range(list, s.range_start, s.range_end)
                .await
        })
        .await
    }

    #[instrument(skip(self))]
    pub async fn set_call_time(
        &self,
        list: ListNumber,
        call_time: &str,
    ) -> Result<ListSettings, CoreError> {
        validation::call_time(call_time)?;
        self.require_admin().await?;
        let planned =
            settings::set_call_time(&*self.store.lock().await, list, call_time, Utc::now())?;
        self.change_settings(planned, |s| async move {
            self.backend.update_call_time(list, &s.call_time).await
        })
        .await
    }

    #[instrument(skip_all)]
    pub async fn add_caddie(&self, new: NewCaddie) -> Result<Caddie, CoreError> {
        validation::name(&new.name)?;
        if let Some(phone) = &new.phone_number {
            validation::phone(phone)?;
        }
        self.require_admin().await?;

        let now = Utc::now();
        let provisional = Caddie {
            id: turns::provisional_id("caddie"),
            name: new.name.clone(),
            list_number: new.list_number,
            status: CaddieStatus::Available,
            phone_number: new.phone_number.clone(),
            created_at: now,
            updated_at: now,
        };
        let staged = self
            .store
            .lock()
            .await
            .stage(vec![Change::Caddie(provisional)]);

        let result = self
            .backend
            .create_caddie(&CreateCaddie {
                name: new.name,
                list_number: new.list_number,
                phone_number: new.phone_number,
                status: Some(CaddieStatus::Available),
            })
            .await;

        let mut store = self.store.lock().await;
        match result {
            Ok(caddie) => {
                store.settle(staged, vec![Change::Caddie(caddie.clone())]);
                drop(store);
                info!(caddie_id = %caddie.id, list = %caddie.list_number, "caddie added");
                self.persist().await;
                Ok(caddie)
            }
            Err(err) => {
                store.rollback(staged);
                Err(err.into())
            }
        }
    }

    #[instrument(skip(self, edit))]
    pub async fn edit_caddie(&self, caddie_id: &str, edit: CaddieEdit) -> Result<Caddie, CoreError> {
        if let Some(name) = &edit.name {
            validation::name(name)?;
        }
        if let Some(phone) = &edit.phone_number {
            validation::phone(phone)?;
        }
        self.require_admin().await?;

        let staged = {
            let mut store = self.store.lock().await;
            let current = store
                .caddie(caddie_id)
                .ok_or_else(|| CoreError::caddie_not_found(caddie_id))?;
            let updated = Caddie {
                name: edit.name.clone().unwrap_or_else(|| current.name.clone()),
                list_number: edit.list_number.unwrap_or(current.list_number),
                phone_number: edit
                    .phone_number
                    .clone()
                    .or_else(|| current.phone_number.clone()),
                updated_at: Utc::now(),
                ..current.clone()
            };
            store.stage(vec![Change::Caddie(updated)])
        };

        let patch = UpdateCaddie {
            name: edit.name,
            list_number: edit.list_number,
            status: None,
            phone_number: edit.phone_number,
        };
        let result = self.backend.update_caddie(caddie_id, &patch).await;

        let mut store = self.store.lock().await;
        match result {
            Ok(caddie) => {
                store.settle(staged, vec![Change::Caddie(caddie.clone())]);
                drop(store);
                self.persist().await;
                Ok(caddie)
            }
            Err(err) => {
                store.rollback(staged);
                Err(err.into())
            }
        }
    }

    #[instrument(skip(self))]
    pub async fn delete_caddie(&self, caddie_id: &str) -> Result<(), CoreError> {
        self.require_admin().await?;
        let staged = {
            let mut store = self.store.lock().await;
            if store.caddie(caddie_id).is_none() {
                return Err(CoreError::caddie_not_found(caddie_id));
            }
            store.stage(vec![Change::RemoveCaddie(caddie_id.to_string())])
        };

        let result = self.backend.delete_caddie(caddie_id).await;

        let mut store = self.store.lock().await;
        match result {
            Ok(()) => {
                store.settle(staged, vec![Change::RemoveCaddie(caddie_id.to_string())]);
                drop(store);
                info!(caddie_id, "caddie deleted");
                self.persist().await;
                Ok(())
            }
            Err(err) => {
                store.rollback(staged);
                Err(err.into())
            }
        }
    }

    /// Forget all local state and the cached token.
    #[instrument(skip_all)]
    pub async fn sign_out(&self) -> Result<()> {
        *self.store.lock().await = Store::new(self.defaults.clone());
        if let Some(pool) = &self.cache {
            cache::clear(pool).await?;
        }
        info!("signed out");
        Ok(())
    }
}

/// Refresh `session` every `every` until the task is aborted. Failures are
/// logged and retried on the next tick.
pub fn spawn_poll_loop<B>(session: Arc<Session<B>>, every: Duration) -> JoinHandle<()>
where
    B: Backend + 'static,
{
    tokio::spawn(async move {
        let mut ticker = time::interval(every);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            if let Err(err) = session.refresh().await {
                warn!(%err, "poll failed");
            }
        }
    })
}
