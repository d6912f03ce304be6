//! The alarm store: authoritative device state, optimistic overlays,
//! and multi-frame list-transfer tracking.
//!
//! Two lists are kept. The authoritative list mirrors what the device
//! has reported; the optimistic list is a locally edited copy shown to
//! the UI while a mutation is in flight. Device records always merge
//! into the authoritative list, and a refresh or a revert switches the
//! presented view back to it.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Local};
use tokio::sync::watch;
use tracing::debug;
use wakelink_ble::AlarmTarget;

use crate::model::{Alarm, NewAlarm, DEFAULT_VIBRATION_STRENGTH};
use crate::schedule;

// ── Internal state ──────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ActiveView {
    Authoritative,
    Optimistic,
}

#[derive(Debug)]
struct PendingTransfer {
    expected: usize,
    seen: HashSet<u32>,
}

#[derive(Debug)]
struct StoreState {
    authoritative: Vec<Alarm>,
    optimistic: Vec<Alarm>,
    active: ActiveView,
    pending: Option<PendingTransfer>,
    /// Bumped whenever a transfer starts or a refresh begins, so a
    /// stale timeout cannot cancel a newer transfer.
    transfer_gen: u64,
}

impl StoreState {
    fn active_list(&self) -> &Vec<Alarm> {
        match self.active {
            ActiveView::Authoritative => &self.authoritative,
            ActiveView::Optimistic => &self.optimistic,
        }
    }
}

// ── Store ───────────────────────────────────────────────────────────

/// Shared alarm state. Cheap to share behind an `Arc`; all mutation
/// goes through short critical sections and publishes snapshots via
/// watch channels.
#[derive(Debug)]
pub struct AlarmStore {
    state: Mutex<StoreState>,
    snapshot: watch::Sender<Arc<Vec<Alarm>>>,
    loading: watch::Sender<bool>,
}

impl Default for AlarmStore {
    fn default() -> Self {
        Self::new()
    }
}

impl AlarmStore {
    pub fn new() -> Self {
        let (snapshot, _) = watch::channel(Arc::new(Vec::new()));
        let (loading, _) = watch::channel(false);
        Self {
            state: Mutex::new(StoreState {
                authoritative: Vec::new(),
                optimistic: Vec::new(),
                active: ActiveView::Authoritative,
                pending: None,
                transfer_gen: 0,
            }),
            snapshot,
            loading,
        }
    }

    // ── Read side ───────────────────────────────────────────────────

    /// Current snapshot of the presented alarm list, ordered by device
    /// index.
    pub fn snapshot(&self) -> Arc<Vec<Alarm>> {
        self.snapshot.borrow().clone()
    }

    /// Watch receiver for snapshot updates.
    pub fn subscribe(&self) -> watch::Receiver<Arc<Vec<Alarm>>> {
        self.snapshot.subscribe()
    }

    /// Whether a user-initiated list refresh is outstanding.
    pub fn is_loading(&self) -> bool {
        *self.loading.borrow()
    }

    /// Watch receiver for the loading flag.
    pub fn subscribe_loading(&self) -> watch::Receiver<bool> {
        self.loading.subscribe()
    }

    /// The presented list re-sorted by trigger time of day. Equal times
    /// keep their index order.
    pub fn chronological(&self) -> Vec<Alarm> {
        let mut alarms: Vec<Alarm> = self.snapshot().as_ref().clone();
        alarms.sort_by_key(Alarm::minutes_of_day);
        alarms
    }

    // ── Transfers and merging ───────────────────────────────────────

    /// A list transfer was announced. Returns the transfer generation
    /// for the caller's watchdog. A zero-count announcement completes
    /// immediately.
    pub(crate) fn list_started(&self, count: usize) -> u64 {
        let mut state = self.lock();
        state.transfer_gen += 1;
        if count == 0 {
            state.pending = None;
            self.set_loading(false);
        } else {
            state.pending = Some(PendingTransfer {
                expected: count,
                seen: HashSet::new(),
            });
        }
        state.transfer_gen
    }

    /// Merge one device record into the authoritative list, upserting
    /// by index. Replays of the same index are harmless.
    pub(crate) fn record(&self, alarm: Alarm) {
        let mut state = self.lock();
        let index = alarm.index;
        match state.authoritative.iter().position(|a| a.index == index) {
            Some(pos) => state.authoritative[pos] = alarm,
            None => {
                state.authoritative.push(alarm);
                state.authoritative.sort_by_key(|a| a.index);
            }
        }
        let mut completed = false;
        if let Some(pending) = &mut state.pending {
            pending.seen.insert(index);
            completed = pending.seen.len() >= pending.expected;
        }
        if completed {
            state.pending = None;
            self.set_loading(false);
        }
        self.publish(&state);
    }

    /// The device reported it holds no alarms.
    pub(crate) fn cleared(&self) {
        let mut state = self.lock();
        state.authoritative.clear();
        state.pending = None;
        self.set_loading(false);
        self.publish(&state);
    }

    /// A user-initiated refresh is starting: discard any overlay, show
    /// the authoritative list, and raise the loading flag.
    pub(crate) fn begin_refresh(&self) -> u64 {
        let mut state = self.lock();
        state.active = ActiveView::Authoritative;
        state.optimistic.clear();
        state.pending = None;
        state.transfer_gen += 1;
        self.set_loading(true);
        self.publish(&state);
        state.transfer_gen
    }

    /// A transfer watchdog fired. Only acts when `generation` is still
    /// the live transfer; whatever records arrived stay merged. Returns
    /// `true` if an incomplete transfer was closed out.
    pub(crate) fn transfer_timed_out(&self, generation: u64) -> bool {
        let mut state = self.lock();
        if state.transfer_gen != generation {
            return false;
        }
        let was_pending = state.pending.take().is_some();
        let was_loading = self.set_loading(false);
        if was_pending || was_loading {
            debug!(generation, "list transfer timed out, keeping partial results");
        }
        was_pending || was_loading
    }

    /// Connection lost: forget everything.
    pub(crate) fn clear_all(&self) {
        let mut state = self.lock();
        state.authoritative.clear();
        state.optimistic.clear();
        state.active = ActiveView::Authoritative;
        state.pending = None;
        self.set_loading(false);
        self.publish(&state);
    }

    // ── Optimistic mutations ────────────────────────────────────────

    /// Speculatively add an alarm and present it. Returns the index the
    /// new alarm is expected to land on.
    pub(crate) fn speculate_add(&self, request: &NewAlarm, now: &DateTime<Local>) -> u32 {
        let mut state = self.lock();
        let mut list = state.active_list().clone();
        let index = list.iter().map(|a| a.index).max().map_or(0, |max| max + 1);
        let name = request
            .name
            .clone()
            .unwrap_or_else(|| format!("Alarm {index}"));
        let mut alarm = Alarm {
            index,
            name,
            hour: request.hour,
            minute: request.minute,
            enabled: true,
            recurring: request.recurring,
            days: request.days.clone(),
            vibration_strength: Some(
                request
                    .vibration_strength
                    .unwrap_or(DEFAULT_VIBRATION_STRENGTH),
            ),
            time_until: String::new(),
        };
        alarm.time_until = schedule::time_until_label(&alarm, now);
        list.push(alarm);
        list.sort_by_key(|a| a.index);
        state.optimistic = list;
        state.active = ActiveView::Optimistic;
        self.publish(&state);
        index
    }

    /// Speculatively remove the targeted alarm. Returns the removed
    /// alarm, or `None` when no presented alarm matches.
    pub(crate) fn speculate_remove(&self, target: &AlarmTarget) -> Option<Alarm> {
        let mut state = self.lock();
        let mut list = state.active_list().clone();
        let pos = position(&list, target)?;
        let removed = list.remove(pos);
        state.optimistic = list;
        state.active = ActiveView::Optimistic;
        self.publish(&state);
        Some(removed)
    }

    /// Speculatively flip the targeted alarm's enabled state. Returns
    /// the alarm as presented after the flip.
    pub(crate) fn speculate_toggle(
        &self,
        target: &AlarmTarget,
        now: &DateTime<Local>,
    ) -> Option<Alarm> {
        let mut state = self.lock();
        let mut list = state.active_list().clone();
        let pos = position(&list, target)?;
        let alarm = &mut list[pos];
        alarm.enabled = !alarm.enabled;
        alarm.time_until = schedule::time_until_label(alarm, now);
        let toggled = alarm.clone();
        state.optimistic = list;
        state.active = ActiveView::Optimistic;
        self.publish(&state);
        Some(toggled)
    }

    /// Speculatively replace the targeted alarm with the merged result
    /// of an edit. The device rebuilds edits as remove-then-add, which
    /// re-enables the alarm, so the overlay does too. Returns the alarm
    /// as it was before the edit.
    pub(crate) fn speculate_edit(
        &self,
        target: &AlarmTarget,
        request: &NewAlarm,
        now: &DateTime<Local>,
    ) -> Option<Alarm> {
        let mut state = self.lock();
        let mut list = state.active_list().clone();
        let pos = position(&list, target)?;
        let original = list[pos].clone();
        let mut merged = Alarm {
            index: original.index,
            name: request.name.clone().unwrap_or_else(|| original.name.clone()),
            hour: request.hour,
            minute: request.minute,
            enabled: true,
            recurring: request.recurring,
            days: request.days.clone(),
            vibration_strength: request
                .vibration_strength
                .or(original.vibration_strength),
            time_until: String::new(),
        };
        merged.time_until = schedule::time_until_label(&merged, now);
        list[pos] = merged;
        state.optimistic = list;
        state.active = ActiveView::Optimistic;
        self.publish(&state);
        Some(original)
    }

    /// Drop the overlay and present the authoritative list again.
    pub(crate) fn revert(&self) {
        let mut state = self.lock();
        state.optimistic.clear();
        state.active = ActiveView::Authoritative;
        self.publish(&state);
    }

    /// Refresh every countdown label against the local clock.
    pub(crate) fn recompute_countdowns(&self, now: &DateTime<Local>) {
        let mut state = self.lock();
        let state = &mut *state;
        for alarm in state
            .authoritative
            .iter_mut()
            .chain(state.optimistic.iter_mut())
        {
            alarm.time_until = schedule::time_until_label(alarm, now);
        }
        self.publish(state);
    }

    // ── Plumbing ────────────────────────────────────────────────────

    fn lock(&self) -> std::sync::MutexGuard<'_, StoreState> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn publish(&self, state: &StoreState) {
        self.snapshot
            .send_replace(Arc::new(state.active_list().clone()));
    }

    /// Set the loading flag, notifying watchers only on change. Returns
    /// the previous value.
    fn set_loading(&self, value: bool) -> bool {
        let mut previous = false;
        self.loading.send_if_modified(|current| {
            previous = *current;
            if *current == value {
                false
            } else {
                *current = value;
                true
            }
        });
        previous
    }
}

fn position(list: &[Alarm], target: &AlarmTarget) -> Option<usize> {
    match target {
        AlarmTarget::Index(index) => list.iter().position(|a| a.index == *index),
        AlarmTarget::Name(name) => list.iter().position(|a| a.name == *name),
    }
}
