use std::{
    collections::HashMap,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
    time::Duration,
};

use anyhow::{Context, Result, bail};
use chrono::Local;
use rand::Rng;
use tokio::{
    sync::{mpsc, watch},
    task::JoinHandle,
};
use tracing::{debug, info};

use crate::badge::badge_text;
use crate::host::{HostEvent, TabId};
use crate::prefs::{IntervalUnit, PrefsStore, RefreshMode, RefreshPrefs};

const COUNTDOWN_TICK_MS: u64 = 1000;

pub fn unit_millis(unit: IntervalUnit) -> u64 {
    match unit {
        IntervalUnit::Seconds => 1_000,
        IntervalUnit::Minutes => 60_000,
        IntervalUnit::Hours => 3_600_000,
    }
}

pub fn fixed_delay_ms(prefs: &RefreshPrefs) -> u64 {
    (prefs.fixed_value * unit_millis(prefs.interval_unit) as f64).round() as u64
}

/// Uniform integer draw over an inclusive range. Reversed bounds are
/// swapped rather than left undefined.
pub fn random_between(min: u64, max: u64) -> u64 {
    let (lo, hi) = if min <= max { (min, max) } else { (max, min) };
    rand::thread_rng().gen_range(lo..=hi)
}

fn random_delay_ms(prefs: &RefreshPrefs) -> u64 {
    random_between(prefs.random_min, prefs.random_max) * unit_millis(prefs.interval_unit)
}

fn initial_delay_ms(prefs: &RefreshPrefs) -> u64 {
    match prefs.mode {
        RefreshMode::Fixed => fixed_delay_ms(prefs),
        RefreshMode::Random => random_delay_ms(prefs),
    }
}

/// Live state for one armed tab. Held only in memory so a closing tab can
/// cancel its timers directly instead of leaking them with the record.
struct ArmedTab {
    reload_task: JoinHandle<()>,
    countdown_task: JoinHandle<()>,
    delay_rx: watch::Receiver<u64>,
}

/// Drives the per-tab reload cycle: one reload timer plus one 1 s countdown
/// timer feeding the badge, per armed tab.
pub struct Scheduler {
    store: Arc<PrefsStore>,
    events: mpsc::UnboundedSender<HostEvent>,
    armed: Mutex<HashMap<TabId, ArmedTab>>,
}

impl Scheduler {
    pub fn new(store: Arc<PrefsStore>, events: mpsc::UnboundedSender<HostEvent>) -> Self {
        Self {
            store,
            events,
            armed: Mutex::new(HashMap::new()),
        }
    }

    /// Arm the reload cycle for a tab. Starting an already armed tab is a
    /// no-op; starting an untracked tab is an error.
    pub fn start(&self, tab_id: TabId) -> Result<()> {
        let mut armed = self.armed_map();
        if armed.contains_key(&tab_id) {
            debug!(tab_id, "start ignored, schedule already armed");
            return Ok(());
        }

        let prefs = self
            .store
            .get(tab_id)?
            .with_context(|| format!("No refresh preferences tracked for tab {tab_id}"))?;
        let delay_ms = initial_delay_ms(&prefs);
        if delay_ms == 0 {
            bail!("Refresh interval for tab {tab_id} works out to zero");
        }

        let (delay_tx, delay_rx) = watch::channel(delay_ms);
        self.send(HostEvent::BadgeText {
            tab_id,
            text: badge_text(delay_ms),
        });

        let countdown_task = tokio::spawn(countdown_loop(
            tab_id,
            delay_ms,
            delay_rx.clone(),
            self.events.clone(),
        ));
        let reload_task = match prefs.mode {
            RefreshMode::Fixed => tokio::spawn(fixed_reload_loop(
                tab_id,
                delay_ms,
                delay_tx,
                self.events.clone(),
            )),
            RefreshMode::Random => tokio::spawn(random_reload_loop(
                tab_id,
                prefs.clone(),
                delay_tx,
                self.events.clone(),
            )),
        };

        armed.insert(
            tab_id,
            ArmedTab {
                reload_task,
                countdown_task,
                delay_rx,
            },
        );
        self.store.patch(tab_id, |record| {
            record.running = true;
            record.initiated_at = Some(Local::now());
        })?;
        info!(tab_id, mode = ?prefs.mode, delay_ms, "refresh schedule armed");
        Ok(())
    }

    /// Disarm the reload cycle for a tab, clearing the badge. Stopping an
    /// idle tab still clears the badge and persists `running = false`.
    pub fn stop(&self, tab_id: TabId) -> Result<()> {
        match self.armed_map().remove(&tab_id) {
            Some(tab) => {
                tab.reload_task.abort();
                tab.countdown_task.abort();
                info!(tab_id, "refresh schedule disarmed");
            }
            None => debug!(tab_id, "stop with no armed schedule"),
        }
        self.send(HostEvent::BadgeText {
            tab_id,
            text: String::new(),
        });
        self.store.patch(tab_id, |record| {
            record.running = false;
            record.initiated_at = None;
        })?;
        Ok(())
    }

    pub fn is_armed(&self, tab_id: TabId) -> bool {
        self.armed_map().contains_key(&tab_id)
    }

    /// Delay of the currently armed cycle, if any. For random mode this is
    /// the most recent draw.
    pub fn armed_delay_ms(&self, tab_id: TabId) -> Option<u64> {
        self.armed_map().get(&tab_id).map(|tab| *tab.delay_rx.borrow())
    }

    /// Watch the armed delay. Fixed mode never publishes after arming;
    /// random mode publishes once per completed cycle.
    pub fn delay_updates(&self, tab_id: TabId) -> Option<watch::Receiver<u64>> {
        self.armed_map().get(&tab_id).map(|tab| tab.delay_rx.clone())
    }

    fn send(&self, event: HostEvent) {
        let _ = self.events.send(event);
    }

    fn armed_map(&self) -> MutexGuard<'_, HashMap<TabId, ArmedTab>> {
        self.armed.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Ticks every second, pushing the formatted remainder to the badge. On
/// reaching zero it clears the badge, reloads the cycle delay from the
/// watch channel (picking up random redraws), and shows the fresh value.
async fn countdown_loop(
    tab_id: TabId,
    initial_delay_ms: u64,
    delay_rx: watch::Receiver<u64>,
    events: mpsc::UnboundedSender<HostEvent>,
) {
    let mut remaining = initial_delay_ms;
    let mut tick = tokio::time::interval(Duration::from_millis(COUNTDOWN_TICK_MS));
    tick.tick().await;
    loop {
        tick.tick().await;
        remaining = remaining.saturating_sub(COUNTDOWN_TICK_MS);
        let text = badge_text(remaining);
        if events.send(HostEvent::BadgeText { tab_id, text }).is_err() {
            return;
        }
        if remaining == 0 {
            remaining = *delay_rx.borrow();
            let text = badge_text(remaining);
            if events.send(HostEvent::BadgeText { tab_id, text }).is_err() {
                return;
            }
        }
    }
}

/// Fixed mode: constant cadence until disarmed. Preference edits do not
/// touch a running cycle. The watch sender is held but never fed, so the
/// countdown keeps resetting to the armed delay.
async fn fixed_reload_loop(
    tab_id: TabId,
    delay_ms: u64,
    _delay_tx: watch::Sender<u64>,
    events: mpsc::UnboundedSender<HostEvent>,
) {
    let mut tick = tokio::time::interval(Duration::from_millis(delay_ms));
    tick.tick().await;
    loop {
        tick.tick().await;
        if events.send(HostEvent::Reload { tab_id }).is_err() {
            return;
        }
    }
}

/// Random mode: one long-lived loop per tab that sleeps the drawn delay,
/// reloads, then redraws and publishes the next delay.
async fn random_reload_loop(
    tab_id: TabId,
    prefs: RefreshPrefs,
    delay_tx: watch::Sender<u64>,
    events: mpsc::UnboundedSender<HostEvent>,
) {
    let mut delay_ms = *delay_tx.borrow();
    loop {
        tokio::time::sleep(Duration::from_millis(delay_ms)).await;
        if events.send(HostEvent::Reload { tab_id }).is_err() {
            return;
        }
        delay_ms = random_delay_ms(&prefs);
        debug!(tab_id, delay_ms, "redrew random refresh delay");
        let _ = delay_tx.send(delay_ms);
    }
}
