use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use log::{info, warn};
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::logger;
use crate::queue::RegionQueue;
use crate::stats::{RunStats, StatsSnapshot};

pub const HELP: &str = "\
Commands (type a letter then Enter):
  q  stop the run and close every open page
  p  pause after the card in progress
  r  resume
  n  skip the region(s) in progress
  s  show statistics
  d  toggle debug logging and dump run state
  h  show this help";

/// Operator commands accepted on the console and the control API.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Stop,
    Pause,
    Resume,
    SkipCurrent,
    ShowStats,
    ToggleDebug,
    Help,
}

impl Command {
    /// Unrecognized input yields `None`.
    pub fn parse(input: &str) -> Option<Command> {
        match input.trim().to_lowercase().as_str() {
            "q" | "quit" | "stop" => Some(Command::Stop),
            "p" | "pause" => Some(Command::Pause),
            "r" | "resume" => Some(Command::Resume),
            "n" | "next" | "skip" => Some(Command::SkipCurrent),
            "s" | "stats" => Some(Command::ShowStats),
            "d" | "debug" => Some(Command::ToggleDebug),
            "h" | "help" | "?" => Some(Command::Help),
            _ => None,
        }
    }
}

/// What a worker should do at a loop boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Skip,
    Stop,
}

#[derive(Debug, Clone, Serialize)]
pub struct ControlSnapshot {
    pub run_id: Uuid,
    pub running: bool,
    pub stopped: bool,
    pub debug: bool,
    pub active_regions: Vec<String>,
    pub skipped_regions: Vec<String>,
    pub open_sessions: Vec<String>,
    pub pending_regions: Vec<String>,
    pub stats: StatsSnapshot,
}

/// Shared run state. Commands are the only writers; workers poll.
pub struct RunController {
    run_id: Uuid,
    running: AtomicBool,
    debug: AtomicBool,
    shutdown: CancellationToken,
    active: Mutex<BTreeSet<String>>,
    skipped: Mutex<BTreeSet<String>>,
    sessions: Mutex<HashMap<String, CancellationToken>>,
    stats: Arc<RunStats>,
    queue: Arc<RegionQueue>,
    poll_interval: Duration,
}

impl RunController {
    pub fn new(stats: Arc<RunStats>, queue: Arc<RegionQueue>) -> Self {
        RunController {
            run_id: Uuid::new_v4(),
            running: AtomicBool::new(true),
            debug: AtomicBool::new(false),
            shutdown: CancellationToken::new(),
            active: Mutex::new(BTreeSet::new()),
            skipped: Mutex::new(BTreeSet::new()),
            sessions: Mutex::new(HashMap::new()),
            stats,
            queue,
            poll_interval: Duration::from_millis(500),
        }
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Applies a command and returns the text to show the operator, if any.
    pub fn handle(&self, command: Command) -> Option<String> {
        match command {
            Command::Stop => {
                self.stop();
                Some("Stop requested. Closing open pages...".to_string())
            }
            Command::Pause => {
                self.pause();
                Some("Paused. Workers will idle after the card in progress (r to resume).".to_string())
            }
            Command::Resume => {
                self.resume();
                Some("Resumed.".to_string())
            }
            Command::SkipCurrent => {
                let skipped = self.skip_current();
                if skipped.is_empty() {
                    Some("No region in progress.".to_string())
                } else {
                    Some(format!("Skipping: {}", skipped.join(", ")))
                }
            }
            Command::ShowStats => Some(self.stats_report()),
            Command::ToggleDebug => Some(self.toggle_debug()),
            Command::Help => Some(HELP.to_string()),
        }
    }

    /// Halts the run and force-closes every registered fetch session.
    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
        self.shutdown.cancel();
        let closed = self.close_all_sessions();
        warn!("Stop requested: {} open session(s) closed.", closed);
    }

    pub fn pause(&self) {
        if !self.is_stopped() && self.running.swap(false, Ordering::SeqCst) {
            info!("Run paused.");
        }
    }

    pub fn resume(&self) {
        if !self.is_stopped() && !self.running.swap(true, Ordering::SeqCst) {
            info!("Run resumed.");
        }
    }

    /// Marks every region in progress as skipped and returns their names.
    pub fn skip_current(&self) -> Vec<String> {
        let active: Vec<String> = lock(&self.active).iter().cloned().collect();
        let mut skipped = lock(&self.skipped);
        for region in &active {
            skipped.insert(region.clone());
        }
        if !active.is_empty() {
            info!("Operator skipped: {}", active.join(", "));
        }
        active
    }

    pub fn toggle_debug(&self) -> String {
        let debug = !self.debug.fetch_xor(true, Ordering::SeqCst);
        logger::set_verbose(debug);
        let dump = serde_json::to_string_pretty(&self.snapshot())
            .unwrap_or_else(|e| format!("<state unavailable: {}>", e));
        format!("Debug logging {}.\n{}", if debug { "on" } else { "off" }, dump)
    }

    pub fn stats_report(&self) -> String {
        format!("Run {}\n{}", self.run_id, self.stats.snapshot())
    }

    pub fn snapshot(&self) -> ControlSnapshot {
        ControlSnapshot {
            run_id: self.run_id,
            running: self.is_running(),
            stopped: self.is_stopped(),
            debug: self.debug.load(Ordering::SeqCst),
            active_regions: lock(&self.active).iter().cloned().collect(),
            skipped_regions: lock(&self.skipped).iter().cloned().collect(),
            open_sessions: {
                let mut open: Vec<String> = lock(&self.sessions).keys().cloned().collect();
                open.sort();
                open
            },
            pending_regions: self.queue.snapshot(),
            stats: self.stats.snapshot(),
        }
    }

    /// Blocks while paused, then reports how the region should proceed.
    pub async fn checkpoint(&self, region: &str) -> Flow {
        loop {
            if self.is_stopped() {
                return Flow::Stop;
            }
            if lock(&self.skipped).contains(region) {
                return Flow::Skip;
            }
            if self.is_running() {
                return Flow::Continue;
            }
            tokio::select! {
                _ = self.shutdown.cancelled() => return Flow::Stop,
                _ = tokio::time::sleep(self.poll_interval) => {}
            }
        }
    }

    /// Waits out a pause. Returns `false` once the run is stopped.
    pub async fn wait_until_running(&self) -> bool {
        while !self.is_running() {
            if self.is_stopped() {
                return false;
            }
            tokio::select! {
                _ = self.shutdown.cancelled() => return false,
                _ = tokio::time::sleep(self.poll_interval) => {}
            }
        }
        !self.is_stopped()
    }

    pub fn enter_region(&self, region: &str) {
        lock(&self.active).insert(region.to_string());
    }

    pub fn leave_region(&self, region: &str) {
        lock(&self.active).remove(region);
    }

    /// Registers a session for `region`; the token fires on a hard stop.
    pub fn open_session(&self, region: &str) -> CancellationToken {
        let token = CancellationToken::new();
        // Checked under the registry lock: a concurrent stop either sees this
        // token or has already cancelled the shutdown token.
        let mut sessions = lock(&self.sessions);
        if self.is_stopped() {
            token.cancel();
        }
        sessions.insert(region.to_string(), token.clone());
        token
    }

    pub fn release_session(&self, region: &str) {
        lock(&self.sessions).remove(region);
    }

    fn close_all_sessions(&self) -> usize {
        let sessions = lock(&self.sessions);
        for token in sessions.values() {
            token.cancel();
        }
        sessions.len()
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn is_stopped(&self) -> bool {
        self.shutdown.is_cancelled()
    }

    /// Fires when the run is stopped; used to cut delays short.
    pub fn shutdown_token(&self) -> &CancellationToken {
        &self.shutdown
    }

    pub fn stats(&self) -> &Arc<RunStats> {
        &self.stats
    }

    pub fn run_id(&self) -> Uuid {
        self.run_id
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
