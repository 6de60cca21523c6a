//! Stock status machine shared by every request.
//!
//! A single [`InventoryMonitor`] owns the count, thresholds, status and a
//! bounded history. Each operation is one critical section so concurrent
//! requests always observe a consistent record.

use std::{
    collections::VecDeque,
    sync::{Mutex, MutexGuard, PoisonError},
};

use chrono::Local;
use serde::Serialize;

pub const HISTORY_CAPACITY: usize = 20;
pub const NEVER_CHECKED: &str = "Never";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum StockStatus {
    Waiting,
    Critical,
    Warning,
    Full,
}

impl StockStatus {
    /// Classify a count. Checked top-down, so overlapping thresholds favour FULL.
    pub fn classify(count: usize, critical_threshold: i64, full_capacity: i64) -> Self {
        let count = i64::try_from(count).unwrap_or(i64::MAX);
        if count >= full_capacity {
            Self::Full
        } else if count > critical_threshold {
            Self::Warning
        } else {
            Self::Critical
        }
    }

    pub fn message(self) -> &'static str {
        match self {
            Self::Waiting => "Waiting for first detection...",
            Self::Critical => "Emergency Restock",
            Self::Warning => "Stock Low",
            Self::Full => "Optimal Level",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HistoryEntry {
    pub timestamp: String,
    pub count: usize,
    pub status: StockStatus,
}

/// Result of one status update.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StatusRecord {
    pub count: usize,
    pub status: StockStatus,
    pub message: &'static str,
    pub timestamp: String,
}

/// Point-in-time copy of the state, as served by `/status`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InventorySnapshot {
    pub current_count: usize,
    pub critical_threshold: i64,
    pub full_capacity: i64,
    pub last_check: String,
    pub status: StockStatus,
    pub message: &'static str,
    pub history: Vec<HistoryEntry>,
}

#[derive(Debug, Clone)]
pub struct InventoryState {
    current_count: usize,
    critical_threshold: i64,
    full_capacity: i64,
    last_check: Option<String>,
    status: StockStatus,
    history: VecDeque<HistoryEntry>,
}

impl InventoryState {
    pub fn new(critical_threshold: i64, full_capacity: i64) -> Self {
        Self {
            current_count: 0,
            critical_threshold,
            full_capacity,
            last_check: None,
            status: StockStatus::Waiting,
            history: VecDeque::with_capacity(HISTORY_CAPACITY),
        }
    }

    pub fn has_checked(&self) -> bool {
        self.last_check.is_some()
    }

    /// Record a fresh count taken at `timestamp`.
    pub fn apply(&mut self, count: usize, timestamp: String) -> StatusRecord {
        let status = StockStatus::classify(count, self.critical_threshold, self.full_capacity);
        self.current_count = count;
        self.status = status;
        self.last_check = Some(timestamp.clone());

        self.history.push_front(HistoryEntry {
            timestamp: timestamp.clone(),
            count,
            status,
        });
        self.history.truncate(HISTORY_CAPACITY);

        StatusRecord {
            count,
            status,
            message: status.message(),
            timestamp,
        }
    }

    /// Replace both thresholds. Once a check has happened the current count
    /// is re-evaluated and recorded like any other update.
    pub fn set_thresholds(
        &mut self,
        critical_threshold: i64,
        full_capacity: i64,
        timestamp: String,
    ) -> Option<StatusRecord> {
        self.critical_threshold = critical_threshold;
        self.full_capacity = full_capacity;
        if self.has_checked() {
            Some(self.apply(self.current_count, timestamp))
        } else {
            None
        }
    }

    pub fn snapshot(&self) -> InventorySnapshot {
        InventorySnapshot {
            current_count: self.current_count,
            critical_threshold: self.critical_threshold,
            full_capacity: self.full_capacity,
            last_check: self
                .last_check
                .clone()
                .unwrap_or_else(|| NEVER_CHECKED.to_string()),
            status: self.status,
            message: self.status.message(),
            history: self.history.iter().cloned().collect(),
        }
    }
}

/// Thread-safe owner of the [`InventoryState`].
#[derive(Debug)]
pub struct InventoryMonitor {
    state: Mutex<InventoryState>,
}

impl InventoryMonitor {
    pub fn new(critical_threshold: i64, full_capacity: i64) -> Self {
        Self {
            state: Mutex::new(InventoryState::new(critical_threshold, full_capacity)),
        }
    }

    pub fn update(&self, count: usize) -> StatusRecord {
        let mut state = self.lock();
        state.apply(count, clock_time())
    }

    pub fn set_thresholds(&self, critical_threshold: i64, full_capacity: i64) -> Option<StatusRecord> {
        let mut state = self.lock();
        state.set_thresholds(critical_threshold, full_capacity, clock_time())
    }

    pub fn snapshot(&self) -> InventorySnapshot {
        self.lock().snapshot()
    }

    // Every operation leaves the state valid, so a poisoned guard is safe to reuse.
    fn lock(&self) -> MutexGuard<'_, InventoryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn clock_time() -> String {
    Local::now().format("%H:%M:%S").to_string()
}
