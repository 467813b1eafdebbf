//! Human-readable progress feed. Every state transition is logged through
//! `tracing` and kept in a bounded in-memory buffer for the control API.

use std::collections::VecDeque;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{error, info, warn};

const FEED_CAPACITY: usize = 200;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ProgressLevel {
    Info,
    Warn,
    Error,
}

#[derive(Debug, Clone, Serialize)]
pub struct ProgressEvent {
    pub at: DateTime<Utc>,
    pub level: ProgressLevel,
    pub page: Option<String>,
    pub message: String,
}

#[derive(Default)]
pub struct ProgressFeed {
    events: Mutex<VecDeque<ProgressEvent>>,
}

impl ProgressFeed {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn info(&self, page: Option<&str>, message: impl Into<String>) {
        self.emit(ProgressLevel::Info, page, message.into());
    }

    pub fn warn(&self, page: Option<&str>, message: impl Into<String>) {
        self.emit(ProgressLevel::Warn, page, message.into());
    }

    pub fn error(&self, page: Option<&str>, message: impl Into<String>) {
        self.emit(ProgressLevel::Error, page, message.into());
    }

    /// Most recent events, oldest first.
    pub fn recent(&self, limit: usize) -> Vec<ProgressEvent> {
        let events = self.events.lock().unwrap_or_else(|p| p.into_inner());
        let skip = events.len().saturating_sub(limit);
        events.iter().skip(skip).cloned().collect()
    }

    fn emit(&self, level: ProgressLevel, page: Option<&str>, message: String) {
        let page_label = page.unwrap_or("-");
        match level {
            ProgressLevel::Info => info!(page = %page_label, "{message}"),
            ProgressLevel::Warn => warn!(page = %page_label, "{message}"),
            ProgressLevel::Error => error!(page = %page_label, "{message}"),
        }
        let mut events = self.events.lock().unwrap_or_else(|p| p.into_inner());
        if events.len() == FEED_CAPACITY {
            events.pop_front();
        }
        events.push_back(ProgressEvent {
            at: Utc::now(),
            level,
            page: page.map(String::from),
            message,
        });
    }
}
