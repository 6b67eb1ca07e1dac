//! Canonical work-item data model.
//!
//! Everything here is produced once by the normalizer (`crate::normalizer`)
//! and treated as immutable afterwards — the calculator (`crate::calculator`)
//! only ever reads it.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// A single interval during which a work item sat in one state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateTransition {
    /// The state entered.
    pub state: String,
    pub entered_date: DateTime<Utc>,
    /// Only the last transition in a sequence may be `None` (still open).
    pub exited_date: Option<DateTime<Utc>>,
    /// Derived: `exited_date - entered_date` in hours, if closed.
    pub duration_hours: Option<f64>,
    /// Set when this transition was synthesized rather than observed in
    /// history (see `crate::normalizer` step 3) — kept for diagnostics,
    /// never consulted by the calculator.
    #[serde(default)]
    pub synthetic: bool,
}

impl StateTransition {
    pub fn open(state: impl Into<String>, entered_date: DateTime<Utc>) -> Self {
        Self {
            state: state.into(),
            entered_date,
            exited_date: None,
            duration_hours: None,
            synthetic: false,
        }
    }

    /// Close this transition at `exited_date`, computing `duration_hours`.
    pub fn close(&mut self, exited_date: DateTime<Utc>) {
        let hours = (exited_date - self.entered_date).num_milliseconds() as f64 / 3_600_000.0;
        self.exited_date = Some(exited_date);
        self.duration_hours = Some(hours.max(0.0));
    }

    pub fn is_open(&self) -> bool {
        self.exited_date.is_none()
    }
}

/// A single raw history entry as returned by the revisions endpoint (C4),
/// already filtered down to state changes (see `crate::history`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub state: String,
    pub changed_by: Option<String>,
    pub changed_date: DateTime<Utc>,
}

/// Canonical, post-normalization representation of a work item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkItem {
    pub id: i64,
    pub title: String,
    #[serde(rename = "type")]
    pub item_type: String,
    pub current_state: String,
    /// Empty string, never missing, when unassigned.
    pub assigned_to: String,
    pub created_date: DateTime<Utc>,
    pub closed_date: Option<DateTime<Utc>>,
    pub priority: i32,
    pub story_points: Option<f64>,
    pub effort_hours: Option<f64>,
    pub tags: HashSet<String>,
    pub sprint: Option<String>,
    pub transitions: Vec<StateTransition>,

    /// Carried through from Azure DevOps but not used by any calculation;
    /// useful to the HTTP read API's work-item listing.
    #[serde(default)]
    pub area_path: Option<String>,
    #[serde(default)]
    pub iteration_path: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
}

impl WorkItem {
    /// The state the item was first created in, per `crate::normalizer` step 1.
    pub fn created_state(&self) -> Option<&str> {
        self.transitions.first().map(|t| t.state.as_str())
    }

    /// The terminal transition: the open one if still active, else the last.
    pub fn terminal_transition(&self) -> Option<&StateTransition> {
        self.transitions.last()
    }
}

/// Result of a rejected or dropped work item, surfaced on the report per
/// spec.md §7/§8 rather than silently discarded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationError {
    pub id: i64,
    pub kind: String,
    pub message: String,
}
