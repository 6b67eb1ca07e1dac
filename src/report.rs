//! Report Serializer (C8): the computed metrics bundle plus a configuration
//! echo, written atomically as the on-disk artifacts the CLI and HTTP API
//! both read from.

use crate::calculator::MetricsBundle;
use crate::models::{ValidationError, WorkItem};
use crate::state_config::CalculatorConfig;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::io;
use std::path::Path;

#[derive(Debug, Clone, Serialize)]
pub struct ConfigurationSummary {
    pub active_states: Vec<String>,
    pub completion_states: Vec<String>,
    pub blocked_states: Vec<String>,
    pub throughput_period_days: u32,
    pub percentiles: Vec<u8>,
    pub configuration_degraded: bool,
}

impl From<&CalculatorConfig> for ConfigurationSummary {
    fn from(config: &CalculatorConfig) -> Self {
        let mut active_states: Vec<String> = config.states.active_states.iter().cloned().collect();
        active_states.sort();
        let mut completion_states: Vec<String> =
            config.states.completion_states.iter().cloned().collect();
        completion_states.sort();
        let mut blocked_states: Vec<String> = config.states.blocked_states.iter().cloned().collect();
        blocked_states.sort();

        Self {
            active_states,
            completion_states,
            blocked_states,
            throughput_period_days: config.parameters.throughput_period_days,
            percentiles: config.parameters.percentiles.clone(),
            configuration_degraded: config.configuration_degraded,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Report {
    pub generated_at: DateTime<Utc>,
    pub metrics: MetricsBundle,
    pub item_count: usize,
    pub validation_errors: Vec<ValidationError>,
    pub partial: bool,
    pub configuration_summary: ConfigurationSummary,
}

/// A trimmed item shape for the HTTP read API's work-item listing and the
/// dashboard artifact (spec.md §4.8): id, title, type, state, assignee, and
/// lead/cycle time when the item is completed.
#[derive(Debug, Clone, Serialize)]
pub struct WorkItemSummary {
    pub id: i64,
    pub title: String,
    #[serde(rename = "type")]
    pub item_type: String,
    pub current_state: String,
    pub assigned_to: String,
    pub created_date: DateTime<Utc>,
    pub closed_date: Option<DateTime<Utc>>,
    pub transition_count: usize,
    pub lead_time_days: Option<f64>,
    pub cycle_time_days: Option<f64>,
}

impl WorkItemSummary {
    /// Builds the summary for `item`, computing lead/cycle time against
    /// `config`'s state classification when the item is completed.
    pub fn from_item(item: &WorkItem, config: &CalculatorConfig) -> Self {
        let completed = crate::calculator::is_completed(item, config);

        let lead_time_days = if completed {
            item.closed_date
                .map(|closed| (closed - item.created_date).num_milliseconds() as f64 / 86_400_000.0)
        } else {
            None
        };

        let cycle_time_days = if completed {
            crate::calculator::first_active_entry(item, config)
                .zip(crate::calculator::first_completion_entry(item, config))
                .map(|(active, completion)| (completion - active).num_milliseconds() as f64 / 86_400_000.0)
        } else {
            None
        };

        Self {
            id: item.id,
            title: item.title.clone(),
            item_type: item.item_type.clone(),
            current_state: item.current_state.clone(),
            assigned_to: item.assigned_to.clone(),
            created_date: item.created_date,
            closed_date: item.closed_date,
            transition_count: item.transitions.len(),
            lead_time_days,
            cycle_time_days,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct DashboardData {
    pub generated_at: DateTime<Utc>,
    pub metrics: MetricsBundle,
    pub work_items: Vec<WorkItemSummary>,
}

/// Atomically write `value` as pretty JSON to `path` (write-to-temp, rename).
pub fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> io::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let tmp_path = path.with_extension("tmp");
    let json = serde_json::to_vec_pretty(value)
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
    std::fs::write(&tmp_path, json)?;
    std::fs::rename(&tmp_path, path)?;
    Ok(())
}

pub fn write_work_items(path: &Path, items: &[WorkItem]) -> io::Result<()> {
    write_json_atomic(path, &items)
}

pub fn write_report(path: &Path, report: &Report) -> io::Result<()> {
    write_json_atomic(path, report)
}

pub fn write_dashboard_data(path: &Path, dashboard: &DashboardData) -> io::Result<()> {
    write_json_atomic(path, dashboard)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::StateTransition;
    use crate::state_config::{CalculationParameters, StateConfiguration, TypePolicies};
    use chrono::TimeZone;
    use std::collections::{HashMap, HashSet};
    use tempfile::tempdir;

    fn dt(day: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 1, day, 0, 0, 0).unwrap()
    }

    fn test_config() -> CalculatorConfig {
        CalculatorConfig {
            states: StateConfiguration {
                active_states: ["Active"].iter().map(|s| s.to_string()).collect(),
                completion_states: ["Closed"].iter().map(|s| s.to_string()).collect(),
                blocked_states: ["Blocked"].iter().map(|s| s.to_string()).collect(),
            },
            type_policies: TypePolicies::new(HashMap::new()),
            parameters: CalculationParameters::default(),
            configuration_degraded: false,
        }
    }

    fn work_item(transitions: Vec<StateTransition>, closed: Option<DateTime<Utc>>) -> WorkItem {
        WorkItem {
            id: 1,
            title: "x".into(),
            item_type: "Task".into(),
            current_state: transitions.last().map(|t| t.state.clone()).unwrap_or_default(),
            assigned_to: "Alice".into(),
            created_date: dt(1),
            closed_date: closed,
            priority: 3,
            story_points: None,
            effort_hours: None,
            tags: HashSet::new(),
            sprint: None,
            transitions,
            area_path: None,
            iteration_path: None,
            url: None,
        }
    }

    #[test]
    fn completed_item_summary_carries_lead_and_cycle_time() {
        let mut active = StateTransition::open("Active", dt(1));
        active.close(dt(6));
        let mut closed = StateTransition::open("Closed", dt(6));
        closed.close(dt(6));
        let item = work_item(vec![active, closed], Some(dt(6)));

        let summary = WorkItemSummary::from_item(&item, &test_config());
        assert_eq!(summary.lead_time_days, Some(5.0));
        assert_eq!(summary.cycle_time_days, Some(5.0));
    }

    #[test]
    fn open_item_summary_has_no_lead_or_cycle_time() {
        let item = work_item(vec![StateTransition::open("Active", dt(1))], None);
        let summary = WorkItemSummary::from_item(&item, &test_config());
        assert_eq!(summary.lead_time_days, None);
        assert_eq!(summary.cycle_time_days, None);
    }

    #[test]
    fn atomic_write_produces_readable_json() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("work_items.json");
        let items: Vec<i32> = vec![1, 2, 3];
        write_json_atomic(&path, &items).unwrap();

        let contents = std::fs::read_to_string(&path).unwrap();
        let parsed: Vec<i32> = serde_json::from_str(&contents).unwrap();
        assert_eq!(parsed, items);
        assert!(!path.with_extension("tmp").exists());
    }

    #[test]
    fn atomic_write_overwrites_existing_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("report.json");
        write_json_atomic(&path, &1).unwrap();
        write_json_atomic(&path, &2).unwrap();
        let contents = std::fs::read_to_string(&path).unwrap();
        assert_eq!(contents.trim(), "2");
    }
}
