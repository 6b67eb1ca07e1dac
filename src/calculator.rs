//! Metrics Calculator (C7): a pure function over normalized work items plus
//! configuration. No I/O, no suspension — every operation here is CPU-bound
//! and deterministic (spec.md §8's bitwise-determinism invariant).

use crate::models::WorkItem;
use crate::percentiles::{self, PercentileStats};
use crate::state_config::CalculatorConfig;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;

#[derive(Debug, Clone, Serialize)]
pub struct Throughput {
    pub count: usize,
    pub items_per_day: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct Wip {
    pub total: usize,
    pub by_state: HashMap<String, usize>,
    pub blocked: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct FlowEfficiency {
    pub average: Option<f64>,
    pub sample_size: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct TeamMember {
    pub completed: usize,
    pub active: usize,
    pub avg_lead_time_days: Option<f64>,
    pub avg_cycle_time_days: Option<f64>,
    pub completion_rate: Option<f64>,
    pub velocity: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct LittlesLawValidation {
    pub arrival_rate_per_day: Option<f64>,
    pub avg_wip: f64,
    pub avg_cycle_time_days: Option<f64>,
    pub predicted_cycle_time_days: Option<f64>,
    pub deviation_pct: Option<f64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct TypeMetrics {
    pub count: usize,
    pub lead_time: PercentileStats,
    pub cycle_time: PercentileStats,
}

#[derive(Debug, Clone, Serialize)]
pub struct MetricsBundle {
    pub lead_time: PercentileStats,
    pub cycle_time: PercentileStats,
    pub throughput: Throughput,
    pub wip: Wip,
    pub flow_efficiency: FlowEfficiency,
    pub team_metrics: HashMap<String, TeamMember>,
    pub littles_law: LittlesLawValidation,
    pub per_type_breakdown: HashMap<String, TypeMetrics>,
}

/// Compute the full metrics bundle for `items` as of `now`, using `config`
/// for state classification and per-type policy.
///
/// `team_filter`, if non-empty, restricts `team_metrics` to those assignees.
pub fn calculate(
    items: &[WorkItem],
    config: &CalculatorConfig,
    now: DateTime<Utc>,
    team_filter: Option<&[String]>,
) -> MetricsBundle {
    let lead_times = lead_times(items, config);
    let cycle_times = cycle_times(items, config);

    MetricsBundle {
        lead_time: percentiles::compute(&lead_times, &config.parameters.percentiles),
        cycle_time: percentiles::compute(&cycle_times, &config.parameters.percentiles),
        throughput: throughput(items, config, now),
        wip: wip(items, config),
        flow_efficiency: flow_efficiency(items, config, now),
        team_metrics: team_metrics(items, config, team_filter),
        littles_law: littles_law(items, config, now),
        per_type_breakdown: per_type_breakdown(items, config),
    }
}

fn throughput_eligible(item: &WorkItem, config: &CalculatorConfig) -> bool {
    config.type_policies.get(&item.item_type).include_in_throughput
}

/// Whether `item`'s terminal transition landed in a completion state, per
/// `config`'s state classification. Exposed for the report serializer's
/// per-item lead/cycle time summary.
pub fn is_completed(item: &WorkItem, config: &CalculatorConfig) -> bool {
    item.terminal_transition()
        .map(|t| !t.is_open() && config.states.is_completed(&t.state))
        .unwrap_or(false)
}

/// The earliest `entered_date` among transitions matching `pred`, breaking
/// ties between same-timestamp entries by keeping the later one in history
/// order (spec.md §4.7: "when two active-state entries occur on the same
/// timestamp, the later in history order wins").
fn first_entry_matching(
    transitions: &[crate::models::StateTransition],
    pred: impl Fn(&str) -> bool,
) -> Option<DateTime<Utc>> {
    let earliest = transitions
        .iter()
        .filter(|t| pred(&t.state))
        .map(|t| t.entered_date)
        .min()?;
    transitions
        .iter()
        .rev()
        .find(|t| pred(&t.state) && t.entered_date == earliest)
        .map(|t| t.entered_date)
}

/// First entry into any active state. Exposed for the report serializer's
/// per-item cycle time summary.
pub fn first_active_entry(item: &WorkItem, config: &CalculatorConfig) -> Option<DateTime<Utc>> {
    first_entry_matching(&item.transitions, |s| config.states.is_active(s))
}

/// First entry into any completion state. Exposed for the report
/// serializer's per-item cycle time summary.
pub fn first_completion_entry(item: &WorkItem, config: &CalculatorConfig) -> Option<DateTime<Utc>> {
    first_entry_matching(&item.transitions, |s| config.states.is_completed(s))
}

fn lead_times(items: &[WorkItem], config: &CalculatorConfig) -> Vec<f64> {
    items
        .iter()
        .filter(|i| is_completed(i, config) && throughput_eligible(i, config))
        .filter_map(|i| {
            let closed = i.closed_date?;
            let days = (closed - i.created_date).num_milliseconds() as f64 / 86_400_000.0;
            Some(days)
        })
        .collect()
}

fn cycle_times(items: &[WorkItem], config: &CalculatorConfig) -> Vec<f64> {
    items
        .iter()
        .filter(|i| throughput_eligible(i, config))
        .filter_map(|i| {
            let active = first_active_entry(i, config)?;
            let completion = first_completion_entry(i, config)?;
            if !is_completed(i, config) {
                return None;
            }
            let days = (completion - active).num_milliseconds() as f64 / 86_400_000.0;
            Some(days)
        })
        .collect()
}

fn throughput(items: &[WorkItem], config: &CalculatorConfig, now: DateTime<Utc>) -> Throughput {
    let window_start = now - chrono::Duration::days(config.parameters.throughput_period_days as i64);
    let count = items
        .iter()
        .filter(|i| throughput_eligible(i, config))
        .filter(|i| {
            i.closed_date
                .map(|d| d >= window_start && d <= now)
                .unwrap_or(false)
        })
        .count();
    let items_per_day = count as f64 / config.parameters.throughput_period_days.max(1) as f64;
    Throughput { count, items_per_day }
}

fn wip(items: &[WorkItem], config: &CalculatorConfig) -> Wip {
    let mut by_state: HashMap<String, usize> = HashMap::new();
    let mut total = 0;
    let mut blocked = 0;
    for item in items {
        if config.states.is_active(&item.current_state) {
            *by_state.entry(item.current_state.clone()).or_insert(0) += 1;
            total += 1;
        }
        if config.states.is_blocked(&item.current_state) {
            blocked += 1;
        }
    }
    Wip { total, by_state, blocked }
}

fn flow_efficiency_for_item(item: &WorkItem, config: &CalculatorConfig, now: DateTime<Utc>) -> Option<f64> {
    let first_active = first_active_entry(item, config)?;
    let active_hours: f64 = item
        .transitions
        .iter()
        .filter(|t| config.states.is_active(&t.state))
        .filter_map(|t| t.duration_hours.or_else(|| {
            // still-open active transition: count elapsed time to now
            if t.is_open() {
                Some((now - t.entered_date).num_milliseconds() as f64 / 3_600_000.0)
            } else {
                None
            }
        }))
        .sum();

    let end = item
        .terminal_transition()
        .filter(|t| !t.is_open())
        .and_then(|t| t.exited_date)
        .unwrap_or(now);
    let total_hours = (end - first_active).num_milliseconds() as f64 / 3_600_000.0;
    if total_hours <= 0.0 {
        return None;
    }
    Some((active_hours / total_hours).clamp(0.0, 1.0))
}

fn flow_efficiency(items: &[WorkItem], config: &CalculatorConfig, now: DateTime<Utc>) -> FlowEfficiency {
    let values: Vec<f64> = items
        .iter()
        .filter_map(|i| flow_efficiency_for_item(i, config, now))
        .collect();
    if values.is_empty() {
        return FlowEfficiency { average: None, sample_size: 0 };
    }
    let average = values.iter().sum::<f64>() / values.len() as f64;
    FlowEfficiency {
        average: Some(average),
        sample_size: values.len(),
    }
}

fn team_metrics(
    items: &[WorkItem],
    config: &CalculatorConfig,
    team_filter: Option<&[String]>,
) -> HashMap<String, TeamMember> {
    let mut by_assignee: HashMap<String, Vec<&WorkItem>> = HashMap::new();
    for item in items {
        if item.assigned_to.is_empty() {
            continue;
        }
        if let Some(filter) = team_filter {
            if !filter.iter().any(|name| name == &item.assigned_to) {
                continue;
            }
        }
        by_assignee.entry(item.assigned_to.clone()).or_default().push(item);
    }

    by_assignee
        .into_iter()
        .map(|(name, items)| {
            let completed: Vec<&&WorkItem> =
                items.iter().filter(|i| is_completed(i, config)).collect();
            let active = items
                .iter()
                .filter(|i| config.states.is_active(&i.current_state))
                .count();

            let lead: Vec<f64> = completed
                .iter()
                .filter(|i| throughput_eligible(i, config))
                .filter_map(|i| {
                    let closed = i.closed_date?;
                    Some((closed - i.created_date).num_milliseconds() as f64 / 86_400_000.0)
                })
                .collect();
            let cycle: Vec<f64> = completed
                .iter()
                .filter_map(|i| {
                    let a = first_active_entry(i, config)?;
                    let c = first_completion_entry(i, config)?;
                    Some((c - a).num_milliseconds() as f64 / 86_400_000.0)
                })
                .collect();

            let avg = |v: &[f64]| -> Option<f64> {
                if v.is_empty() {
                    None
                } else {
                    Some(v.iter().sum::<f64>() / v.len() as f64)
                }
            };

            let completion_rate = if completed.len() + active == 0 {
                None
            } else {
                Some(completed.len() as f64 / (completed.len() + active) as f64)
            };

            let velocity: f64 = completed
                .iter()
                .filter(|i| config.type_policies.get(&i.item_type).include_in_velocity)
                .map(|i| config.type_policies.get(&i.item_type).complexity_multiplier)
                .sum();

            (
                name,
                TeamMember {
                    completed: completed.len(),
                    active,
                    avg_lead_time_days: avg(&lead),
                    avg_cycle_time_days: avg(&cycle),
                    completion_rate,
                    velocity,
                },
            )
        })
        .collect()
}

fn littles_law(items: &[WorkItem], config: &CalculatorConfig, now: DateTime<Utc>) -> LittlesLawValidation {
    let window_days = config.parameters.throughput_period_days.max(1) as f64;
    let t = throughput(items, config, now);
    let arrival_rate = if t.count == 0 { None } else { Some(t.count as f64 / window_days) };

    let w = wip(items, config);
    let avg_wip = w.total as f64;

    let cycles = cycle_times(items, config);
    let avg_cycle_time_days = if cycles.is_empty() {
        None
    } else {
        Some(cycles.iter().sum::<f64>() / cycles.len() as f64)
    };

    let predicted_cycle_time_days = match arrival_rate {
        Some(rate) if rate > 0.0 => Some(avg_wip / rate),
        _ => None,
    };

    let deviation_pct = match (predicted_cycle_time_days, avg_cycle_time_days) {
        (Some(predicted), Some(measured)) if measured > 0.0 => {
            Some(((predicted - measured) / measured * 100.0).abs())
        }
        _ => None,
    };

    LittlesLawValidation {
        arrival_rate_per_day: arrival_rate,
        avg_wip,
        avg_cycle_time_days,
        predicted_cycle_time_days,
        deviation_pct,
    }
}

fn per_type_breakdown(items: &[WorkItem], config: &CalculatorConfig) -> HashMap<String, TypeMetrics> {
    let mut by_type: HashMap<String, Vec<&WorkItem>> = HashMap::new();
    for item in items {
        by_type.entry(item.item_type.clone()).or_default().push(item);
    }

    by_type
        .into_iter()
        .map(|(item_type, items)| {
            let owned: Vec<WorkItem> = items.into_iter().cloned().collect();
            let lead = lead_times(&owned, config);
            let cycle = cycle_times(&owned, config);
            (
                item_type,
                TypeMetrics {
                    count: owned.len(),
                    lead_time: percentiles::compute(&lead, &config.parameters.percentiles),
                    cycle_time: percentiles::compute(&cycle, &config.parameters.percentiles),
                },
            )
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::StateTransition;
    use crate::state_config::{CalculationParameters, StateConfiguration, TypePolicies};
    use chrono::TimeZone;
    use std::collections::HashMap as Map;
    use std::collections::HashSet;

    fn dt(day: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap() + chrono::Duration::days(day)
    }

    fn default_config() -> CalculatorConfig {
        CalculatorConfig {
            states: StateConfiguration {
                active_states: ["Active"].iter().map(|s| s.to_string()).collect(),
                completion_states: ["Closed"].iter().map(|s| s.to_string()).collect(),
                blocked_states: ["Blocked"].iter().map(|s| s.to_string()).collect(),
            },
            type_policies: TypePolicies::new(Map::new()),
            parameters: CalculationParameters::default(),
            configuration_degraded: false,
        }
    }

    fn completed_item(id: i64, created_offset: i64, closed_offset: i64) -> WorkItem {
        let created = dt(created_offset);
        let closed = dt(closed_offset);
        let mut active = StateTransition::open("Active", created);
        active.close(closed);
        WorkItem {
            id,
            title: "x".into(),
            item_type: "Task".into(),
            current_state: "Closed".into(),
            assigned_to: "Alice".into(),
            created_date: created,
            closed_date: Some(closed),
            priority: 3,
            story_points: None,
            effort_hours: None,
            tags: HashSet::new(),
            sprint: None,
            transitions: vec![active, {
                let mut t = StateTransition::open("Closed", closed);
                t.close(closed);
                t
            }],
            area_path: None,
            iteration_path: None,
            url: None,
        }
    }

    #[test]
    fn three_completed_items_scenario_matches_spec_example() {
        let now = dt(10);
        let items = vec![
            completed_item(1, 0, 5),
            completed_item(2, 3, 8),
            completed_item(3, 7, 10),
        ];
        let config = default_config();
        let bundle = calculate(&items, &config, now, None);
        assert_eq!(bundle.throughput.count, 3);
        assert!((bundle.lead_time.mean.unwrap() - 4.333333333333333).abs() < 1e-6);
    }

    #[test]
    fn empty_input_yields_null_aggregates() {
        let bundle = calculate(&[], &default_config(), dt(0), None);
        assert_eq!(bundle.lead_time.count, 0);
        assert_eq!(bundle.lead_time.median, None);
        assert_eq!(bundle.wip.total, 0);
    }

    #[test]
    fn single_completed_item_median_equals_average() {
        let items = vec![completed_item(1, 0, 5)];
        let bundle = calculate(&items, &default_config(), dt(5), None);
        assert_eq!(bundle.lead_time.median, bundle.lead_time.mean);
    }

    #[test]
    fn wip_total_equals_sum_of_by_state() {
        let mut item = completed_item(1, 0, 5);
        item.current_state = "Active".into();
        item.closed_date = None;
        let items = vec![item];
        let bundle = calculate(&items, &default_config(), dt(5), None);
        let sum: usize = bundle.wip.by_state.values().sum();
        assert_eq!(bundle.wip.total, sum);
    }

    #[test]
    fn blocked_item_excluded_from_wip_but_counted_blocked() {
        let mut item = completed_item(1, 0, 5);
        item.current_state = "Blocked".into();
        item.closed_date = None;
        let items = vec![item];
        let bundle = calculate(&items, &default_config(), dt(5), None);
        assert_eq!(bundle.wip.total, 0);
        assert_eq!(bundle.wip.blocked, 1);
    }

    #[test]
    fn team_filter_restricts_to_named_assignees() {
        let mut a = completed_item(1, 0, 5);
        a.assigned_to = "Alice".into();
        let mut b = completed_item(2, 0, 5);
        b.assigned_to = "Bob".into();
        let mut c = completed_item(3, 0, 5);
        c.assigned_to = "Carol".into();
        let items = vec![a, b, c];
        let filter = vec!["Alice".to_string(), "Bob".to_string()];
        let bundle = calculate(&items, &default_config(), dt(10), Some(&filter));
        assert_eq!(bundle.team_metrics.len(), 2);
        assert!(bundle.team_metrics.contains_key("Alice"));
        assert!(bundle.team_metrics.contains_key("Bob"));
    }

    #[test]
    fn deterministic_across_repeated_runs() {
        let items = vec![completed_item(1, 0, 5), completed_item(2, 3, 8)];
        let config = default_config();
        let a = calculate(&items, &config, dt(10), None);
        let b = calculate(&items, &config, dt(10), None);
        assert_eq!(a.lead_time, b.lead_time);
        assert_eq!(a.cycle_time, b.cycle_time);
    }

    #[test]
    fn first_entry_matching_finds_the_earliest_match_regardless_of_position() {
        // Out-of-order by construction: the earliest match sits last in the
        // slice, which `.find()` forward would have missed.
        let transitions = vec![
            StateTransition::open("Active", dt(5)),
            StateTransition::open("Blocked", dt(3)),
            StateTransition::open("Active", dt(1)),
        ];
        let result = first_entry_matching(&transitions, |s| s == "Active");
        assert_eq!(result, Some(dt(1)));
    }

    #[test]
    fn first_entry_matching_breaks_same_timestamp_ties_by_later_position() {
        let tie = dt(2);
        let transitions = vec![
            StateTransition::open("Active", tie),
            StateTransition::open("Blocked", tie),
            StateTransition::open("Active", tie),
        ];
        let result = first_entry_matching(&transitions, |s| s == "Active");
        assert_eq!(result, Some(tie));
    }

    #[test]
    fn active_only_items_excluded_from_cycle_time() {
        let mut item = completed_item(1, 0, 5);
        item.closed_date = None;
        item.current_state = "Active".into();
        item.transitions.pop();
        let items = vec![item];
        let bundle = calculate(&items, &default_config(), dt(5), None);
        assert_eq!(bundle.cycle_time.count, 0);
    }
}
