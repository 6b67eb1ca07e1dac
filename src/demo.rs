//! Synthetic work-item fixture generator backing the `demo` CLI subcommand.
//! Distinct from the mock-data utilities used by the test suite: this
//! produces a full ingestion run's worth of plausible data for someone
//! trying the tool without Azure DevOps credentials.

use crate::models::{StateTransition, WorkItem};
use chrono::{DateTime, Duration, Utc};
use std::collections::HashSet;

const TYPES: &[&str] = &["Task", "Bug", "User Story"];
const ASSIGNEES: &[&str] = &["Alice", "Bob", "Carol", "Dave"];

/// Deterministic from `seed` and `now` — no RNG, so the same call always
/// produces the same fixture (useful for demo screenshots and doc examples).
pub fn generate(count: usize, now: DateTime<Utc>) -> Vec<WorkItem> {
    (0..count)
        .map(|i| generate_one(i as i64 + 1, now))
        .collect()
}

fn generate_one(id: i64, now: DateTime<Utc>) -> WorkItem {
    let item_type = TYPES[(id as usize) % TYPES.len()];
    let assignee = ASSIGNEES[(id as usize) % ASSIGNEES.len()];
    let created = now - Duration::days(10 + (id % 20));
    let active_entered = created + Duration::hours(4);

    // Roughly two-thirds of the fixture is completed, the rest active.
    let completed = id % 3 != 0;

    let mut transitions = vec![StateTransition::open("New", created)];
    transitions.last_mut().unwrap().close(active_entered);
    transitions.push(StateTransition::open("Active", active_entered));

    let (current_state, closed_date) = if completed {
        let closed = active_entered + Duration::days(1 + (id % 7));
        transitions.last_mut().unwrap().close(closed);
        transitions.push({
            let mut t = StateTransition::open("Closed", closed);
            t.close(closed);
            t
        });
        ("Closed".to_string(), Some(closed))
    } else {
        ("Active".to_string(), None)
    };

    let mut tags = HashSet::new();
    tags.insert("demo".to_string());

    WorkItem {
        id,
        title: format!("Demo item #{id}"),
        item_type: item_type.to_string(),
        current_state,
        assigned_to: assignee.to_string(),
        created_date: created,
        closed_date,
        priority: 1 + (id % 4) as i32,
        story_points: Some(((id % 5) + 1) as f64),
        effort_hours: None,
        tags,
        sprint: Some(format!("Sprint {}", 1 + id % 6)),
        transitions,
        area_path: Some("Demo\\Area".to_string()),
        iteration_path: Some(format!("Demo\\Sprint {}", 1 + id % 6)),
        url: None,
    }
}
