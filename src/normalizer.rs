//! Normalizer (C5): merges a detail record with its history into a canonical
//! `WorkItem`, reconstructing the ordered state-transition sequence.

use crate::batch_fetch::RawDetail;
use crate::models::{HistoryEntry, StateTransition, ValidationError, WorkItem};
use chrono::{DateTime, Utc};
use std::collections::HashSet;
use tracing::debug;

/// Synthetic terminal state used when an item is closed but its history
/// never recorded an entry into a completion state (spec.md §4.5 edge case).
const SYNTHETIC_DONE_STATE: &str = "Done";

pub fn normalize(
    detail: &RawDetail,
    history: &[HistoryEntry],
    organization_url: &str,
    project: &str,
) -> Result<WorkItem, ValidationError> {
    let fields = &detail.fields;

    if let Some(closed) = fields.closed_date {
        if closed < fields.created_date {
            return Err(ValidationError {
                id: detail.id,
                kind: "temporal".to_string(),
                message: format!(
                    "closed_date {closed} precedes created_date {}",
                    fields.created_date
                ),
            });
        }
    }

    let transitions = reconstruct_transitions(detail, history);

    let tags = fields
        .tags
        .as_deref()
        .map(|s| {
            s.split(';')
                .map(|t| t.trim().to_string())
                .filter(|t| !t.is_empty())
                .collect::<HashSet<_>>()
        })
        .unwrap_or_default();

    debug!(item_id = detail.id, transitions = transitions.len(), "normalized work item");

    Ok(WorkItem {
        id: detail.id,
        title: fields.title.clone(),
        item_type: fields.work_item_type.clone(),
        current_state: fields.state.clone(),
        assigned_to: fields
            .assigned_to
            .as_ref()
            .and_then(|a| a.display_name.clone())
            .unwrap_or_default(),
        created_date: fields.created_date,
        closed_date: fields.closed_date,
        priority: fields.priority.unwrap_or(3),
        story_points: fields.story_points,
        effort_hours: fields.effort_hours,
        tags,
        sprint: fields.iteration_path.clone(),
        transitions,
        area_path: fields.area_path.clone(),
        iteration_path: fields.iteration_path.clone(),
        url: Some(format!(
            "{}/{}/_workitems/edit/{}",
            organization_url.trim_end_matches('/'),
            project,
            detail.id
        )),
    })
}

fn reconstruct_transitions(detail: &RawDetail, history: &[HistoryEntry]) -> Vec<StateTransition> {
    let fields = &detail.fields;

    // Step 1: seed with the state the first history entry leaves, or the
    // current state if there's no usable history.
    let (seed_state, seed_date): (String, DateTime<Utc>) = match history.first() {
        Some(first) => (first.state.clone(), fields.created_date),
        None => (fields.state.clone(), fields.created_date),
    };

    let mut transitions = vec![StateTransition::open(seed_state, seed_date)];

    // Step 2: walk history, closing/opening transitions, coalescing
    // consecutive identical states and skipping non-state-change entries
    // (both folded together since our history stream is pre-filtered to
    // state-bearing entries: coalescing is the only remaining case).
    for entry in history {
        let current_state = transitions.last().unwrap().state.clone();
        if entry.state == current_state {
            continue;
        }
        transitions
            .last_mut()
            .unwrap()
            .close(entry.changed_date);
        transitions.push(StateTransition::open(entry.state.clone(), entry.changed_date));
    }

    // Step 3 + synthetic fallback: close the terminal transition at
    // closed_date if the item is completed.
    if let Some(closed_date) = fields.closed_date {
        let last = transitions.last_mut().unwrap();
        if last.is_open() {
            if last.state == fields.state {
                last.close(closed_date);
            } else {
                // History never carried us into the detail's reported
                // current (completed) state — append a synthetic closure.
                last.close(closed_date);
                let mut synthetic = StateTransition::open(SYNTHETIC_DONE_STATE, closed_date);
                synthetic.synthetic = true;
                synthetic.close(closed_date);
                transitions.push(synthetic);
            }
        }
    }

    transitions
}
