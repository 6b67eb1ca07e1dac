//! Configuration Model (C6): state classification, per-type policy, and
//! calculation parameters, loaded once at process start and cached for the
//! process lifetime.

use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::path::Path;

/// The three named state buckets the calculator classifies against.
#[derive(Debug, Clone, Default, Serialize)]
pub struct StateConfiguration {
    pub active_states: HashSet<String>,
    pub completion_states: HashSet<String>,
    pub blocked_states: HashSet<String>,
}

/// Built-in fallback used when neither recognized document shape is present,
/// or as a last resort for a work-item type with no explicit mapping.
fn built_in_default() -> StateConfiguration {
    StateConfiguration {
        active_states: ["Active", "In Progress", "Committed"]
            .iter()
            .map(|s| s.to_string())
            .collect(),
        completion_states: ["Closed", "Done", "Resolved"]
            .iter()
            .map(|s| s.to_string())
            .collect(),
        blocked_states: ["Blocked"].iter().map(|s| s.to_string()).collect(),
    }
}

/// A fallback map from work-item type to its single "done" state, consulted
/// only when a type's completion state can't be derived from either
/// recognized document shape — in practice unreachable once `stateMappings`
/// or `stateCategories` is present, but specified for completeness.
fn default_state_for_type() -> HashMap<String, String> {
    [
        ("Bug".to_string(), "Closed".to_string()),
        ("Task".to_string(), "Closed".to_string()),
        ("User Story".to_string(), "Done".to_string()),
        ("Feature".to_string(), "Done".to_string()),
        ("Epic".to_string(), "Done".to_string()),
    ]
    .into_iter()
    .collect()
}

/// Warning recorded when the loaded document had unknown keys or a shape
/// that required falling back to defaults — never fatal.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConfigWarning {
    pub message: String,
}

/// Shape (a): explicit state lists under `stateMappings`.
#[derive(Debug, Deserialize, Default)]
struct StateMappings {
    #[serde(default, rename = "activeStates")]
    active_states: Vec<String>,
    #[serde(default, rename = "completionStates")]
    completion_states: Vec<String>,
    #[serde(default, rename = "blockedStates")]
    blocked_states: Vec<String>,
}

/// Shape (b): per-state boolean flags under `stateCategories`.
#[derive(Debug, Deserialize)]
struct StateCategoryFlags {
    #[serde(default, rename = "isActive")]
    is_active: bool,
    #[serde(default, rename = "isCompletedState")]
    is_completed_state: bool,
    #[serde(default, rename = "isBlockedState")]
    is_blocked_state: bool,
}

/// Raw on-disk document; both shapes may be present, in which case they are
/// merged rather than one taking exclusive precedence.
#[derive(Debug, Deserialize, Default)]
pub struct RawStateDocument {
    #[serde(default, rename = "stateMappings")]
    state_mappings: Option<StateMappings>,
    #[serde(default, rename = "stateCategories")]
    state_categories: Option<HashMap<String, StateCategoryFlags>>,
}

impl StateConfiguration {
    /// Build a `StateConfiguration` from a raw document, returning any
    /// warnings generated along the way. Falls back to the built-in default
    /// when neither shape is present.
    pub fn from_raw(doc: RawStateDocument) -> (Self, Vec<ConfigWarning>) {
        let mut warnings = Vec::new();
        let mut config = StateConfiguration::default();
        let mut any_shape_present = false;

        if let Some(mappings) = doc.state_mappings {
            any_shape_present = true;
            config.active_states.extend(mappings.active_states);
            config.completion_states.extend(mappings.completion_states);
            config.blocked_states.extend(mappings.blocked_states);
        }

        if let Some(categories) = doc.state_categories {
            any_shape_present = true;
            for (state, flags) in categories {
                if flags.is_active {
                    config.active_states.insert(state.clone());
                }
                if flags.is_completed_state {
                    config.completion_states.insert(state.clone());
                }
                if flags.is_blocked_state {
                    config.blocked_states.insert(state.clone());
                }
            }
        }

        if !any_shape_present {
            warnings.push(ConfigWarning {
                message: "no stateMappings or stateCategories found; using built-in defaults"
                    .to_string(),
            });
            config = built_in_default();
        }

        let overlap: HashSet<_> = config
            .active_states
            .intersection(&config.completion_states)
            .cloned()
            .collect();
        if !overlap.is_empty() {
            warnings.push(ConfigWarning {
                message: format!(
                    "states classified as both active and completed: {overlap:?}"
                ),
            });
        }

        (config, warnings)
    }

    pub fn is_active(&self, state: &str) -> bool {
        self.active_states.contains(state)
    }

    pub fn is_completed(&self, state: &str) -> bool {
        self.completion_states.contains(state)
    }

    pub fn is_blocked(&self, state: &str) -> bool {
        self.blocked_states.contains(state)
    }
}

/// Per-work-item-type calculation policy.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct TypePolicy {
    #[serde(default = "default_true")]
    pub include_in_throughput: bool,
    #[serde(default = "default_true")]
    pub include_in_velocity: bool,
    #[serde(default = "default_one")]
    pub complexity_multiplier: f64,
    #[serde(default)]
    pub lead_time_threshold_days: Option<f64>,
    #[serde(default)]
    pub cycle_time_threshold_days: Option<f64>,
}

fn default_true() -> bool {
    true
}
fn default_one() -> f64 {
    1.0
}

impl Default for TypePolicy {
    /// The permissive default applied to any work-item type with no
    /// explicit entry (spec.md §4.6).
    fn default() -> Self {
        Self {
            include_in_throughput: true,
            include_in_velocity: true,
            complexity_multiplier: 1.0,
            lead_time_threshold_days: None,
            cycle_time_threshold_days: None,
        }
    }
}

impl TypePolicy {
    pub fn clamp_multiplier(&mut self) {
        self.complexity_multiplier = self.complexity_multiplier.clamp(0.1, 10.0);
    }
}

#[derive(Debug, Clone)]
pub struct TypePolicies {
    policies: HashMap<String, TypePolicy>,
}

impl TypePolicies {
    pub fn new(mut policies: HashMap<String, TypePolicy>) -> Self {
        for policy in policies.values_mut() {
            policy.clamp_multiplier();
        }
        Self { policies }
    }

    pub fn get(&self, item_type: &str) -> TypePolicy {
        self.policies.get(item_type).cloned().unwrap_or_default()
    }
}

/// Global calculation parameters.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CalculationParameters {
    #[serde(default = "default_throughput_period")]
    pub throughput_period_days: u32,
    #[serde(default = "default_lookback")]
    pub default_lookback_days: u32,
    #[serde(default = "default_percentiles")]
    pub percentiles: Vec<u8>,
}

fn default_throughput_period() -> u32 {
    30
}
fn default_lookback() -> u32 {
    90
}
fn default_percentiles() -> Vec<u8> {
    vec![50, 85, 95]
}

impl Default for CalculationParameters {
    fn default() -> Self {
        Self {
            throughput_period_days: default_throughput_period(),
            default_lookback_days: default_lookback(),
            percentiles: default_percentiles(),
        }
    }
}

/// The full configuration bundle handed to the calculator, assembled once
/// and passed by value rather than read from a global (spec.md §9).
#[derive(Debug, Clone)]
pub struct CalculatorConfig {
    pub states: StateConfiguration,
    pub type_policies: TypePolicies,
    pub parameters: CalculationParameters,
    pub configuration_degraded: bool,
}

impl CalculatorConfig {
    pub fn default_state_for_type(item_type: &str) -> Option<String> {
        default_state_for_type().get(item_type).cloned()
    }
}

/// The on-disk document combining C6's three logical stores (spec.md §4.6):
/// `workflow_states`, `work_item_types`, `calculation_parameters`.
#[derive(Debug, Deserialize, Default)]
pub struct RawConfigDocument {
    #[serde(default, rename = "workflowStates")]
    pub workflow_states: RawStateDocument,
    #[serde(default, rename = "workItemTypes")]
    pub work_item_types: HashMap<String, TypePolicy>,
    #[serde(default, rename = "calculationParameters")]
    pub calculation_parameters: Option<CalculationParameters>,
}

fn degraded_defaults(warning: ConfigWarning) -> (CalculatorConfig, Vec<ConfigWarning>) {
    let (states, mut warnings) = StateConfiguration::from_raw(RawStateDocument::default());
    warnings.push(warning);
    (
        CalculatorConfig {
            states,
            type_policies: TypePolicies::new(HashMap::new()),
            parameters: CalculationParameters::default(),
            configuration_degraded: true,
        },
        warnings,
    )
}

/// Loads the three C6 stores from `path`, validated against `RawConfigDocument`'s
/// declared schema. Falls back to built-in defaults and a `configuration_degraded`
/// flag when the file is missing or malformed (spec.md §4.6).
pub fn load_calculator_config(path: &Path) -> (CalculatorConfig, Vec<ConfigWarning>) {
    let bytes = match std::fs::read(path) {
        Ok(bytes) => bytes,
        Err(_) => {
            return degraded_defaults(ConfigWarning {
                message: format!(
                    "config document not found at {}; using built-in defaults",
                    path.display()
                ),
            })
        }
    };

    let doc: RawConfigDocument = match serde_json::from_slice(&bytes) {
        Ok(doc) => doc,
        Err(e) => {
            return degraded_defaults(ConfigWarning {
                message: format!(
                    "config document at {} is malformed ({e}); using built-in defaults",
                    path.display()
                ),
            })
        }
    };

    let (states, warnings) = StateConfiguration::from_raw(doc.workflow_states);
    let configuration_degraded = !warnings.is_empty();
    (
        CalculatorConfig {
            states,
            type_policies: TypePolicies::new(doc.work_item_types),
            parameters: doc.calculation_parameters.unwrap_or_default(),
            configuration_degraded,
        },
        warnings,
    )
}
