//! Workflow transition validation.
//!
//! Pure functions over declarations and records; no I/O. A proposed change
//! must be legal on every workflow field it touches or it is rejected as a
//! whole.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::entity::WorkflowDeclaration;

/// A transition that passed validation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransitionResult {
    pub field: String,
    pub from: String,
    pub to: String,
    /// Events declared on the matched transition.
    pub triggers: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum WorkflowError {
    /// No declared transition leads from `from` to `to`. An empty
    /// `valid_targets` means `from` is terminal.
    #[error("cannot move `{field}` from `{from}` to `{to}`")]
    IllegalTransition {
        field: String,
        from: String,
        to: String,
        valid_targets: Vec<String>,
    },
    #[error("moving `{field}` from `{from}` to `{to}` requires `{required}`")]
    MissingRequiredField {
        field: String,
        from: String,
        to: String,
        required: String,
    },
    /// A new record tried to start in a state no transition leaves from.
    #[error("`{value}` is not a valid starting state for `{field}`")]
    InvalidEntryState {
        field: String,
        value: String,
        valid_entry_states: Vec<String>,
    },
}

impl WorkflowError {
    #[must_use]
    pub fn field(&self) -> &str {
        match self {
            Self::IllegalTransition { field, .. }
            | Self::MissingRequiredField { field, .. }
            | Self::InvalidEntryState { field, .. } => field,
        }
    }
}

fn state_label(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}

fn is_missing(value: Option<&Value>) -> bool {
    match value {
        None | Some(Value::Null) => true,
        Some(Value::String(s)) => s.is_empty(),
        Some(_) => false,
    }
}

/// Validates every workflow field touched by `changes` against `current`.
///
/// Fields in `changes` that carry no workflow produce no results. A change
/// that leaves the state as it is counts as untouched. When the current
/// record has no state yet, the target must be a legal entry state.
///
/// # Errors
///
/// Returns the first illegal transition or unmet requirement found.
pub fn validate_transitions(
    workflows: &[WorkflowDeclaration],
    changes: &Map<String, Value>,
    current: &Map<String, Value>,
) -> Result<Vec<TransitionResult>, WorkflowError> {
    let mut results = Vec::new();

    for workflow in workflows {
        let Some(proposed) = changes.get(&workflow.field) else {
            continue;
        };
        let to = state_label(proposed).unwrap_or_default();
        let from = current.get(&workflow.field).and_then(state_label);

        let Some(from) = from else {
            if !workflow.is_entry_state(&to) {
                return Err(WorkflowError::InvalidEntryState {
                    field: workflow.field.clone(),
                    value: to,
                    valid_entry_states: workflow.entry_states(),
                });
            }
            continue;
        };
        if from == to {
            continue;
        }

        let Some(transition) = workflow.find(&from, &to) else {
            return Err(WorkflowError::IllegalTransition {
                field: workflow.field.clone(),
                valid_targets: workflow.targets_from(&from),
                from,
                to,
            });
        };

        for required in &transition.requires {
            let value = changes.get(required).or_else(|| current.get(required));
            if is_missing(value) {
                return Err(WorkflowError::MissingRequiredField {
                    field: workflow.field.clone(),
                    from,
                    to,
                    required: required.clone(),
                });
            }
        }

        results.push(TransitionResult {
            field: workflow.field.clone(),
            from,
            to,
            triggers: transition.triggers.clone(),
        });
    }

    Ok(results)
}

/// Checks that every workflow field present on a new record holds a legal
/// entry state.
///
/// # Errors
///
/// Returns [`WorkflowError::InvalidEntryState`] for the first offending field.
pub fn validate_entry_states(
    workflows: &[WorkflowDeclaration],
    record: &Map<String, Value>,
) -> Result<(), WorkflowError> {
    for workflow in workflows {
        let Some(value) = record.get(&workflow.field).and_then(state_label) else {
            continue;
        };
        if !workflow.is_entry_state(&value) {
            return Err(WorkflowError::InvalidEntryState {
                field: workflow.field.clone(),
                value,
                valid_entry_states: workflow.entry_states(),
            });
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;
    use serde_json::json;

    use super::*;
    use crate::entity::Transition;

    fn task_flow() -> WorkflowDeclaration {
        WorkflowDeclaration::new(
            "status",
            vec![
                Transition::new("todo", "in_progress"),
                Transition::new("in_progress", "review"),
                Transition::new("review", "done").triggers("task.completed"),
            ],
        )
    }

    fn obj(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap_or_default()
    }

    #[test]
    fn skipping_a_state_lists_valid_targets() {
        let err = validate_transitions(
            &[task_flow()],
            &obj(json!({"status": "done"})),
            &obj(json!({"status": "todo"})),
        )
        .unwrap_err();
        assert_eq!(
            err,
            WorkflowError::IllegalTransition {
                field: "status".into(),
                from: "todo".into(),
                to: "done".into(),
                valid_targets: vec!["in_progress".into()],
            }
        );
    }

    #[test]
    fn legal_step_succeeds() {
        let results = validate_transitions(
            &[task_flow()],
            &obj(json!({"status": "in_progress"})),
            &obj(json!({"status": "todo"})),
        )
        .unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].from, "todo");
        assert_eq!(results[0].to, "in_progress");
        assert!(results[0].triggers.is_empty());
    }

    #[test]
    fn terminal_state_has_no_targets() {
        for target in ["todo", "in_progress", "review"] {
            let err = validate_transitions(
                &[task_flow()],
                &obj(json!({"status": target})),
                &obj(json!({"status": "done"})),
            )
            .unwrap_err();
            assert!(matches!(
                err,
                WorkflowError::IllegalTransition { valid_targets, .. } if valid_targets.is_empty()
            ));
        }
    }

    #[test]
    fn unrelated_changes_produce_no_results() {
        let results = validate_transitions(
            &[task_flow()],
            &obj(json!({"title": "renamed"})),
            &obj(json!({"status": "todo"})),
        )
        .unwrap();
        assert!(results.is_empty());
    }

    #[test]
    fn triggers_are_carried_on_results() {
        let results = validate_transitions(
            &[task_flow()],
            &obj(json!({"status": "done"})),
            &obj(json!({"status": "review"})),
        )
        .unwrap();
        assert_eq!(results[0].triggers, vec!["task.completed"]);
    }

    #[test]
    fn required_field_gate() {
        let flow = WorkflowDeclaration::new(
            "stage",
            vec![Transition::new("lead", "qualified").requires("contactId")],
        );
        let current = obj(json!({"stage": "lead"}));

        let err = validate_transitions(&[flow.clone()], &obj(json!({"stage": "qualified"})), &current)
            .unwrap_err();
        assert_eq!(
            err,
            WorkflowError::MissingRequiredField {
                field: "stage".into(),
                from: "lead".into(),
                to: "qualified".into(),
                required: "contactId".into(),
            }
        );

        let empty = obj(json!({"stage": "qualified", "contactId": ""}));
        assert!(validate_transitions(&[flow.clone()], &empty, &current).is_err());

        let in_payload = obj(json!({"stage": "qualified", "contactId": "c1"}));
        assert!(validate_transitions(&[flow.clone()], &in_payload, &current).is_ok());

        let on_record = obj(json!({"stage": "lead", "contactId": "c1"}));
        assert!(validate_transitions(&[flow], &obj(json!({"stage": "qualified"})), &on_record).is_ok());
    }

    #[test]
    fn all_touched_workflows_must_be_legal() {
        let payment = WorkflowDeclaration::new("payment", vec![Transition::new("unpaid", "paid")]);
        let current = obj(json!({"status": "todo", "payment": "unpaid"}));

        let ok = validate_transitions(
            &[task_flow(), payment.clone()],
            &obj(json!({"status": "in_progress", "payment": "paid"})),
            &current,
        )
        .unwrap();
        assert_eq!(ok.len(), 2);

        let err = validate_transitions(
            &[task_flow(), payment],
            &obj(json!({"status": "in_progress", "payment": "refunded"})),
            &current,
        )
        .unwrap_err();
        assert_eq!(err.field(), "payment");
    }

    #[test]
    fn unchanged_state_is_not_a_transition() {
        let results = validate_transitions(
            &[task_flow()],
            &obj(json!({"status": "done"})),
            &obj(json!({"status": "done"})),
        )
        .unwrap();
        assert!(results.is_empty());
    }

    #[test]
    fn entry_states() {
        let flow = task_flow();
        assert!(validate_entry_states(&[flow.clone()], &obj(json!({"status": "todo"}))).is_ok());
        assert!(validate_entry_states(&[flow.clone()], &obj(json!({}))).is_ok());
        let err = validate_entry_states(&[flow], &obj(json!({"status": "done"}))).unwrap_err();
        assert!(matches!(
            err,
            WorkflowError::InvalidEntryState { valid_entry_states, .. }
                if valid_entry_states == vec!["todo", "in_progress", "review"]
        ));
    }

    proptest! {
        #[test]
        fn rejection_lists_exactly_the_outgoing_targets(
            edges in proptest::collection::vec((0u8..5, 0u8..5), 0..12),
            from in 0u8..5,
            to in 0u8..5,
        ) {
            let transitions: Vec<Transition> = edges
                .iter()
                .map(|(a, b)| Transition::new(format!("s{a}"), format!("s{b}")))
                .collect();
            let flow = WorkflowDeclaration::new("state", transitions);
            let from = format!("s{from}");
            let to = format!("s{to}");
            let result = validate_transitions(
                &[flow.clone()],
                &obj(json!({"state": to.clone()})),
                &obj(json!({"state": from.clone()})),
            );
            let declared = flow.find(&from, &to).is_some();
            match result {
                Ok(_) => prop_assert!(declared || from == to),
                Err(WorkflowError::IllegalTransition { valid_targets, .. }) => {
                    prop_assert!(!declared);
                    let mut expected: Vec<String> = edges
                        .iter()
                        .filter(|(a, _)| format!("s{a}") == from)
                        .map(|(_, b)| format!("s{b}"))
                        .collect();
                    expected.dedup();
                    let mut got = valid_targets.clone();
                    got.sort();
                    expected.sort();
                    expected.dedup();
                    prop_assert_eq!(got, expected);
                }
                Err(other) => prop_assert!(false, "unexpected error {other:?}"),
            }
        }
    }
}
