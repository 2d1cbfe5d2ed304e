//! First-match-wins permission rules.
//!
//! Rules are scanned in declaration order; the first rule whose conditions
//! all hold decides. When nothing matches the answer is deny, so an empty
//! or forgotten rule list never grants access.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::caller::{Caller, CallerKind};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Effect {
    Allow,
    Deny,
}

/// Ownership condition: the named field of the subject record must equal
/// the caller's user id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ownership {
    pub field: String,
}

/// One entry of an action's permission list.
///
/// Empty `caller_types` / `roles` mean "any". A rule with no conditions at
/// all matches every caller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PermissionRule {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub caller_types: Vec<CallerKind>,
    /// Matches when the caller holds at least one of these roles.
    #[serde(
        default,
        skip_serializing_if = "Vec::is_empty",
        alias = "role",
        deserialize_with = "one_or_many"
    )]
    pub roles: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ownership: Option<Ownership>,
    pub effect: Effect,
}

/// Accepts `"viewer"` as well as `["viewer", "guest"]`.
fn one_or_many<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum OneOrMany {
        One(String),
        Many(Vec<String>),
    }
    Ok(match OneOrMany::deserialize(deserializer)? {
        OneOrMany::One(role) => vec![role],
        OneOrMany::Many(roles) => roles,
    })
}

impl PermissionRule {
    #[must_use]
    pub fn allow() -> Self {
        Self {
            caller_types: Vec::new(),
            roles: Vec::new(),
            ownership: None,
            effect: Effect::Allow,
        }
    }

    #[must_use]
    pub fn deny() -> Self {
        Self {
            effect: Effect::Deny,
            ..Self::allow()
        }
    }

    #[must_use]
    pub fn for_callers(mut self, kinds: &[CallerKind]) -> Self {
        self.caller_types = kinds.to_vec();
        self
    }

    #[must_use]
    pub fn for_role(mut self, role: impl Into<String>) -> Self {
        self.roles.push(role.into());
        self
    }

    #[must_use]
    pub fn owned_via(mut self, field: impl Into<String>) -> Self {
        self.ownership = Some(Ownership { field: field.into() });
        self
    }

    /// Returns `true` when every condition of the rule holds for `caller`.
    ///
    /// `subject` is consulted only by the ownership condition. It is the
    /// stored record for actions that address an existing record, and the
    /// validated input otherwise.
    #[must_use]
    pub fn matches(&self, caller: &Caller, subject: &Map<String, Value>) -> bool {
        if !self.caller_types.is_empty() && !self.caller_types.contains(&caller.kind) {
            return false;
        }
        if !self.roles.is_empty() && !self.roles.iter().any(|r| caller.has_role(r)) {
            return false;
        }
        if let Some(ownership) = &self.ownership {
            let owner = subject.get(&ownership.field).and_then(Value::as_str);
            if owner != Some(caller.user_id.as_str()) {
                return false;
            }
        }
        true
    }
}

/// Outcome of evaluating a rule list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// Rule at `rule` allowed the call.
    Allow { rule: usize },
    /// Rule at `rule` denied the call, or (`None`) nothing matched.
    Deny { rule: Option<usize> },
}

impl Decision {
    #[must_use]
    pub fn is_allowed(self) -> bool {
        matches!(self, Self::Allow { .. })
    }
}

/// Evaluates `rules` against `caller`, first match wins, default deny.
#[must_use]
pub fn evaluate(rules: &[PermissionRule], caller: &Caller, subject: &Map<String, Value>) -> Decision {
    for (idx, rule) in rules.iter().enumerate() {
        if rule.matches(caller, subject) {
            return match rule.effect {
                Effect::Allow => Decision::Allow { rule: idx },
                Effect::Deny => Decision::Deny { rule: Some(idx) },
            };
        }
    }
    Decision::Deny { rule: None }
}
