use serde::{Deserialize, Serialize};

/// What kind of principal is invoking an action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CallerKind {
    #[serde(rename = "human")]
    Human,
    #[serde(rename = "ai-agent", alias = "ai_agent")]
    AiAgent,
    #[serde(rename = "system")]
    System,
    #[serde(rename = "webhook")]
    Webhook,
}

impl CallerKind {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Human => "human",
            Self::AiAgent => "ai-agent",
            Self::System => "system",
            Self::Webhook => "webhook",
        }
    }
}

/// Authenticated identity of whoever is dispatching an action.
///
/// Supplied by the authentication layer before dispatch is called. Every
/// data access performed on behalf of this caller is scoped to `tenant_id`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Caller {
    /// Identifier of the user (or agent / job) on whose behalf the call runs.
    pub user_id: String,
    /// Tenant isolation boundary for all data touched by the call.
    pub tenant_id: String,
    /// Roles assigned to this caller for permission evaluation.
    #[serde(default)]
    pub roles: Vec<String>,
    #[serde(rename = "type")]
    pub kind: CallerKind,
}

impl Caller {
    #[must_use]
    pub fn new(user_id: impl Into<String>, tenant_id: impl Into<String>, kind: CallerKind) -> Self {
        Self {
            user_id: user_id.into(),
            tenant_id: tenant_id.into(),
            roles: Vec::new(),
            kind,
        }
    }

    #[must_use]
    pub fn human(user_id: impl Into<String>, tenant_id: impl Into<String>) -> Self {
        Self::new(user_id, tenant_id, CallerKind::Human)
    }

    #[must_use]
    pub fn system(tenant_id: impl Into<String>) -> Self {
        Self::new("system", tenant_id, CallerKind::System)
    }

    /// Returns the caller with `role` appended to its role list.
    #[must_use]
    pub fn with_role(mut self, role: impl Into<String>) -> Self {
        self.roles.push(role.into());
        self
    }

    #[must_use]
    pub fn has_role(&self, role: &str) -> bool {
        self.roles.iter().any(|r| r == role)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn caller_kind_uses_hyphenated_wire_name() {
        let json = serde_json::to_string(&CallerKind::AiAgent).unwrap();
        assert_eq!(json, "\"ai-agent\"");
        let parsed: CallerKind = serde_json::from_str("\"ai_agent\"").unwrap();
        assert_eq!(parsed, CallerKind::AiAgent);
    }

    #[test]
    fn caller_deserializes_from_camel_case() {
        let caller: Caller = serde_json::from_str(
            r#"{"userId":"u1","tenantId":"t1","roles":["admin"],"type":"human"}"#,
        )
        .unwrap();
        assert_eq!(caller.user_id, "u1");
        assert!(caller.has_role("admin"));
        assert!(!caller.has_role("viewer"));
    }
}
