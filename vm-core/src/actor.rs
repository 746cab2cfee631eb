use serde::{Deserialize, Serialize};

/// Role mirrored from the identity layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Admin,
    Standard,
    Guest,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Admin => "admin",
            Role::Standard => "standard",
            Role::Guest => "guest",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "admin" => Some(Role::Admin),
            "standard" => Some(Role::Standard),
            "guest" => Some(Role::Guest),
            _ => None,
        }
    }
}

/// The caller of an orchestrator operation, as vouched for by the identity
/// layer. Passed explicitly to every operation; there is no ambient
/// "current user".
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Actor {
    pub tenant_id: String,
    pub role: Role,
}

impl Actor {
    pub fn new(tenant_id: impl Into<String>, role: Role) -> Self {
        Self {
            tenant_id: tenant_id.into(),
            role,
        }
    }

    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }

    /// Admins and standard users may drive lifecycle operations; guests may
    /// only read.
    pub fn can_operate(&self) -> bool {
        matches!(self.role, Role::Admin | Role::Standard)
    }

    /// Owner of the resource, or holder of the administrative capability.
    pub fn can_act_on(&self, owner_id: &str) -> bool {
        self.is_admin() || self.tenant_id == owner_id
    }
}
