use serde::{Deserialize, Serialize};

/// Desk an operator works from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Clearance,
    Accounts,
    Administrator,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Actor {
    pub name: String,
    pub role: Role,
}

impl Actor {
    pub fn new(name: impl Into<String>, role: Role) -> Self {
        Self {
            name: name.into(),
            role,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Capability {
    EditClearance,
    IssueDeliveryNote,
    DeleteDeliveryNote,
    RequestPayment,
    ApprovePayment,
    ConfirmClearancePayment,
    SettlePayment,
    CompleteJob,
}

/// Capability oracle supplied by the host's authentication layer.
pub trait AuthorizationProvider: Send + Sync {
    fn has_capability(&self, actor: &Actor, capability: Capability) -> bool;
}

/// Static role table used when the host has no richer policy.
#[derive(Debug, Default, Clone, Copy)]
pub struct RoleCapabilities;

impl RoleCapabilities {
    pub const fn grants(role: Role, capability: Capability) -> bool {
        use Capability::*;
        match role {
            Role::Administrator => true,
            Role::Clearance => matches!(
                capability,
                EditClearance
                    | IssueDeliveryNote
                    | DeleteDeliveryNote
                    | RequestPayment
                    | ConfirmClearancePayment
            ),
            Role::Accounts => matches!(
                capability,
                RequestPayment | ApprovePayment | SettlePayment | CompleteJob
            ),
        }
    }
}

impl AuthorizationProvider for RoleCapabilities {
    fn has_capability(&self, actor: &Actor, capability: Capability) -> bool {
        Self::grants(actor.role, capability)
    }
}
