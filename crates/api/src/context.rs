use pantry_auth::{AccessClaims, Role};
use pantry_core::UserId;

/// Authenticated caller of a request (token subject and roles).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserContext {
    user_id: UserId,
    roles: Vec<Role>,
}

impl UserContext {
    pub fn new(user_id: UserId, roles: Vec<Role>) -> Self {
        Self { user_id, roles }
    }

    pub fn user_id(&self) -> UserId {
        self.user_id
    }

    pub fn roles(&self) -> &[Role] {
        &self.roles
    }

    pub fn has_role(&self, role: &Role) -> bool {
        self.roles.iter().any(|r| r == role)
    }
}

impl From<AccessClaims> for UserContext {
    fn from(claims: AccessClaims) -> Self {
        Self::new(claims.sub, claims.roles)
    }
}
