//! Bearer-token authentication.
//!
//! Every path that derives an identity from a token goes through
//! [`TokenVerifier::verify`]; there is deliberately no way to read claims
//! out of a token without checking its signature.

mod extractors;
mod token;

pub use extractors::CurrentUser;
pub use token::{Claims, TokenIssuer, TokenVerifier};

use serde::{Deserialize, Serialize};

/// Caller role, carried in verified token claims.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Role {
    #[serde(rename = "USER")]
    User,
    #[serde(rename = "ADMIN")]
    Admin,
}

/// An authenticated caller, produced from verified claims only.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthenticatedUser {
    pub id: String,
    pub role: Role,
}

impl AuthenticatedUser {
    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_role_serde_uses_uppercase() {
        assert_eq!(serde_json::to_string(&Role::Admin).unwrap(), "\"ADMIN\"");
        assert_eq!(
            serde_json::from_str::<Role>("\"USER\"").unwrap(),
            Role::User
        );
    }

    #[test]
    fn test_is_admin() {
        let admin = AuthenticatedUser {
            id: "u1".to_string(),
            role: Role::Admin,
        };
        let user = AuthenticatedUser {
            id: "u2".to_string(),
            role: Role::User,
        };
        assert!(admin.is_admin());
        assert!(!user.is_admin());
    }
}
