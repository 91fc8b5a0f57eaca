use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Serialize, Deserialize)]
pub struct JwtHeader {
    pub alg: String,
    pub typ: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct JwtClaims {
    pub sub: String,
    pub exp: Option<u64>,
    pub email: Option<String>,
    pub role: Option<String>,
    pub app_metadata: Option<serde_json::Value>,
    pub user_metadata: Option<serde_json::Value>,
    pub aud: Option<String>,
    pub iat: Option<u64>,
}

/// Application role carried by every authenticated request.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Patient,
    Caregiver,
    Doctor,
    Admin,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::Patient => write!(f, "patient"),
            Role::Caregiver => write!(f, "caregiver"),
            Role::Doctor => write!(f, "doctor"),
            Role::Admin => write!(f, "admin"),
        }
    }
}

impl FromStr for Role {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "patient" | "paciente" => Ok(Role::Patient),
            "caregiver" | "cuidador" => Ok(Role::Caregiver),
            "doctor" | "medico" | "médico" => Ok(Role::Doctor),
            "admin" => Ok(Role::Admin),
            other => Err(format!("Unknown role: {}", other)),
        }
    }
}

/// The identity resolved from a validated token. Inserted into request
/// extensions by the auth middleware and trusted by every cell.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Actor {
    pub user_id: Uuid,
    pub role: Role,
    pub email: Option<String>,
    pub authenticated_at: Option<DateTime<Utc>>,
}

impl Actor {
    pub fn new(user_id: Uuid, role: Role) -> Self {
        Self {
            user_id,
            role,
            email: None,
            authenticated_at: None,
        }
    }

    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn role_parses_english_and_legacy_tags() {
        assert_eq!("patient".parse::<Role>().unwrap(), Role::Patient);
        assert_eq!("Cuidador".parse::<Role>().unwrap(), Role::Caregiver);
        assert_eq!("medico".parse::<Role>().unwrap(), Role::Doctor);
        assert_eq!(" admin ".parse::<Role>().unwrap(), Role::Admin);
        assert!("authenticated".parse::<Role>().is_err());
    }

    #[test]
    fn role_display_matches_serde_tag() {
        for role in [Role::Patient, Role::Caregiver, Role::Doctor, Role::Admin] {
            let serialized = serde_json::to_value(role).unwrap();
            assert_eq!(serialized, serde_json::json!(role.to_string()));
        }
    }
}
