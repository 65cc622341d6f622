use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{AuthError, AuthResult};

/// Application-facing representation of a verified bearer token.
///
/// Carries the caller id, email, and name, plus the standard registered
/// claims needed to validate the token itself.
#[derive(Debug, Clone, Serialize)]
pub struct Claims {
    pub caller_id: String,
    pub email: String,
    pub name: String,
    pub expires_at: DateTime<Utc>,
    pub issued_at: Option<DateTime<Utc>>,
    pub issuer: String,
    pub audience: Vec<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub(crate) struct ClaimsRepr {
    pub caller_id: String,
    pub email: String,
    pub name: String,
    pub exp: i64,
    #[serde(default)]
    pub iat: Option<i64>,
    pub iss: String,
    #[serde(default)]
    pub aud: Option<AudienceRepr>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(untagged)]
pub(crate) enum AudienceRepr {
    Single(String),
    Many(Vec<String>),
}

impl TryFrom<ClaimsRepr> for Claims {
    type Error = AuthError;

    fn try_from(value: ClaimsRepr) -> AuthResult<Self> {
        let expires_at = Utc
            .timestamp_opt(value.exp, 0)
            .single()
            .ok_or_else(|| AuthError::InvalidClaim("exp", value.exp.to_string()))?;

        let issued_at = match value.iat {
            Some(iat) => Some(
                Utc.timestamp_opt(iat, 0)
                    .single()
                    .ok_or_else(|| AuthError::InvalidClaim("iat", iat.to_string()))?,
            ),
            None => None,
        };

        let audience = match value.aud {
            Some(AudienceRepr::Single(item)) => vec![item],
            Some(AudienceRepr::Many(items)) => items,
            None => Vec::new(),
        };

        Ok(Self {
            caller_id: value.caller_id,
            email: value.email,
            name: value.name,
            expires_at,
            issued_at,
            issuer: value.iss,
            audience,
        })
    }
}

impl From<&Claims> for ClaimsRepr {
    fn from(value: &Claims) -> Self {
        ClaimsRepr {
            caller_id: value.caller_id.clone(),
            email: value.email.clone(),
            name: value.name.clone(),
            exp: value.expires_at.timestamp(),
            iat: value.issued_at.map(|t| t.timestamp()),
            iss: value.issuer.clone(),
            aud: Some(AudienceRepr::Many(value.audience.clone())),
        }
    }
}

/// Well-known caller id format: `CL-` followed by 12 uppercase hex digits.
pub fn generate_caller_id() -> String {
    format!("CL-{:012X}", Uuid::new_v4().as_u128() & 0xFFFF_FFFF_FFFF)
}
