use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};

use crate::claims::{Claims, ClaimsRepr};
use crate::config::JwtConfig;
use crate::error::AuthResult;

/// Signs and verifies HS256 bearer tokens carrying
/// `{caller_id, email, name}`. Issuer and audience come from
/// configuration rather than being hardcoded.
#[derive(Clone)]
pub struct JwtCodec {
    config: JwtConfig,
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
}

impl JwtCodec {
    pub fn new(config: JwtConfig) -> Self {
        let encoding_key = EncodingKey::from_secret(config.secret.as_bytes());
        let decoding_key = DecodingKey::from_secret(config.secret.as_bytes());
        Self {
            config,
            encoding_key,
            decoding_key,
        }
    }

    pub fn config(&self) -> &JwtConfig {
        &self.config
    }

    pub fn issue(&self, caller_id: &str, email: &str, name: &str) -> AuthResult<String> {
        let now = Utc::now();
        let claims = Claims {
            caller_id: caller_id.to_string(),
            email: email.to_string(),
            name: name.to_string(),
            expires_at: now + Duration::seconds(self.config.access_ttl_seconds),
            issued_at: Some(now),
            issuer: self.config.issuer.clone(),
            audience: vec![self.config.audience.clone()],
        };
        let repr = ClaimsRepr::from(&claims);
        let header = Header::new(Algorithm::HS256);
        let token = encode(&header, &repr, &self.encoding_key)?;
        Ok(token)
    }

    pub fn verify(&self, token: &str) -> AuthResult<Claims> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.set_issuer(&[self.config.issuer.clone()]);
        validation.set_audience(&[self.config.audience.clone()]);
        validation.leeway = self.config.leeway_seconds.into();

        let token_data = decode::<ClaimsRepr>(token, &self.decoding_key, &validation)?;
        Claims::try_from(token_data.claims)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn codec() -> JwtCodec {
        JwtCodec::new(JwtConfig::new("test-secret", "nexmedis-api", "nexmedis-clients"))
    }

    #[test]
    fn verify_sign_round_trips() {
        let codec = codec();
        let token = codec.issue("CL-ABCDEF123456", "a@acme.com", "Acme").expect("issue");
        let claims = codec.verify(&token).expect("verify");
        assert_eq!(claims.caller_id, "CL-ABCDEF123456");
        assert_eq!(claims.email, "a@acme.com");
        assert_eq!(claims.name, "Acme");
        assert_eq!(claims.issuer, "nexmedis-api");
        assert_eq!(claims.audience, vec!["nexmedis-clients".to_string()]);
    }

    #[test]
    fn verify_rejects_wrong_secret() {
        let issuer = codec();
        let token = issuer.issue("CL-ABCDEF123456", "a@acme.com", "Acme").expect("issue");
        let other = JwtCodec::new(JwtConfig::new("different-secret", "nexmedis-api", "nexmedis-clients"));
        assert!(other.verify(&token).is_err());
    }

    #[test]
    fn verify_rejects_wrong_audience() {
        let issuer = JwtCodec::new(JwtConfig::new("test-secret", "nexmedis-api", "clients-a"));
        let token = issuer.issue("CL-ABCDEF123456", "a@acme.com", "Acme").expect("issue");
        let verifier = JwtCodec::new(JwtConfig::new("test-secret", "nexmedis-api", "clients-b"));
        assert!(verifier.verify(&token).is_err());
    }
}
