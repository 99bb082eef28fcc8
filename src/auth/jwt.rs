use anyhow::Result;
use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::config::AppConfig;

#[derive(Clone)]
pub struct JwtService {
    encoding: EncodingKey,
    decoding: DecodingKey,
    issuer: String,
    audience: String,
    expiry: Duration,
}

impl JwtService {
    pub fn from_config(config: &AppConfig) -> Result<Self> {
        Ok(Self::new(
            &config.jwt_secret,
            &config.jwt_issuer,
            &config.jwt_audience,
            Duration::minutes(config.jwt_expiry_minutes),
        ))
    }

    pub fn new(secret: &str, issuer: &str, audience: &str, expiry: Duration) -> Self {
        Self {
            encoding: EncodingKey::from_secret(secret.as_bytes()),
            decoding: DecodingKey::from_secret(secret.as_bytes()),
            issuer: issuer.to_owned(),
            audience: audience.to_owned(),
            expiry,
        }
    }

    pub fn expires_in_seconds(&self) -> i64 {
        self.expiry.num_seconds()
    }

    pub fn generate_token(
        &self,
        user_id: Uuid,
        username: &str,
        role: &str,
        org_unit_id: Option<Uuid>,
    ) -> Result<String> {
        let now = Utc::now();
        let exp = now + self.expiry;
        let claims = Claims {
            sub: user_id,
            username: username.to_owned(),
            role: role.to_owned(),
            org_unit_id,
            iss: self.issuer.clone(),
            aud: self.audience.clone(),
            iat: now.timestamp() as usize,
            exp: exp.timestamp() as usize,
        };

        Ok(encode(&Header::default(), &claims, &self.encoding)?)
    }

    pub fn verify_token(&self, token: &str) -> Result<Claims> {
        let mut validation = Validation::default();
        validation.set_audience(&[self.audience.clone()]);
        validation.set_issuer(&[self.issuer.clone()]);
        let data = decode::<Claims>(token, &self.decoding, &validation)?;
        Ok(data.claims)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: Uuid,
    pub username: String,
    pub role: String,
    #[serde(default)]
    pub org_unit_id: Option<Uuid>,
    pub iss: String,
    pub aud: String,
    pub iat: usize,
    pub exp: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn service(secret: &str, expiry: Duration) -> JwtService {
        JwtService::new(secret, "servicedesk", "servicedesk-clients", expiry)
    }

    #[test]
    fn token_roundtrip_carries_identity() {
        let jwt = service("secret", Duration::hours(24));
        let user_id = Uuid::new_v4();
        let unit = Some(Uuid::new_v4());
        let token = jwt
            .generate_token(user_id, "alice", "user", unit)
            .unwrap();

        let claims = jwt.verify_token(&token).unwrap();
        assert_eq!(claims.sub, user_id);
        assert_eq!(claims.username, "alice");
        assert_eq!(claims.role, "user");
        assert_eq!(claims.org_unit_id, unit);
        assert_eq!(claims.exp - claims.iat, 24 * 3600);
    }

    #[test]
    fn rejects_token_signed_with_other_secret() {
        let token = service("one", Duration::hours(1))
            .generate_token(Uuid::new_v4(), "bob", "technician", None)
            .unwrap();
        assert!(service("two", Duration::hours(1)).verify_token(&token).is_err());
    }

    #[test]
    fn rejects_expired_token() {
        // well past the default 60s leeway
        let jwt = service("secret", Duration::minutes(-10));
        let token = jwt
            .generate_token(Uuid::new_v4(), "carol", "agent", None)
            .unwrap();
        assert!(jwt.verify_token(&token).is_err());
    }

    #[test]
    fn rejects_garbage() {
        let jwt = service("secret", Duration::hours(1));
        assert!(jwt.verify_token("not-a-token").is_err());
    }
}
