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
        Ok(Self {
            encoding: EncodingKey::from_secret(config.jwt_secret.as_bytes()),
            decoding: DecodingKey::from_secret(config.jwt_secret.as_bytes()),
            issuer: config.jwt_issuer.clone(),
            audience: config.jwt_audience.clone(),
            expiry: Duration::minutes(config.jwt_expiry_minutes),
        })
    }

    pub fn expiry_seconds(&self) -> i64 {
        self.expiry.num_seconds()
    }

    /// Issues an access token bound to the user's current session epoch.
    pub fn generate_token(
        &self,
        user_id: Uuid,
        username: &str,
        role: &str,
        epoch: i64,
    ) -> Result<String> {
        let now = Utc::now();
        let exp = now + self.expiry;
        let claims = Claims {
            sub: user_id,
            username: username.to_owned(),
            role: role.to_owned(),
            epoch,
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
    pub epoch: i64,
    pub iss: String,
    pub aud: String,
    pub iat: usize,
    pub exp: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn service(secret: &str, audience: &str) -> JwtService {
        JwtService {
            encoding: EncodingKey::from_secret(secret.as_bytes()),
            decoding: DecodingKey::from_secret(secret.as_bytes()),
            issuer: "hvac-backend".to_string(),
            audience: audience.to_string(),
            expiry: Duration::minutes(480),
        }
    }

    #[test]
    fn tokens_carry_identity_and_epoch() {
        let jwt = service("secret", "hvac-clients");
        let user_id = Uuid::new_v4();
        let token = jwt.generate_token(user_id, "tecnico", "manager", 3).unwrap();

        let claims = jwt.verify_token(&token).unwrap();
        assert_eq!(claims.sub, user_id);
        assert_eq!(claims.username, "tecnico");
        assert_eq!(claims.role, "manager");
        assert_eq!(claims.epoch, 3);
        assert_eq!(claims.exp - claims.iat, 480 * 60);
        assert_eq!(jwt.expiry_seconds(), 480 * 60);
    }

    #[test]
    fn rejects_foreign_secret_or_audience() {
        let token = service("secret", "hvac-clients")
            .generate_token(Uuid::new_v4(), "a", "user", 0)
            .unwrap();
        assert!(service("other", "hvac-clients").verify_token(&token).is_err());
        assert!(service("secret", "someone-else").verify_token(&token).is_err());
    }
}
