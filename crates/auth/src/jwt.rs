use crate::error::{AuthError, Result};
use authcore_models::ProviderKind;
use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use rand::Rng;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Claims {
    pub sub: Uuid,                    // Identity ID
    pub tenant_id: Uuid,
    pub provider_kind: ProviderKind,
    pub mfa_verified: bool,
    pub iat: i64,
    pub exp: i64,
    pub jti: Uuid,                    // Key of the revocation list
    pub token_type: TokenType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sid: Option<Uuid>,            // Session the access token belongs to
    pub iss: String,
}

impl Claims {
    pub fn expires_at(&self) -> DateTime<Utc> {
        DateTime::from_timestamp(self.exp, 0).unwrap_or_else(Utc::now)
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TokenType {
    Access,
    /// Issued after the first factor; only good for completing MFA.
    MfaPending,
}

/// A signed token and the metadata callers store about it.
#[derive(Debug, Clone)]
pub struct IssuedToken {
    pub token: String,
    pub jti: Uuid,
    pub expires_at: DateTime<Utc>,
}

/// Subject of a token about to be signed.
#[derive(Debug, Clone, Copy)]
pub struct TokenSubject {
    pub identity_id: Uuid,
    pub tenant_id: Uuid,
    pub provider_kind: ProviderKind,
    pub mfa_verified: bool,
}

#[derive(Clone)]
pub struct JwtService {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    algorithm: Algorithm,
    issuer: String,
}

impl JwtService {
    pub fn new(secret: &str, issuer: &str) -> Self {
        Self {
            encoding_key: EncodingKey::from_secret(secret.as_bytes()),
            decoding_key: DecodingKey::from_secret(secret.as_bytes()),
            algorithm: Algorithm::HS256,
            issuer: issuer.to_string(),
        }
    }

    /// Sign an access token for a session. `jti` is chosen by the caller so
    /// it can be stored before the token leaves the process.
    pub fn issue_access_token(
        &self,
        subject: TokenSubject,
        session_id: Uuid,
        jti: Uuid,
        ttl: Duration,
    ) -> Result<IssuedToken> {
        self.issue(subject, Some(session_id), jti, TokenType::Access, ttl)
    }

    pub fn issue_mfa_token(&self, subject: TokenSubject, ttl: Duration) -> Result<IssuedToken> {
        self.issue(subject, None, Uuid::new_v4(), TokenType::MfaPending, ttl)
    }

    fn issue(
        &self,
        subject: TokenSubject,
        sid: Option<Uuid>,
        jti: Uuid,
        token_type: TokenType,
        ttl: Duration,
    ) -> Result<IssuedToken> {
        let now = Utc::now();
        let exp = now + ttl;

        let claims = Claims {
            sub: subject.identity_id,
            tenant_id: subject.tenant_id,
            provider_kind: subject.provider_kind,
            mfa_verified: subject.mfa_verified,
            iat: now.timestamp(),
            exp: exp.timestamp(),
            jti,
            token_type,
            sid,
            iss: self.issuer.clone(),
        };

        Ok(IssuedToken {
            token: encode(&Header::new(self.algorithm), &claims, &self.encoding_key)?,
            jti,
            expires_at: exp,
        })
    }

    /// Validate signature, issuer and expiry. No leeway: an expired token
    /// is expired.
    pub fn validate_token(&self, token: &str) -> Result<Claims> {
        let mut validation = Validation::new(self.algorithm);
        validation.leeway = 0;
        validation.set_issuer(&[&self.issuer]);

        decode::<Claims>(token, &self.decoding_key, &validation)
            .map(|data| data.claims)
            .map_err(|e| match e.kind() {
                jsonwebtoken::errors::ErrorKind::ExpiredSignature => AuthError::TokenExpired,
                _ => AuthError::InvalidToken(e.to_string()),
            })
    }

    pub fn validate_access_token(&self, token: &str) -> Result<Claims> {
        let claims = self.validate_token(token)?;

        if claims.token_type != TokenType::Access || claims.sid.is_none() {
            return Err(AuthError::InvalidToken(
                "Token is not an access token".to_string(),
            ));
        }

        Ok(claims)
    }

    pub fn validate_mfa_token(&self, token: &str) -> Result<Claims> {
        let claims = self.validate_token(token)?;

        if claims.token_type != TokenType::MfaPending {
            return Err(AuthError::InvalidToken(
                "Token is not an MFA token".to_string(),
            ));
        }

        Ok(claims)
    }
}

/// Opaque refresh handle: 32 random bytes, hex encoded.
pub fn generate_refresh_token() -> String {
    let mut rng = rand::thread_rng();
    let bytes: Vec<u8> = (0..32).map(|_| rng.gen()).collect();
    hex::encode(bytes)
}

/// Generate a SHA256 hash of a token (for storing in database)
pub fn hash_token(token: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(token.as_bytes());
    format!("{:x}", hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn subject() -> TokenSubject {
        TokenSubject {
            identity_id: Uuid::new_v4(),
            tenant_id: Uuid::new_v4(),
            provider_kind: ProviderKind::Local,
            mfa_verified: false,
        }
    }

    #[test]
    fn test_generate_and_validate_access_token() {
        let jwt = JwtService::new("test-secret-key-min-32-characters-long", "authcore");
        let subject = subject();
        let session_id = Uuid::new_v4();
        let jti = Uuid::new_v4();

        let issued = jwt
            .issue_access_token(subject, session_id, jti, Duration::minutes(15))
            .expect("Failed to generate token");

        let claims = jwt
            .validate_access_token(&issued.token)
            .expect("Failed to validate token");

        assert_eq!(claims.sub, subject.identity_id);
        assert_eq!(claims.tenant_id, subject.tenant_id);
        assert_eq!(claims.jti, jti);
        assert_eq!(claims.sid, Some(session_id));
        assert_eq!(claims.token_type, TokenType::Access);
    }

    #[test]
    fn test_invalid_token_type() {
        let jwt = JwtService::new("test-secret-key-min-32-characters-long", "authcore");
        let mfa = jwt.issue_mfa_token(subject(), Duration::minutes(5)).unwrap();

        let result = jwt.validate_access_token(&mfa.token);
        assert!(matches!(result, Err(AuthError::InvalidToken(_))));
        assert!(jwt.validate_mfa_token(&mfa.token).is_ok());
    }

    #[test]
    fn expired_tokens_are_reported_as_expired() {
        let jwt = JwtService::new("test-secret-key-min-32-characters-long", "authcore");
        let issued = jwt
            .issue_access_token(subject(), Uuid::new_v4(), Uuid::new_v4(), Duration::minutes(-2))
            .unwrap();
        assert!(matches!(jwt.validate_access_token(&issued.token), Err(AuthError::TokenExpired)));
    }

    #[test]
    fn foreign_signatures_and_issuers_are_rejected() {
        let ours = JwtService::new("test-secret-key-min-32-characters-long", "authcore");
        let theirs = JwtService::new("another-secret-key-min-32-characters", "authcore");
        let other_issuer = JwtService::new("test-secret-key-min-32-characters-long", "elsewhere");

        let forged = theirs
            .issue_access_token(subject(), Uuid::new_v4(), Uuid::new_v4(), Duration::minutes(5))
            .unwrap();
        assert!(matches!(ours.validate_token(&forged.token), Err(AuthError::InvalidToken(_))));

        let foreign = other_issuer
            .issue_access_token(subject(), Uuid::new_v4(), Uuid::new_v4(), Duration::minutes(5))
            .unwrap();
        assert!(matches!(ours.validate_token(&foreign.token), Err(AuthError::InvalidToken(_))));
        assert!(matches!(ours.validate_token("not.a.jwt"), Err(AuthError::InvalidToken(_))));
    }

    #[test]
    fn refresh_tokens_hash_stably() {
        let token = generate_refresh_token();
        assert_eq!(token.len(), 64);
        assert_eq!(hash_token(&token), hash_token(&token));
        assert_ne!(hash_token(&token), token);
    }
}
