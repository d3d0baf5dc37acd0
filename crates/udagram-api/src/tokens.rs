use std::sync::Arc;

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use chrono::{Duration, Utc};
use jsonwebtoken::{DecodingKey, EncodingKey, Header, Validation, decode, encode};
use sha2::{Digest, Sha256};
use uuid::Uuid;

use udagram_types::api::TokenPair;
use udagram_types::models::Claims;

/// HMAC keys for access tokens. Both services hold the same secret.
pub struct JwtKeys {
    encoding: EncodingKey,
    decoding: DecodingKey,
}

impl JwtKeys {
    pub fn new(secret: &str) -> Self {
        Self {
            encoding: EncodingKey::from_secret(secret.as_bytes()),
            decoding: DecodingKey::from_secret(secret.as_bytes()),
        }
    }

    pub fn verify(&self, token: &str) -> jsonwebtoken::errors::Result<Claims> {
        decode::<Claims>(token, &self.decoding, &Validation::default()).map(|data| data.claims)
    }
}

/// A freshly minted token pair plus the digest under which the refresh
/// token is stored.
pub struct IssuedTokens {
    pub pair: TokenPair,
    pub refresh_digest: String,
}

pub struct TokenIssuer {
    keys: Arc<JwtKeys>,
    access_ttl: Duration,
    refresh_ttl: Duration,
}

impl TokenIssuer {
    pub fn new(keys: Arc<JwtKeys>, access_ttl_secs: i64, refresh_ttl_secs: i64) -> Self {
        Self {
            keys,
            access_ttl: Duration::seconds(access_ttl_secs),
            refresh_ttl: Duration::seconds(refresh_ttl_secs),
        }
    }

    pub fn keys(&self) -> Arc<JwtKeys> {
        self.keys.clone()
    }

    pub fn issue(&self, user_id: Uuid, email: &str) -> anyhow::Result<IssuedTokens> {
        let now = Utc::now();
        let access_token_expiry = (now + self.access_ttl).timestamp();
        let refresh_token_expiry = (now + self.refresh_ttl).timestamp();

        let claims = Claims {
            sub: user_id,
            email: email.to_string(),
            exp: access_token_expiry as usize,
        };
        let access_token = encode(&Header::default(), &claims, &self.keys.encoding)?;

        let raw: [u8; 32] = rand::random();
        let refresh_token = URL_SAFE_NO_PAD.encode(raw);

        Ok(IssuedTokens {
            refresh_digest: refresh_digest(&refresh_token),
            pair: TokenPair {
                access_token,
                access_token_expiry,
                refresh_token,
                refresh_token_expiry,
            },
        })
    }
}

/// Storage key of a refresh token: hex SHA-256 of the opaque value.
pub fn refresh_digest(token: &str) -> String {
    hex::encode(Sha256::digest(token.as_bytes()))
}
