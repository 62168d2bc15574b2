use anyhow::{anyhow, Result};
use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, TokenData, Validation};
use serde::{Deserialize, Serialize};

pub const TOKEN_ISSUER: &str = "olliechat";

#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    /// User id; every chat and prompt is owned by it.
    pub sub: String,
    pub exp: usize,
    pub iat: usize,
    pub iss: String,
}

#[derive(Debug, Serialize)]
pub struct TokenResponse {
    pub token: String,
    pub expires_at: String,
}

pub fn create_user_jwt(user_id: &str, secret: &str, duration_hours: i64) -> Result<TokenResponse> {
    if user_id.trim().is_empty() {
        return Err(anyhow!("user id must not be empty"));
    }
    let now = Utc::now();
    let exp = now
        .checked_add_signed(Duration::hours(duration_hours))
        .ok_or_else(|| anyhow!("token lifetime of {} hours is out of range", duration_hours))?;

    let claims = Claims {
        sub: user_id.to_string(),
        exp: exp.timestamp() as usize,
        iat: now.timestamp() as usize,
        iss: TOKEN_ISSUER.to_string(),
    };

    let token = encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(secret.as_ref()),
    )?;

    Ok(TokenResponse {
        token,
        expires_at: exp.to_rfc3339(),
    })
}

pub fn decode_jwt(token: &str, secret: &str) -> Result<Claims> {
    let mut validation = Validation::default();
    validation.set_issuer(&[TOKEN_ISSUER]);

    let token_data: TokenData<Claims> = decode(
        token,
        &DecodingKey::from_secret(secret.as_ref()),
        &validation,
    )?;

    Ok(token_data.claims)
}
