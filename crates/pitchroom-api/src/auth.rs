use argon2::password_hash::{SaltString, rand_core::OsRng};
use argon2::{Argon2, PasswordHash, PasswordHasher, PasswordVerifier};
use axum::{Json, extract::State, http::StatusCode, response::IntoResponse};
use jsonwebtoken::{EncodingKey, Header, encode};
use uuid::Uuid;

use pitchroom_types::api::{
    Claims, LoginRequest, LoginResponse, RegisterRequest, RegisterResponse,
};
use pitchroom_types::models::{Role, User};

use crate::AppState;
use crate::error::ApiError;

pub async fn register(
    State(state): State<AppState>,
    Json(req): Json<RegisterRequest>,
) -> Result<impl IntoResponse, ApiError> {
    // Validate input
    if req.name.is_empty() || req.name.len() > 64 {
        return Err(ApiError::Validation("name must be 1-64 characters".into()));
    }
    if !req.email.contains('@') || req.email.len() > 254 {
        return Err(ApiError::Validation("invalid email address".into()));
    }
    if req.password.len() < 8 {
        return Err(ApiError::Validation("password must be at least 8 characters".into()));
    }

    // Email is the purchase reconciliation key; it must be unique.
    if state
        .db
        .get_user_by_email(&req.email)
        .map_err(ApiError::Store)?
        .is_some()
    {
        return Err(ApiError::Conflict("an account with this email already exists".into()));
    }

    // Hash password with Argon2id
    let salt = SaltString::generate(&mut OsRng);
    let argon2 = Argon2::default();
    let password_hash = argon2
        .hash_password(req.password.as_bytes(), &salt)
        .map_err(|e| ApiError::Store(anyhow::anyhow!("password hashing failed: {e}")))?
        .to_string();

    let user_id = Uuid::new_v4();
    let created_at = chrono::Utc::now().to_rfc3339();

    state
        .db
        .create_user(
            &user_id.to_string(),
            &req.name,
            &req.email,
            &password_hash,
            req.role.as_str(),
            &created_at,
        )
        .map_err(ApiError::Store)?;

    let token = create_token(&state.jwt_secret, user_id, &req.name, req.role)
        .map_err(ApiError::Store)?;

    Ok((StatusCode::CREATED, Json(RegisterResponse { user_id, token })))
}

pub async fn login(
    State(state): State<AppState>,
    Json(req): Json<LoginRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let row = state
        .db
        .get_user_by_email(&req.email)
        .map_err(ApiError::Store)?
        .ok_or(ApiError::Unauthorized)?;

    // Verify password
    let parsed_hash = PasswordHash::new(&row.password)
        .map_err(|e| ApiError::Store(anyhow::anyhow!("stored hash unreadable: {e}")))?;

    Argon2::default()
        .verify_password(req.password.as_bytes(), &parsed_hash)
        .map_err(|_| ApiError::Unauthorized)?;

    let user: User = row.into_user().map_err(ApiError::Store)?;

    let token = create_token(&state.jwt_secret, user.id, &user.name, user.role)
        .map_err(ApiError::Store)?;

    Ok(Json(LoginResponse {
        user_id: user.id,
        name: user.name,
        role: user.role,
        token,
    }))
}

fn create_token(secret: &str, user_id: Uuid, name: &str, role: Role) -> anyhow::Result<String> {
    let claims = Claims {
        sub: user_id,
        name: name.to_string(),
        role,
        exp: (chrono::Utc::now() + chrono::Duration::days(30)).timestamp() as usize,
    };

    let token = encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )?;

    Ok(token)
}

#[cfg(test)]
mod tests {
    use super::*;
    use jsonwebtoken::{DecodingKey, Validation, decode};

    #[test]
    fn issued_token_decodes_with_same_secret() {
        let user_id = Uuid::new_v4();
        let token = create_token("test-secret", user_id, "Ida", Role::Investor).unwrap();

        let data = decode::<Claims>(
            &token,
            &DecodingKey::from_secret(b"test-secret"),
            &Validation::default(),
        )
        .unwrap();
        assert_eq!(data.claims.sub, user_id);
        assert_eq!(data.claims.role, Role::Investor);

        let err = decode::<Claims>(
            &token,
            &DecodingKey::from_secret(b"wrong-secret"),
            &Validation::default(),
        );
        assert!(err.is_err());
    }
}
