use axum::{
    extract::{Request, State},
    http::{StatusCode, header},
    middleware::Next,
    response::Response,
};
use jsonwebtoken::{DecodingKey, Validation, decode};

use dars_types::api::Claims;

use crate::auth::AppState;

/// Decode and validate a bearer token.
pub fn verify_token(secret: &str, token: &str) -> Option<Claims> {
    decode::<Claims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &Validation::default(),
    )
    .ok()
    .map(|data| data.claims)
}

/// Extract and validate JWT from Authorization header.
pub async fn require_auth(
    State(state): State<AppState>,
    mut req: Request,
    next: Next,
) -> Result<Response, StatusCode> {
    let auth_header = req
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .ok_or(StatusCode::UNAUTHORIZED)?;

    let token = auth_header
        .strip_prefix("Bearer ")
        .ok_or(StatusCode::UNAUTHORIZED)?;

    let claims = verify_token(&state.jwt_secret, token).ok_or(StatusCode::UNAUTHORIZED)?;

    req.extensions_mut().insert(claims);
    Ok(next.run(req).await)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::create_token;
    use dars_types::models::SenderRole;
    use uuid::Uuid;

    #[test]
    fn issued_tokens_verify_with_same_secret_only() {
        let user = Uuid::new_v4();
        let token = create_token("secret-a", user, "neda", SenderRole::Moderator).unwrap();

        let claims = verify_token("secret-a", &token).unwrap();
        assert_eq!(claims.sub, user);
        assert_eq!(claims.role, SenderRole::Moderator);

        assert!(verify_token("secret-b", &token).is_none());
        assert!(verify_token("secret-a", "not-a-token").is_none());
    }
}
