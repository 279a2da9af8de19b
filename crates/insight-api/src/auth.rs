//! JWT 토큰 검증.
//!
//! 토큰 발급은 외부 인증 collaborator의 책임입니다. 이 서버는
//! 실시간 채널 연결 시 전달된 토큰을 검증해 소유자 신원만 얻습니다.

use jsonwebtoken::{decode, DecodingKey, Validation};
use serde::{Deserialize, Serialize};

/// JWT 페이로드.
///
/// 검증된 `sub`가 이벤트 수신 범위를 결정하는 소유자 신원입니다.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    /// Subject - 소유자 ID (계정 UUID 또는 레거시 사용자명)
    pub sub: String,
    /// Expiration - 토큰 만료 시간 (Unix timestamp)
    pub exp: i64,
}

/// 토큰 검증 에러.
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("토큰이 만료되었습니다")]
    TokenExpired,
    #[error("잘못된 토큰 형식")]
    InvalidToken,
    #[error("토큰 디코딩 실패")]
    DecodingError,
}

/// JWT 토큰 디코딩 및 검증.
///
/// # Arguments
///
/// * `token` - JWT 토큰 문자열
/// * `secret` - 비밀 키
pub fn decode_token(token: &str, secret: &str) -> Result<Claims, AuthError> {
    let mut validation = Validation::default();
    validation.validate_exp = true;

    decode::<Claims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &validation,
    )
    .map(|data| data.claims)
    .map_err(|e| match e.kind() {
        jsonwebtoken::errors::ErrorKind::ExpiredSignature => AuthError::TokenExpired,
        jsonwebtoken::errors::ErrorKind::InvalidToken => AuthError::InvalidToken,
        _ => AuthError::DecodingError,
    })
}

#[cfg(test)]
pub(crate) fn encode_token(sub: &str, secret: &str) -> String {
    use jsonwebtoken::{encode, EncodingKey, Header};

    let claims = Claims {
        sub: sub.to_string(),
        exp: (chrono::Utc::now() + chrono::Duration::hours(1)).timestamp(),
    };
    encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )
    .unwrap()
}
