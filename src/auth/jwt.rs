use crate::auth::types::{AuthError, Authority, Claims, Identity, Principal};
use crate::clock::Clock;
use crate::config::ConfigError;
use chrono::{DateTime, TimeZone, Utc};
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use log::{debug, error, info, warn};
use std::sync::Arc;

pub const TOKEN_ISSUER: &str = "User Portal";
pub const TOKEN_AUDIENCE: &str = "User Portal Administration";

const ALGORITHM: Algorithm = Algorithm::HS512;

/// 签发和校验 JWT，进程内只构造一次
pub struct TokenCodec {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    validation: Validation,
    ttl_ms: i64,
    clock: Arc<dyn Clock>,
}

impl TokenCodec {
    pub fn new(secret: &str, ttl_ms: i64, clock: Arc<dyn Clock>) -> Result<Self, ConfigError> {
        if secret.is_empty() {
            return Err(ConfigError::Missing("JWT_SECRET"));
        }
        if ttl_ms <= 0 {
            return Err(ConfigError::Invalid {
                name: "JWT_EXPIRATION_MS",
                value: ttl_ms.to_string(),
            });
        }

        let mut validation = Validation::new(ALGORITHM);
        // exp 以毫秒存储，过期在 verify 中自行判断
        validation.validate_exp = false;
        validation.set_issuer(&[TOKEN_ISSUER]);
        validation.set_audience(&[TOKEN_AUDIENCE]);
        validation.set_required_spec_claims(&["sub", "iss", "aud", "exp"]);

        info!("初始化 token 编解码器, 有效期 {} ms", ttl_ms);
        Ok(Self {
            encoding_key: EncodingKey::from_secret(secret.as_bytes()),
            decoding_key: DecodingKey::from_secret(secret.as_bytes()),
            validation,
            ttl_ms,
            clock,
        })
    }

    pub fn issue(&self, principal: &Principal) -> Result<String, AuthError> {
        debug!("为用户 {} 生成 JWT token", principal.username);
        if principal.username.is_empty() || principal.authorities.is_empty() {
            warn!("拒绝为空用户名或无权限的身份签发 token");
            return Err(AuthError::InvalidPrincipal);
        }

        let issued_at = self.clock.now_millis();
        let claims = Claims {
            sub: principal.username.clone(),
            aud: TOKEN_AUDIENCE.to_string(),
            iss: TOKEN_ISSUER.to_string(),
            iat: issued_at,
            exp: issued_at + self.ttl_ms,
            authorities: principal
                .authorities
                .iter()
                .map(|a| a.as_str().to_string())
                .collect(),
        };

        encode(&Header::new(ALGORITHM), &claims, &self.encoding_key).map_err(|e| {
            error!("为用户 {} 生成 token 失败: {}", principal.username, e);
            AuthError::Signing(e.to_string())
        })
    }

    pub fn verify(&self, token: &str) -> Result<Identity, AuthError> {
        debug!("验证 JWT token");
        let claims = decode::<Claims>(token, &self.decoding_key, &self.validation)
            .map(|data| data.claims)
            .map_err(|e| {
                warn!("Token 验证失败: {}", e);
                classify(e.kind())
            })?;

        if self.clock.now_millis() >= claims.exp {
            warn!("用户 {} 的 token 已过期", claims.sub);
            return Err(AuthError::Expired);
        }

        let authorities = claims
            .authorities
            .iter()
            .map(|a| a.parse::<Authority>())
            .collect::<Result<Vec<_>, _>>()?;
        if claims.sub.is_empty() || authorities.is_empty() {
            return Err(AuthError::Malformed);
        }

        Ok(Identity {
            subject: claims.sub,
            authorities,
            issued_at: from_millis(claims.iat)?,
            expires_at: from_millis(claims.exp)?,
        })
    }

    /// token 有效且属于 `subject` 时返回 true
    pub fn is_valid(&self, subject: &str, token: &str) -> bool {
        if subject.is_empty() {
            return false;
        }
        match self.verify(token) {
            Ok(identity) => identity.subject == subject,
            Err(_) => false,
        }
    }
}

fn classify(kind: &ErrorKind) -> AuthError {
    match kind {
        ErrorKind::InvalidSignature
        | ErrorKind::InvalidAlgorithm
        | ErrorKind::InvalidIssuer
        | ErrorKind::InvalidAudience => AuthError::InvalidSignature,
        ErrorKind::ExpiredSignature => AuthError::Expired,
        _ => AuthError::Malformed,
    }
}

fn from_millis(ms: i64) -> Result<DateTime<Utc>, AuthError> {
    Utc.timestamp_millis_opt(ms)
        .single()
        .ok_or(AuthError::Malformed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use chrono::Duration;

    const SECRET: &str = "unit-test-secret";

    fn codec_with(clock: Arc<ManualClock>, ttl_ms: i64) -> TokenCodec {
        TokenCodec::new(SECRET, ttl_ms, clock).unwrap()
    }

    fn alice() -> Principal {
        Principal::new(
            "alice",
            vec![Authority::UserUpdate, Authority::UserRead, Authority::UserDelete],
        )
    }

    fn raw_claims(clock: &ManualClock, iss: &str) -> Claims {
        let now = clock.now_millis();
        Claims {
            sub: "alice".to_string(),
            aud: TOKEN_AUDIENCE.to_string(),
            iss: iss.to_string(),
            iat: now,
            exp: now + 60_000,
            authorities: vec!["user:read".to_string()],
        }
    }

    #[test]
    fn verify_returns_issued_identity() {
        let clock = Arc::new(ManualClock::new());
        let codec = codec_with(clock.clone(), 60_000);

        let token = codec.issue(&alice()).unwrap();
        let identity = codec.verify(&token).unwrap();

        assert_eq!(identity.subject, "alice");
        assert_eq!(identity.authorities, alice().authorities);
        assert_eq!(identity.issued_at, clock.now());
        assert_eq!(identity.expires_at, clock.now() + Duration::milliseconds(60_000));
    }

    #[test]
    fn tokens_one_millisecond_apart_differ() {
        let clock = Arc::new(ManualClock::new());
        let codec = codec_with(clock.clone(), 60_000);

        let first = codec.issue(&alice()).unwrap();
        clock.advance(Duration::milliseconds(1));
        let second = codec.issue(&alice()).unwrap();

        assert_ne!(first, second);
    }

    #[test]
    fn token_expires_exactly_at_ttl() {
        let clock = Arc::new(ManualClock::new());
        let codec = codec_with(clock.clone(), 5_000);
        let token = codec.issue(&alice()).unwrap();

        clock.advance(Duration::milliseconds(4_999));
        assert!(codec.verify(&token).is_ok());

        clock.advance(Duration::milliseconds(1));
        assert_eq!(codec.verify(&token), Err(AuthError::Expired));

        clock.advance(Duration::seconds(30));
        assert_eq!(codec.verify(&token), Err(AuthError::Expired));
    }

    #[test]
    fn flipped_signature_byte_is_rejected() {
        let codec = codec_with(Arc::new(ManualClock::new()), 60_000);
        let token = codec.issue(&alice()).unwrap();
        let signature_start = token.rfind('.').unwrap() + 1;

        for offset in [0, 20, token.len() - signature_start - 1] {
            let mut bytes = token.clone().into_bytes();
            let i = signature_start + offset;
            bytes[i] = if bytes[i] == b'A' { b'B' } else { b'A' };
            let tampered = String::from_utf8(bytes).unwrap();

            assert_eq!(codec.verify(&tampered), Err(AuthError::InvalidSignature));
        }
    }

    #[test]
    fn other_secret_is_rejected() {
        let clock = Arc::new(ManualClock::new());
        let token = TokenCodec::new("another-secret", 60_000, clock.clone())
            .unwrap()
            .issue(&alice())
            .unwrap();

        let codec = codec_with(clock, 60_000);
        assert_eq!(codec.verify(&token), Err(AuthError::InvalidSignature));
    }

    #[test]
    fn other_algorithm_is_rejected() {
        let clock = Arc::new(ManualClock::new());
        let codec = codec_with(clock.clone(), 60_000);
        let token = encode(
            &Header::new(Algorithm::HS256),
            &raw_claims(&clock, TOKEN_ISSUER),
            &EncodingKey::from_secret(SECRET.as_bytes()),
        )
        .unwrap();

        assert_eq!(codec.verify(&token), Err(AuthError::InvalidSignature));
    }

    #[test]
    fn foreign_issuer_is_rejected() {
        let clock = Arc::new(ManualClock::new());
        let codec = codec_with(clock.clone(), 60_000);
        let token = encode(
            &Header::new(ALGORITHM),
            &raw_claims(&clock, "Someone Else"),
            &EncodingKey::from_secret(SECRET.as_bytes()),
        )
        .unwrap();

        assert_eq!(codec.verify(&token), Err(AuthError::InvalidSignature));
    }

    #[test]
    fn garbage_and_unknown_authorities_are_malformed() {
        let clock = Arc::new(ManualClock::new());
        let codec = codec_with(clock.clone(), 60_000);
        assert_eq!(codec.verify("not-a-token"), Err(AuthError::Malformed));
        assert_eq!(codec.verify("a.b.c"), Err(AuthError::Malformed));

        let mut claims = raw_claims(&clock, TOKEN_ISSUER);
        claims.authorities = vec!["user:launch".to_string()];
        let token = encode(
            &Header::new(ALGORITHM),
            &claims,
            &EncodingKey::from_secret(SECRET.as_bytes()),
        )
        .unwrap();
        assert_eq!(codec.verify(&token), Err(AuthError::Malformed));
    }

    #[test]
    fn is_valid_requires_matching_subject() {
        let clock = Arc::new(ManualClock::new());
        let codec = codec_with(clock.clone(), 1_000);
        let token = codec.issue(&alice()).unwrap();

        assert!(codec.is_valid("alice", &token));
        assert!(!codec.is_valid("mallory", &token));
        assert!(!codec.is_valid("", &token));

        clock.advance(Duration::seconds(1));
        assert!(!codec.is_valid("alice", &token));
    }

    #[test]
    fn issue_requires_subject_and_authorities() {
        let codec = codec_with(Arc::new(ManualClock::new()), 60_000);

        assert_eq!(
            codec.issue(&Principal::new("", vec![Authority::UserRead])),
            Err(AuthError::InvalidPrincipal)
        );
        assert_eq!(
            codec.issue(&Principal::new("alice", vec![])),
            Err(AuthError::InvalidPrincipal)
        );
    }

    #[test]
    fn empty_secret_fails_at_construction() {
        let result = TokenCodec::new("", 60_000, Arc::new(ManualClock::new()));
        assert!(matches!(result, Err(ConfigError::Missing("JWT_SECRET"))));
    }
}
