//! Wallet Session Tokens
//!
//! Validates session tokens issued by the wallet sign-in service. The server
//! does NOT issue tokens; it only checks them. A token names a wallet address
//! in `sub`, must carry an expiry, and may be bound to a single game with the
//! `gameId` claim.
//!
//! With no key configured the server runs in development mode and accepts a
//! bare address instead of a token.

use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::{env_lookup, parse_var, ConfigError};
use crate::game::state::{Address, GameId};

/// Authentication configuration.
#[derive(Clone, Debug, Default)]
pub struct AuthConfig {
    /// Required issuer. If None, any issuer accepted.
    pub issuer: Option<String>,
    /// Required audience. If None, the claim is ignored.
    pub audience: Option<String>,
    /// RS256 public key of the sign-in service, PEM.
    pub public_key_pem: Option<String>,
    /// HS256 secret shared with the sign-in service.
    pub secret: Option<String>,
    /// Clock skew tolerated on `exp` and `nbf`.
    pub leeway_secs: u64,
    /// Accept expired tokens and tokens without `exp` (testing only).
    pub skip_expiry: bool,
}

impl AuthConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(env_lookup)
    }

    /// Create config from a variable lookup.
    pub fn from_lookup<L>(lookup: L) -> Result<Self, ConfigError>
    where
        L: Fn(&str) -> Option<String>,
    {
        Ok(Self {
            issuer: lookup("AUTH_ISSUER"),
            audience: lookup("AUTH_AUDIENCE"),
            public_key_pem: lookup("AUTH_PUBLIC_KEY_PEM"),
            secret: lookup("AUTH_SECRET"),
            leeway_secs: parse_var(&lookup, "AUTH_LEEWAY_SECS", 30)?,
            skip_expiry: parse_var(&lookup, "AUTH_SKIP_EXPIRY", false)?,
        })
    }

    /// Check if token validation is configured.
    pub fn is_configured(&self) -> bool {
        self.public_key_pem.is_some() || self.secret.is_some()
    }

    /// Key and algorithm tokens are checked against. The RSA key wins when
    /// both are set.
    fn verifier(&self) -> Result<(DecodingKey, Algorithm), AuthError> {
        match (&self.public_key_pem, &self.secret) {
            (Some(pem), _) => DecodingKey::from_rsa_pem(pem.as_bytes())
                .map(|key| (key, Algorithm::RS256))
                .map_err(|e| AuthError::DecodeError(format!("invalid public key: {e}"))),
            (None, Some(secret)) => Ok((DecodingKey::from_secret(secret.as_bytes()), Algorithm::HS256)),
            (None, None) => Err(AuthError::NotConfigured),
        }
    }

    fn validation(&self, algorithm: Algorithm) -> Validation {
        let mut validation = Validation::new(algorithm);
        validation.leeway = self.leeway_secs;
        validation.validate_exp = !self.skip_expiry;
        validation.validate_nbf = true;

        let mut required = vec!["sub"];
        if !self.skip_expiry {
            required.push("exp");
        }
        if let Some(issuer) = &self.issuer {
            validation.set_issuer(&[issuer]);
            required.push("iss");
        }
        match &self.audience {
            Some(audience) => {
                validation.set_audience(&[audience]);
                required.push("aud");
            }
            None => validation.validate_aud = false,
        }
        validation.set_required_spec_claims(&required);
        validation
    }
}

/// Claims of a wallet session token.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenClaims {
    /// Wallet address, 0x-prefixed hex.
    pub sub: String,
    /// Expiry (Unix seconds).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exp: Option<u64>,
    /// Not valid before (Unix seconds).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nbf: Option<u64>,
    /// Issuer.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iss: Option<String>,
    /// Audience.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aud: Option<String>,
    /// Game the session was issued for; absent for any game.
    #[serde(default, rename = "gameId", skip_serializing_if = "Option::is_none")]
    pub game_id: Option<GameId>,
}

/// A verified wallet session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WalletSession {
    /// Wallet the token was issued to.
    pub address: Address,
    /// Game binding, if any.
    pub game_id: Option<GameId>,
    /// Expiry, unless expiry checks are disabled and the token has none.
    pub expires_at: Option<u64>,
}

impl WalletSession {
    /// Whether this session may join `game_id`.
    pub fn allows(&self, game_id: GameId) -> bool {
        self.game_id.map_or(true, |bound| bound == game_id)
    }
}

impl TryFrom<TokenClaims> for WalletSession {
    type Error = AuthError;

    fn try_from(claims: TokenClaims) -> Result<Self, AuthError> {
        let address = Address::from_hex(&claims.sub).ok_or(AuthError::InvalidSubject)?;
        Ok(Self { address, game_id: claims.game_id, expires_at: claims.exp })
    }
}

/// Authentication errors.
#[derive(Debug, Error)]
pub enum AuthError {
    /// No key configured on server.
    #[error("authentication not configured")]
    NotConfigured,
    /// Neither token nor address supplied, or a bare address in production.
    #[error("token required")]
    MissingToken,
    /// Token format is invalid.
    #[error("invalid token format")]
    InvalidFormat,
    /// Token signature verification failed.
    #[error("invalid signature")]
    InvalidSignature,
    /// Token has expired.
    #[error("token expired")]
    Expired,
    /// Token is not valid yet.
    #[error("token not yet valid")]
    NotYetValid,
    /// Issuer claim doesn't match expected value.
    #[error("invalid issuer")]
    InvalidIssuer,
    /// Audience claim doesn't match expected value.
    #[error("invalid audience")]
    InvalidAudience,
    /// Required claim is missing.
    #[error("missing required claim: {0}")]
    MissingClaim(String),
    /// Subject or bare address is not a wallet address.
    #[error("subject is not a wallet address")]
    InvalidSubject,
    /// Token is bound to another game.
    #[error("token issued for game {bound}, not {requested}")]
    WrongGame { bound: GameId, requested: GameId },
    /// JWT decoding error.
    #[error("decode error: {0}")]
    DecodeError(String),
}

impl AuthError {
    /// Stable client-facing code.
    pub fn code(&self) -> &'static str {
        match self {
            AuthError::Expired => "token-expired",
            AuthError::MissingToken => "token-required",
            AuthError::InvalidSubject => "invalid-address",
            AuthError::WrongGame { .. } => "wrong-game",
            _ => "auth-failed",
        }
    }
}

/// Verify a session token and resolve the wallet it names.
pub fn validate_session(token: &str, config: &AuthConfig) -> Result<WalletSession, AuthError> {
    let (key, algorithm) = config.verifier()?;
    let data = decode::<TokenClaims>(token, &key, &config.validation(algorithm)).map_err(map_jwt_error)?;
    WalletSession::try_from(data.claims)
}

/// Resolve the wallet address a connection joins `game_id` as.
pub fn authenticate(
    token: Option<&str>,
    bare_address: Option<&str>,
    game_id: GameId,
    config: &AuthConfig,
) -> Result<Address, AuthError> {
    match (token, bare_address) {
        (Some(token), _) if config.is_configured() => {
            let session = validate_session(token, config)?;
            match session.game_id {
                Some(bound) if !session.allows(game_id) => Err(AuthError::WrongGame { bound, requested: game_id }),
                _ => Ok(session.address),
            }
        }
        (_, Some(address)) if !config.is_configured() => {
            Address::from_hex(address).ok_or(AuthError::InvalidSubject)
        }
        (Some(_), None) => Err(AuthError::NotConfigured),
        _ => Err(AuthError::MissingToken),
    }
}

/// Map JWT library errors to our error type.
fn map_jwt_error(err: jsonwebtoken::errors::Error) -> AuthError {
    use jsonwebtoken::errors::ErrorKind;
    match err.kind() {
        ErrorKind::ExpiredSignature => AuthError::Expired,
        ErrorKind::ImmatureSignature => AuthError::NotYetValid,
        ErrorKind::InvalidSignature => AuthError::InvalidSignature,
        ErrorKind::InvalidIssuer => AuthError::InvalidIssuer,
        ErrorKind::InvalidAudience => AuthError::InvalidAudience,
        ErrorKind::MissingRequiredClaim(claim) => AuthError::MissingClaim(claim.clone()),
        ErrorKind::InvalidToken | ErrorKind::Base64(_) => AuthError::InvalidFormat,
        _ => AuthError::DecodeError(err.to_string()),
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use jsonwebtoken::{encode, EncodingKey, Header};

    const SECRET: &str = "test-secret-key-256-bits-long!!";
    const WALLET: &str = "0x00000000000000000000000000000000000000a1";

    fn sign(claims: &TokenClaims, secret: &str) -> String {
        let key = EncodingKey::from_secret(secret.as_bytes());
        encode(&Header::new(Algorithm::HS256), claims, &key).unwrap()
    }

    fn now() -> u64 {
        chrono::Utc::now().timestamp() as u64
    }

    fn wallet_claims() -> TokenClaims {
        TokenClaims {
            sub: WALLET.into(),
            exp: Some(now() + 3600),
            nbf: None,
            iss: Some("sign-in".into()),
            aud: Some("chain-assassin".into()),
            game_id: None,
        }
    }

    fn secret_config() -> AuthConfig {
        AuthConfig { secret: Some(SECRET.into()), leeway_secs: 30, ..Default::default() }
    }

    #[test]
    fn test_valid_token_yields_wallet() {
        let token = sign(&wallet_claims(), SECRET);
        let session = validate_session(&token, &secret_config()).unwrap();
        assert_eq!(session.address.to_hex(), WALLET);
        assert_eq!(session.game_id, None);
        assert_eq!(authenticate(Some(&token), None, 7, &secret_config()).unwrap(), session.address);
    }

    #[test]
    fn test_game_bound_token() {
        let token = sign(&TokenClaims { game_id: Some(3), ..wallet_claims() }, SECRET);
        assert!(authenticate(Some(&token), None, 3, &secret_config()).is_ok());

        let err = authenticate(Some(&token), None, 4, &secret_config()).unwrap_err();
        assert!(matches!(err, AuthError::WrongGame { bound: 3, requested: 4 }));
        assert_eq!(err.code(), "wrong-game");
    }

    #[test]
    fn test_expiry_required_and_enforced() {
        let expired = sign(&TokenClaims { exp: Some(1), ..wallet_claims() }, SECRET);
        let err = validate_session(&expired, &secret_config()).unwrap_err();
        assert!(matches!(err, AuthError::Expired));
        assert_eq!(err.code(), "token-expired");

        let forever = sign(&TokenClaims { exp: None, ..wallet_claims() }, SECRET);
        assert!(matches!(
            validate_session(&forever, &secret_config()),
            Err(AuthError::MissingClaim(claim)) if claim == "exp"
        ));
    }

    #[test]
    fn test_leeway_covers_clock_skew() {
        let just_expired = sign(&TokenClaims { exp: Some(now() - 10), ..wallet_claims() }, SECRET);
        assert!(validate_session(&just_expired, &secret_config()).is_ok());
        let strict = AuthConfig { leeway_secs: 0, ..secret_config() };
        assert!(matches!(validate_session(&just_expired, &strict), Err(AuthError::Expired)));

        let early = sign(&TokenClaims { nbf: Some(now() + 600), ..wallet_claims() }, SECRET);
        assert!(matches!(validate_session(&early, &secret_config()), Err(AuthError::NotYetValid)));
    }

    #[test]
    fn test_invalid_signature_rejected() {
        let token = sign(&wallet_claims(), "correct-secret-key-here!!!!!");
        let config = AuthConfig { secret: Some("wrong-secret-key-here!!!!!!".into()), ..Default::default() };
        assert!(matches!(validate_session(&token, &config), Err(AuthError::InvalidSignature)));
    }

    #[test]
    fn test_non_address_subject_rejected() {
        let token = sign(&TokenClaims { sub: "user123".into(), ..wallet_claims() }, SECRET);
        assert!(matches!(
            authenticate(Some(&token), None, 1, &secret_config()),
            Err(AuthError::InvalidSubject)
        ));
    }

    #[test]
    fn test_issuer_and_audience_required_when_configured() {
        let token = sign(&wallet_claims(), SECRET);
        let config = AuthConfig { issuer: Some("other".into()), ..secret_config() };
        assert!(matches!(validate_session(&token, &config), Err(AuthError::InvalidIssuer)));

        let config = AuthConfig { audience: Some("chain-assassin".into()), ..secret_config() };
        assert!(validate_session(&token, &config).is_ok());
        let anonymous = sign(&TokenClaims { aud: None, ..wallet_claims() }, SECRET);
        assert!(matches!(
            validate_session(&anonymous, &config),
            Err(AuthError::MissingClaim(claim)) if claim == "aud"
        ));
    }

    #[test]
    fn test_dev_mode_accepts_bare_address() {
        let config = AuthConfig::default();
        assert_eq!(authenticate(None, Some(WALLET), 1, &config).unwrap().to_hex(), WALLET);
        assert!(matches!(authenticate(None, Some("bob"), 1, &config), Err(AuthError::InvalidSubject)));
        assert!(matches!(authenticate(None, None, 1, &config), Err(AuthError::MissingToken)));
        assert!(matches!(validate_session("x.y.z", &config), Err(AuthError::NotConfigured)));
    }

    #[test]
    fn test_bare_address_refused_when_configured() {
        assert!(matches!(
            authenticate(None, Some(WALLET), 1, &secret_config()),
            Err(AuthError::MissingToken)
        ));
    }

    #[test]
    fn test_skip_expiry_accepts_stale_tokens() {
        let config = AuthConfig { skip_expiry: true, ..secret_config() };
        let expired = sign(&TokenClaims { exp: Some(1), ..wallet_claims() }, SECRET);
        let forever = sign(&TokenClaims { exp: None, ..wallet_claims() }, SECRET);
        assert!(validate_session(&expired, &config).is_ok());
        assert_eq!(validate_session(&forever, &config).unwrap().expires_at, None);
    }

    #[test]
    fn test_from_lookup() {
        let config = AuthConfig::from_lookup(|name| (name == "AUTH_SECRET").then(|| SECRET.to_string())).unwrap();
        assert!(config.is_configured());
        assert_eq!(config.leeway_secs, 30);

        let err = AuthConfig::from_lookup(|name| (name == "AUTH_SKIP_EXPIRY").then(|| "yes".to_string()))
            .unwrap_err();
        assert_eq!(err.var, "AUTH_SKIP_EXPIRY");
    }
}
