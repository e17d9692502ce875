//! JWT encoding, decoding, and signing key management.
//!
//! Access and refresh tokens are both JWTs signed with an asymmetric key
//! pair so that the portal's other services can verify access tokens
//! offline against the issuer's public key. RS256, RS384, and ES384 are
//! supported; key pairs can be generated at startup or loaded from PEM.
//!
//! Decoding always validates signature, expiry, issuer, and audience.
//! Everything stateful (blacklist, metadata, watermark) is layered on top
//! by [`TokenService`](crate::token::TokenService).

use std::fmt;

use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
use jsonwebtoken::{
    Algorithm, DecodingKey, EncodingKey, Header, TokenData, Validation, decode, encode,
};
use p384::SecretKey as EcSecretKey;
use p384::ecdsa::SigningKey as EcSigningKey;
use p384::pkcs8::EncodePrivateKey as EcEncodePrivateKey;
use rand::rngs::OsRng;
use rsa::pkcs8::{DecodePublicKey, EncodePublicKey, LineEnding};
use rsa::traits::PublicKeyParts;
use rsa::{RsaPrivateKey, RsaPublicKey};
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

// ============================================================================
// Error Types
// ============================================================================

/// Errors that can occur during JWT operations.
#[derive(Debug, thiserror::Error)]
pub enum JwtError {
    /// Failed to encode a token.
    #[error("Failed to encode token: {message}")]
    EncodingError {
        /// Description of the encoding error.
        message: String,
    },

    /// Failed to decode a token.
    #[error("Failed to decode token: {message}")]
    DecodingError {
        /// Description of the decoding error.
        message: String,
    },

    /// The token has expired.
    #[error("Token expired")]
    Expired,

    /// The token signature is invalid.
    #[error("Invalid signature")]
    InvalidSignature,

    /// The token claims are invalid (wrong issuer, audience, etc.).
    #[error("Invalid claims: {message}")]
    InvalidClaims {
        /// Description of why claims are invalid.
        message: String,
    },

    /// Failed to generate a cryptographic key.
    #[error("Key generation error: {message}")]
    KeyGenerationError {
        /// Description of the key generation error.
        message: String,
    },

    /// Invalid key format or data.
    #[error("Invalid key: {message}")]
    InvalidKey {
        /// Description of why the key is invalid.
        message: String,
    },
}

impl JwtError {
    /// Creates a new `EncodingError`.
    #[must_use]
    pub fn encoding_error(message: impl Into<String>) -> Self {
        Self::EncodingError {
            message: message.into(),
        }
    }

    /// Creates a new `DecodingError`.
    #[must_use]
    pub fn decoding_error(message: impl Into<String>) -> Self {
        Self::DecodingError {
            message: message.into(),
        }
    }

    /// Creates a new `InvalidClaims` error.
    #[must_use]
    pub fn invalid_claims(message: impl Into<String>) -> Self {
        Self::InvalidClaims {
            message: message.into(),
        }
    }

    /// Creates a new `KeyGenerationError`.
    #[must_use]
    pub fn key_generation_error(message: impl Into<String>) -> Self {
        Self::KeyGenerationError {
            message: message.into(),
        }
    }

    /// Creates a new `InvalidKey` error.
    #[must_use]
    pub fn invalid_key(message: impl Into<String>) -> Self {
        Self::InvalidKey {
            message: message.into(),
        }
    }

    /// Returns `true` if this is a validation error (expired, bad signature,
    /// wrong claims) as opposed to a key or encoding failure.
    #[must_use]
    pub fn is_validation_error(&self) -> bool {
        matches!(
            self,
            Self::Expired
                | Self::InvalidSignature
                | Self::InvalidClaims { .. }
                | Self::DecodingError { .. }
        )
    }
}

impl From<jsonwebtoken::errors::Error> for JwtError {
    fn from(err: jsonwebtoken::errors::Error) -> Self {
        use jsonwebtoken::errors::ErrorKind;

        match err.kind() {
            ErrorKind::ExpiredSignature => Self::Expired,
            ErrorKind::InvalidSignature => Self::InvalidSignature,
            ErrorKind::InvalidToken
            | ErrorKind::InvalidAlgorithm
            | ErrorKind::InvalidAlgorithmName
            | ErrorKind::MissingAlgorithm => Self::decoding_error(err.to_string()),
            ErrorKind::InvalidAudience
            | ErrorKind::InvalidIssuer
            | ErrorKind::InvalidSubject
            | ErrorKind::MissingRequiredClaim(_) => Self::invalid_claims(err.to_string()),
            ErrorKind::InvalidRsaKey(_)
            | ErrorKind::InvalidEcdsaKey
            | ErrorKind::InvalidKeyFormat => Self::invalid_key(err.to_string()),
            _ => Self::decoding_error(err.to_string()),
        }
    }
}

// ============================================================================
// Signing Algorithm
// ============================================================================

/// Supported signing algorithms for portal tokens.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SigningAlgorithm {
    /// RSA with SHA-256 (widely compatible).
    RS256,
    /// RSA with SHA-384.
    RS384,
    /// ECDSA with P-384 curve (smaller keys and tokens).
    ES384,
}

impl SigningAlgorithm {
    /// Converts to the `jsonwebtoken` Algorithm type.
    #[must_use]
    pub fn to_jwt_algorithm(self) -> Algorithm {
        match self {
            Self::RS256 => Algorithm::RS256,
            Self::RS384 => Algorithm::RS384,
            Self::ES384 => Algorithm::ES384,
        }
    }

    /// Returns the algorithm name as used in JWK/JWT headers.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::RS256 => "RS256",
            Self::RS384 => "RS384",
            Self::ES384 => "ES384",
        }
    }

    /// Returns `true` if this is an RSA-based algorithm.
    #[must_use]
    pub fn is_rsa(&self) -> bool {
        matches!(self, Self::RS256 | Self::RS384)
    }

    /// Returns `true` if this is an EC-based algorithm.
    #[must_use]
    pub fn is_ec(&self) -> bool {
        matches!(self, Self::ES384)
    }
}

impl fmt::Display for SigningAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ============================================================================
// Token Claims
// ============================================================================

/// Marker distinguishing access tokens from refresh tokens.
///
/// Each token kind is only usable for its own purpose: presenting a refresh
/// token to a protected endpoint, or an access token to the refresh
/// operation, is rejected as malformed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TokenUse {
    /// Short-lived token presented on API requests.
    Access,
    /// Long-lived token exchanged for new pairs.
    Refresh,
}

impl fmt::Display for TokenUse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Access => write!(f, "access"),
            Self::Refresh => write!(f, "refresh"),
        }
    }
}

/// Claims carried by every portal token.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TokenClaims {
    /// Issuer (portal auth service URL).
    pub iss: String,

    /// Subject (account identifier).
    pub sub: String,

    /// Audience (portal service name).
    pub aud: String,

    /// Expiration time (Unix timestamp).
    pub exp: i64,

    /// Issued at (Unix timestamp).
    pub iat: i64,

    /// Unique token identifier, keys metadata and revocation records.
    pub jti: String,

    /// Role names granted to the subject. Empty on refresh tokens; roles
    /// are re-derived from the directory at each exchange so grants are
    /// never frozen for a full refresh lifetime.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub roles: Vec<String>,

    /// Access/refresh marker.
    pub token_use: TokenUse,
}

impl TokenClaims {
    /// Returns the expiration as an `OffsetDateTime`.
    ///
    /// # Errors
    /// Returns an error if the timestamp is out of range.
    pub fn expires_at(&self) -> Result<OffsetDateTime, JwtError> {
        OffsetDateTime::from_unix_timestamp(self.exp)
            .map_err(|e| JwtError::invalid_claims(format!("bad exp timestamp: {e}")))
    }

    /// Returns the issue time as an `OffsetDateTime`.
    ///
    /// # Errors
    /// Returns an error if the timestamp is out of range.
    pub fn issued_at(&self) -> Result<OffsetDateTime, JwtError> {
        OffsetDateTime::from_unix_timestamp(self.iat)
            .map_err(|e| JwtError::invalid_claims(format!("bad iat timestamp: {e}")))
    }
}

// ============================================================================
// JWKS Types
// ============================================================================

/// JSON Web Key Set, served so sibling services can verify access tokens.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Jwks {
    /// The keys in this set.
    pub keys: Vec<Jwk>,
}

impl Jwks {
    /// Creates a new empty JWKS.
    #[must_use]
    pub fn new() -> Self {
        Self { keys: Vec::new() }
    }

    /// Adds a key to the set.
    pub fn add_key(&mut self, key: Jwk) {
        self.keys.push(key);
    }
}

impl Default for Jwks {
    fn default() -> Self {
        Self::new()
    }
}

/// JSON Web Key.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Jwk {
    /// Key type ("RSA" or "EC").
    pub kty: String,

    /// Key ID.
    pub kid: String,

    /// Key use ("sig" for signing).
    #[serde(rename = "use")]
    pub use_: String,

    /// Algorithm.
    pub alg: String,

    /// RSA modulus (base64url encoded).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub n: Option<String>,

    /// RSA exponent (base64url encoded).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub e: Option<String>,

    /// EC curve name.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub crv: Option<String>,

    /// EC x coordinate (base64url encoded).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub x: Option<String>,

    /// EC y coordinate (base64url encoded).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub y: Option<String>,
}

// ============================================================================
// Signing Key Pair
// ============================================================================

/// A signing key pair for token operations.
pub struct SigningKeyPair {
    /// Key ID.
    pub kid: String,

    /// Signing algorithm.
    pub algorithm: SigningAlgorithm,

    /// Encoding key (private key) for signing.
    encoding_key: EncodingKey,

    /// Decoding key (public key) for verification.
    decoding_key: DecodingKey,

    /// Public key data for JWKS export.
    public_key_data: PublicKeyData,

    /// When the key was created.
    pub created_at: OffsetDateTime,
}

/// Internal representation of public key data for JWKS export.
enum PublicKeyData {
    Rsa { n: Vec<u8>, e: Vec<u8> },
    Ec { x: Vec<u8>, y: Vec<u8> },
}

impl SigningKeyPair {
    /// Generates a new RSA key pair.
    ///
    /// # Arguments
    /// * `algorithm` - The signing algorithm (must be RS256 or RS384)
    ///
    /// # Errors
    /// Returns an error if key generation fails or algorithm is not RSA-based.
    pub fn generate_rsa(algorithm: SigningAlgorithm) -> Result<Self, JwtError> {
        if !algorithm.is_rsa() {
            return Err(JwtError::invalid_key(format!(
                "Algorithm {} is not RSA-based",
                algorithm
            )));
        }

        let bits = 2048;
        let private_key = RsaPrivateKey::new(&mut OsRng, bits)
            .map_err(|e| JwtError::key_generation_error(e.to_string()))?;

        let public_key = private_key.to_public_key();
        let n = public_key.n().to_bytes_be();
        let e = public_key.e().to_bytes_be();

        let private_pem = private_key
            .to_pkcs8_pem(LineEnding::LF)
            .map_err(|e| JwtError::key_generation_error(e.to_string()))?;

        let encoding_key = EncodingKey::from_rsa_pem(private_pem.as_bytes())
            .map_err(|e| JwtError::key_generation_error(e.to_string()))?;

        let public_pem = public_key
            .to_public_key_pem(LineEnding::LF)
            .map_err(|e| JwtError::key_generation_error(e.to_string()))?;

        let decoding_key = DecodingKey::from_rsa_pem(public_pem.as_bytes())
            .map_err(|e| JwtError::key_generation_error(e.to_string()))?;

        Ok(Self {
            kid: uuid::Uuid::new_v4().to_string(),
            algorithm,
            encoding_key,
            decoding_key,
            public_key_data: PublicKeyData::Rsa { n, e },
            created_at: OffsetDateTime::now_utc(),
        })
    }

    /// Generates a new EC key pair using the P-384 curve.
    ///
    /// # Errors
    /// Returns an error if key generation fails.
    pub fn generate_ec() -> Result<Self, JwtError> {
        let secret_key = EcSecretKey::random(&mut OsRng);
        let signing_key = EcSigningKey::from(&secret_key);
        let public_key = signing_key.verifying_key();

        let point = public_key.to_encoded_point(false);
        let x = point
            .x()
            .ok_or_else(|| JwtError::key_generation_error("Missing x coordinate"))?;
        let y = point
            .y()
            .ok_or_else(|| JwtError::key_generation_error("Missing y coordinate"))?;

        // jsonwebtoken requires PKCS8 PEM for the private key
        let private_pem = secret_key
            .to_pkcs8_pem(LineEnding::LF)
            .map_err(|e| JwtError::key_generation_error(e.to_string()))?;

        let encoding_key = EncodingKey::from_ec_pem(private_pem.as_bytes())
            .map_err(|e| JwtError::key_generation_error(e.to_string()))?;

        let x_b64 = URL_SAFE_NO_PAD.encode(x.as_slice());
        let y_b64 = URL_SAFE_NO_PAD.encode(y.as_slice());
        let decoding_key = DecodingKey::from_ec_components(&x_b64, &y_b64)
            .map_err(|e| JwtError::key_generation_error(e.to_string()))?;

        Ok(Self {
            kid: uuid::Uuid::new_v4().to_string(),
            algorithm: SigningAlgorithm::ES384,
            encoding_key,
            decoding_key,
            public_key_data: PublicKeyData::Ec {
                x: x.to_vec(),
                y: y.to_vec(),
            },
            created_at: OffsetDateTime::now_utc(),
        })
    }

    /// Loads a key pair from PEM strings.
    ///
    /// # Arguments
    /// * `kid` - Key ID
    /// * `algorithm` - Signing algorithm
    /// * `private_pem` - PEM-encoded private key
    /// * `public_pem` - PEM-encoded public key
    ///
    /// # Errors
    /// Returns an error if the PEM data is invalid.
    pub fn from_pem(
        kid: impl Into<String>,
        algorithm: SigningAlgorithm,
        private_pem: &str,
        public_pem: &str,
    ) -> Result<Self, JwtError> {
        let (encoding_key, decoding_key, public_key_data) = if algorithm.is_rsa() {
            let encoding_key = EncodingKey::from_rsa_pem(private_pem.as_bytes())
                .map_err(|e| JwtError::invalid_key(e.to_string()))?;
            let decoding_key = DecodingKey::from_rsa_pem(public_pem.as_bytes())
                .map_err(|e| JwtError::invalid_key(e.to_string()))?;

            let public_key = RsaPublicKey::from_public_key_pem(public_pem)
                .map_err(|e| JwtError::invalid_key(e.to_string()))?;
            let n = public_key.n().to_bytes_be();
            let e = public_key.e().to_bytes_be();

            (encoding_key, decoding_key, PublicKeyData::Rsa { n, e })
        } else {
            let encoding_key = EncodingKey::from_ec_pem(private_pem.as_bytes())
                .map_err(|e| JwtError::invalid_key(e.to_string()))?;

            let secret_key = EcSecretKey::from_sec1_pem(private_pem)
                .map_err(|e| JwtError::invalid_key(e.to_string()))?;
            let signing_key = EcSigningKey::from(&secret_key);
            let point = signing_key.verifying_key().to_encoded_point(false);
            let x = point
                .x()
                .ok_or_else(|| JwtError::invalid_key("Missing x coordinate"))?;
            let y = point
                .y()
                .ok_or_else(|| JwtError::invalid_key("Missing y coordinate"))?;

            let x_b64 = URL_SAFE_NO_PAD.encode(x.as_slice());
            let y_b64 = URL_SAFE_NO_PAD.encode(y.as_slice());
            let decoding_key = DecodingKey::from_ec_components(&x_b64, &y_b64)
                .map_err(|e| JwtError::invalid_key(e.to_string()))?;

            (
                encoding_key,
                decoding_key,
                PublicKeyData::Ec {
                    x: x.to_vec(),
                    y: y.to_vec(),
                },
            )
        };

        Ok(Self {
            kid: kid.into(),
            algorithm,
            encoding_key,
            decoding_key,
            public_key_data,
            created_at: OffsetDateTime::now_utc(),
        })
    }

    /// Exports the public key as a JWK.
    #[must_use]
    pub fn to_jwk(&self) -> Jwk {
        match &self.public_key_data {
            PublicKeyData::Rsa { n, e } => Jwk {
                kty: "RSA".to_string(),
                kid: self.kid.clone(),
                use_: "sig".to_string(),
                alg: self.algorithm.as_str().to_string(),
                n: Some(URL_SAFE_NO_PAD.encode(n)),
                e: Some(URL_SAFE_NO_PAD.encode(e)),
                crv: None,
                x: None,
                y: None,
            },
            PublicKeyData::Ec { x, y } => Jwk {
                kty: "EC".to_string(),
                kid: self.kid.clone(),
                use_: "sig".to_string(),
                alg: self.algorithm.as_str().to_string(),
                n: None,
                e: None,
                crv: Some("P-384".to_string()),
                x: Some(URL_SAFE_NO_PAD.encode(x)),
                y: Some(URL_SAFE_NO_PAD.encode(y)),
            },
        }
    }
}

// ============================================================================
// JWT Service
// ============================================================================

/// Service for encoding and decoding portal tokens.
///
/// Thread-safe (`Send + Sync`); shared across async tasks behind an `Arc`.
pub struct JwtService {
    signing_key: SigningKeyPair,
    issuer: String,
    audience: String,
}

impl JwtService {
    /// Creates a new JWT service.
    ///
    /// # Arguments
    /// * `signing_key` - The key pair used for signing and verification
    /// * `issuer` - Value for the `iss` claim, validated on decode
    /// * `audience` - Value for the `aud` claim, validated on decode
    #[must_use]
    pub fn new(
        signing_key: SigningKeyPair,
        issuer: impl Into<String>,
        audience: impl Into<String>,
    ) -> Self {
        Self {
            signing_key,
            issuer: issuer.into(),
            audience: audience.into(),
        }
    }

    /// Encodes claims into a signed JWT string.
    ///
    /// # Errors
    /// Returns an error if encoding fails.
    pub fn encode(&self, claims: &TokenClaims) -> Result<String, JwtError> {
        let mut header = Header::new(self.signing_key.algorithm.to_jwt_algorithm());
        header.kid = Some(self.signing_key.kid.clone());

        encode(&header, claims, &self.signing_key.encoding_key)
            .map_err(|e| JwtError::encoding_error(e.to_string()))
    }

    /// Decodes and validates a JWT string.
    ///
    /// Validates signature, expiry, issuer, and audience.
    ///
    /// # Errors
    /// Returns an error if decoding or validation fails.
    pub fn decode(&self, token: &str) -> Result<TokenData<TokenClaims>, JwtError> {
        let mut validation = Validation::new(self.signing_key.algorithm.to_jwt_algorithm());
        validation.set_issuer(&[&self.issuer]);
        validation.set_audience(&[&self.audience]);
        validation.validate_exp = true;

        decode(token, &self.signing_key.decoding_key, &validation).map_err(JwtError::from)
    }

    /// Returns the current signing key ID.
    #[must_use]
    pub fn current_kid(&self) -> &str {
        &self.signing_key.kid
    }

    /// Returns the issuer value.
    #[must_use]
    pub fn issuer(&self) -> &str {
        &self.issuer
    }

    /// Returns the audience value.
    #[must_use]
    pub fn audience(&self) -> &str {
        &self.audience
    }

    /// Returns the JWKS containing the public key(s).
    #[must_use]
    pub fn jwks(&self) -> Jwks {
        let mut jwks = Jwks::new();
        jwks.add_key(self.signing_key.to_jwk());
        jwks
    }
}

// ============================================================================
// Tests
// ============================================================================
