//! Token lifecycle: signing, issuance, verification, revocation, rotation.

pub mod jwt;
pub mod service;

pub use jwt::{Jwk, Jwks, JwtError, JwtService, SigningAlgorithm, SigningKeyPair, TokenClaims, TokenUse};
pub use service::{IssuedToken, TokenMetadata, TokenPair, TokenService};
