//! TOTP multi-factor authentication.

pub mod crypto;
pub mod service;

pub use crypto::{CipherError, SecretCipher};
pub use service::{MfaService, MfaSetup};
