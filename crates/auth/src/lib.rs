//! Auth: JWT claims, HS256 tokens, credential verification.

pub mod claims;
pub mod credentials;
pub mod token;

pub use claims::{validate_claims, Claims, TokenValidationError};
pub use credentials::{CredentialVerifier, StaticCredentials};
pub use token::{Hs256Tokens, TokenError, TokenValidator};
