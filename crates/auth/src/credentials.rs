//! Credential verification for the login endpoint.
//!
//! Identity providers are external collaborators; this seam is where they
//! plug in. The default implementation is the environment-configured pair.

/// Verifies a login identity/password pair.
pub trait CredentialVerifier: Send + Sync {
    fn verify(&self, identity: &str, password: &str) -> bool;
}

/// Single credential pair from configuration.
pub struct StaticCredentials {
    email: String,
    password: String,
}

impl StaticCredentials {
    pub fn new(email: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            email: email.into(),
            password: password.into(),
        }
    }
}

impl CredentialVerifier for StaticCredentials {
    fn verify(&self, identity: &str, password: &str) -> bool {
        identity == self.email && password == self.password
    }
}
