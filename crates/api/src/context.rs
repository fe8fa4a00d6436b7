/// Authenticated principal for a request.
///
/// Installed by the auth middleware; present on all protected routes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthedUser {
    subject: String,
}

impl AuthedUser {
    pub fn new(subject: impl Into<String>) -> Self {
        Self {
            subject: subject.into(),
        }
    }

    pub fn subject(&self) -> &str {
        &self.subject
    }
}
