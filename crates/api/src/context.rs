use gatehouse_auth::User;
use gatehouse_core::DivisionId;

/// Division a request acts on behalf of; its prefixed id is the policy
/// subject.
///
/// This is immutable and must be present for every guarded route.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubjectContext {
    division: DivisionId,
}

impl SubjectContext {
    pub fn new(division: DivisionId) -> Self {
        Self { division }
    }

    pub fn division(&self) -> &DivisionId {
        &self.division
    }

    /// `div:<name>`, as stored in policy rules.
    pub fn subject(&self) -> String {
        self.division.prefixed()
    }
}

/// Authenticated caller for a request (session token + resolved user).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserContext {
    token: String,
    user: User,
}

impl UserContext {
    pub fn new(token: impl Into<String>, user: User) -> Self {
        Self {
            token: token.into(),
            user,
        }
    }

    pub fn token(&self) -> &str {
        &self.token
    }

    pub fn user(&self) -> &User {
        &self.user
    }

    pub fn is_root(&self) -> bool {
        self.user.is_root
    }
}
