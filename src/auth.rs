use crate::error::Result;
use std::collections::BTreeSet;

/// An authenticated principal
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserIdentity {
    pub name: String,
    /// e.g. `BASIC`, `BEARER`, `CLIENT_CERT`
    pub auth_type: String,
    pub roles: BTreeSet<String>,
}

impl UserIdentity {
    pub fn new(name: impl Into<String>, auth_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            auth_type: auth_type.into(),
            roles: BTreeSet::new(),
        }
    }

    #[must_use]
    pub fn with_role(mut self, role: impl Into<String>) -> Self {
        self.roles.insert(role.into());
        self
    }
}

/// Authentication state of a request. Providers live outside the request core and
/// only record their outcome here.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum Authentication {
    /// No provider has looked at the request yet
    #[default]
    NotChecked,
    /// A provider checked and found no credentials
    Unauthenticated,
    User(UserIdentity),
}

impl Authentication {
    /// Name of the authenticated user
    #[must_use]
    pub fn remote_user(&self) -> Option<&str> {
        match self {
            Authentication::User(user) => Some(&user.name),
            _ => None,
        }
    }

    #[must_use]
    pub fn auth_type(&self) -> Option<&str> {
        match self {
            Authentication::User(user) => Some(&user.auth_type),
            _ => None,
        }
    }

    #[must_use]
    pub fn is_user_in_role(&self, role: &str) -> bool {
        match self {
            Authentication::User(user) => user.roles.contains(role),
            _ => false,
        }
    }
}

/// Credential check behind programmatic login
pub trait LoginService: Send + Sync {
    /// The identity for `username` if `password` is accepted
    fn login(&self, username: &str, password: &str) -> Result<Option<UserIdentity>>;

    /// `user` is logging out
    fn logout(&self, _user: &UserIdentity) {}
}
