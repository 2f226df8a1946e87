// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Identity tokens and user authentication.

use std::collections::HashMap;
use std::fmt;

use crate::error::SessionError;

/// Identity presented in ActivateSession.
#[derive(Clone, PartialEq, Eq)]
pub enum IdentityToken {
    /// No user.
    Anonymous,
    /// User name and password.
    UserName {
        /// User name.
        user_name: String,
        /// Password.
        password: String,
    },
    /// A token type this stack does not support.
    Unsupported {
        /// Binary encoding id of the token.
        type_id: u32,
    },
}

impl fmt::Debug for IdentityToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Anonymous => f.write_str("Anonymous"),
            Self::UserName { user_name, .. } => f
                .debug_struct("UserName")
                .field("user_name", user_name)
                .field("password", &"<redacted>")
                .finish(),
            Self::Unsupported { type_id } => f
                .debug_struct("Unsupported")
                .field("type_id", type_id)
                .finish(),
        }
    }
}

impl IdentityToken {
    /// Checks the token's structure.
    ///
    /// A blank user name is accepted only together with an empty password,
    /// in which case the token counts as anonymous.
    pub fn validate(&self) -> Result<(), SessionError> {
        match self {
            Self::Anonymous => Ok(()),
            Self::UserName {
                user_name,
                password,
            } => {
                if user_name.trim().is_empty() && !password.is_empty() {
                    return Err(SessionError::identity_token_invalid(
                        "password supplied without a user name",
                    ));
                }
                Ok(())
            }
            Self::Unsupported { type_id } => Err(SessionError::identity_token_invalid(format!(
                "identity token type {type_id} is not supported"
            ))),
        }
    }

    /// User name for logs; `None` for anonymous identities.
    pub fn user_name(&self) -> Option<&str> {
        match self {
            Self::UserName { user_name, .. } if !user_name.trim().is_empty() => Some(user_name),
            _ => None,
        }
    }
}

/// Decides whether a structurally valid identity may use the server.
pub trait Authenticator: Send + Sync {
    /// Accepts or rejects `identity`.
    fn authenticate(&self, identity: &IdentityToken) -> Result<(), SessionError>;
}

/// Accepts every identity.
#[derive(Debug, Default, Clone, Copy)]
pub struct AllowAll;

impl Authenticator for AllowAll {
    fn authenticate(&self, _identity: &IdentityToken) -> Result<(), SessionError> {
        Ok(())
    }
}

/// Fixed table of user names and passwords.
#[derive(Clone, Default)]
pub struct UserTable {
    users: HashMap<String, String>,
    allow_anonymous: bool,
}

impl fmt::Debug for UserTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UserTable")
            .field("users", &self.users.keys().collect::<Vec<_>>())
            .field("allow_anonymous", &self.allow_anonymous)
            .finish()
    }
}

impl UserTable {
    /// Creates an empty table that rejects anonymous users.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a user.
    pub fn with_user(mut self, user_name: impl Into<String>, password: impl Into<String>) -> Self {
        self.users.insert(user_name.into(), password.into());
        self
    }

    /// Accepts anonymous identities as well.
    pub fn allow_anonymous(mut self, allow: bool) -> Self {
        self.allow_anonymous = allow;
        self
    }
}

impl Authenticator for UserTable {
    fn authenticate(&self, identity: &IdentityToken) -> Result<(), SessionError> {
        match identity.user_name() {
            None if self.allow_anonymous => Ok(()),
            None => Err(SessionError::access_denied("anonymous")),
            Some(user) => {
                let password = match identity {
                    IdentityToken::UserName { password, .. } => password,
                    _ => return Err(SessionError::access_denied(user)),
                };
                match self.users.get(user) {
                    Some(expected) if expected == password => Ok(()),
                    _ => Err(SessionError::access_denied(user)),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::status::StatusCode;

    fn user(user_name: &str, password: &str) -> IdentityToken {
        IdentityToken::UserName {
            user_name: user_name.into(),
            password: password.into(),
        }
    }

    #[test]
    fn test_blank_user_with_password_is_invalid() {
        for name in ["", "   "] {
            let error = user(name, "secret").validate().unwrap_err();
            assert_eq!(error.status_code(), StatusCode::BadIdentityTokenInvalid);
        }
        assert!(user("", "").validate().is_ok());
        assert!(user("operator", "").validate().is_ok());
        assert!(IdentityToken::Unsupported { type_id: 327 }.validate().is_err());
    }

    #[test]
    fn test_debug_hides_password() {
        let rendered = format!("{:?}", user("operator", "hunter2"));
        assert!(rendered.contains("operator"));
        assert!(!rendered.contains("hunter2"));
    }

    #[test]
    fn test_user_table() {
        let table = UserTable::new().with_user("operator", "pw");
        assert!(table.authenticate(&user("operator", "pw")).is_ok());
        let error = table.authenticate(&user("operator", "wrong")).unwrap_err();
        assert_eq!(error.status_code(), StatusCode::BadUserAccessDenied);
        assert!(table.authenticate(&IdentityToken::Anonymous).is_err());
        assert!(table
            .allow_anonymous(true)
            .authenticate(&IdentityToken::Anonymous)
            .is_ok());
    }
}
