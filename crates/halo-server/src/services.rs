//! External collaborators the relay consumes: credential checks and the
//! app directory.
//!
//! Both are traits so deployments can plug in real services; the relay
//! ships with a shared-key authenticator and a static directory.

use halo_core::errors::Result;
use halo_core::{RelayError, SessionId, UserId};

/// Identity resolved from a glasses core token.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AuthenticatedUser {
    /// The glasses owner.
    pub user_id: UserId,
    /// Session the glasses belong to. Reconnects resolve to the same id.
    pub session_id: SessionId,
}

/// Validates credentials presented on a socket's first frame.
pub trait Authenticator: Send + Sync + 'static {
    /// Resolve a glasses core token to a user and session.
    fn authenticate_glasses(&self, core_token: &str) -> Result<AuthenticatedUser>;

    /// Check that `package_name` may join `session_id` with `api_key`.
    fn authenticate_tpa(&self, package_name: &str, session_id: &SessionId, api_key: &str)
    -> Result<()>;
}

/// Resolves per-user app configuration.
pub trait TpaDirectory: Send + Sync + 'static {
    /// Package allowed to drive the dashboard for `user_id`.
    fn system_app(&self, user_id: &UserId) -> String;
}

/// Authenticator backed by a single TPA API key.
///
/// The core token is taken as the user id and each user gets exactly one
/// session, keyed by that id.
pub struct SharedKeyAuthenticator {
    api_key: String,
}

impl SharedKeyAuthenticator {
    /// Create an authenticator accepting `api_key` for every package.
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
        }
    }
}

impl Authenticator for SharedKeyAuthenticator {
    fn authenticate_glasses(&self, core_token: &str) -> Result<AuthenticatedUser> {
        let token = core_token.trim();
        if token.is_empty() {
            return Err(RelayError::Authentication("empty core token".into()));
        }
        Ok(AuthenticatedUser {
            user_id: UserId::from(token),
            session_id: SessionId::from(token),
        })
    }

    fn authenticate_tpa(
        &self,
        package_name: &str,
        _session_id: &SessionId,
        api_key: &str,
    ) -> Result<()> {
        if package_name.trim().is_empty() {
            return Err(RelayError::Authentication("empty package name".into()));
        }
        if api_key != self.api_key {
            return Err(RelayError::Authentication(format!(
                "invalid api key for {package_name}"
            )));
        }
        Ok(())
    }
}

/// Directory that gives every user the same system app.
pub struct StaticDirectory {
    system_app: String,
}

impl StaticDirectory {
    /// Create a directory naming `system_app` as every user's dashboard app.
    pub fn new(system_app: impl Into<String>) -> Self {
        Self {
            system_app: system_app.into(),
        }
    }
}

impl TpaDirectory for StaticDirectory {
    fn system_app(&self, _user_id: &UserId) -> String {
        self.system_app.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn glasses_token_maps_to_user_and_session() {
        let auth = SharedKeyAuthenticator::new("k");
        let user = auth.authenticate_glasses("alice").unwrap();
        assert_eq!(user.user_id.as_str(), "alice");
        assert_eq!(user.session_id.as_str(), "alice");
    }

    #[test]
    fn blank_glasses_token_rejected() {
        let auth = SharedKeyAuthenticator::new("k");
        assert_matches!(auth.authenticate_glasses("  "), Err(RelayError::Authentication(_)));
    }

    #[test]
    fn tpa_key_checked() {
        let auth = SharedKeyAuthenticator::new("secret");
        let sid = SessionId::from("alice");
        assert!(auth.authenticate_tpa("com.weather", &sid, "secret").is_ok());
        assert_matches!(
            auth.authenticate_tpa("com.weather", &sid, "wrong"),
            Err(RelayError::Authentication(msg)) if msg.contains("com.weather")
        );
        assert!(auth.authenticate_tpa("", &sid, "secret").is_err());
    }

    #[test]
    fn static_directory_returns_configured_app() {
        let dir = StaticDirectory::new("system.dashboard");
        assert_eq!(dir.system_app(&UserId::from("bob")), "system.dashboard");
    }
}
