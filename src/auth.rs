//! Two layers of authentication. The pgwire startup handshake checks one
//! shared gateway password; who the caller is comes from the bearer token
//! the session stores with `SET SESSION AUTHORIZATION`, resolved again on
//! every statement.

use std::collections::HashMap;

use async_trait::async_trait;
use pgwire::api::auth::{AuthSource, LoginInfo, Password};
use pgwire::error::PgWireResult;

use crate::identity::{AuthError, Identity, IdentityContext};

/// Client metadata key holding the session's bearer token.
pub const SESSION_TOKEN_KEY: &str = "shiftd.session_token";

#[derive(Debug)]
pub struct GatewayAuthSource {
    password: String,
}

impl GatewayAuthSource {
    pub fn new(password: String) -> Self {
        Self { password }
    }
}

#[async_trait]
impl AuthSource for GatewayAuthSource {
    async fn get_password(&self, _login: &LoginInfo) -> PgWireResult<Password> {
        Ok(Password::new(None, self.password.as_bytes().to_vec()))
    }
}

/// Validate `token` and remember it for the rest of the session. A bad
/// token leaves any previous credential in place.
pub fn store_session_token(
    metadata: &mut HashMap<String, String>,
    identities: &dyn IdentityContext,
    token: String,
) -> Result<Identity, AuthError> {
    let identity = identities.authenticate(&token)?;
    metadata.insert(SESSION_TOKEN_KEY.to_string(), token);
    Ok(identity)
}

pub fn clear_session_token(metadata: &mut HashMap<String, String>) {
    metadata.remove(SESSION_TOKEN_KEY);
}

/// Re-resolve the stored credential. Tokens expire mid-session, so the
/// result is never cached.
pub fn session_identity(
    metadata: &HashMap<String, String>,
    identities: &dyn IdentityContext,
) -> Result<Identity, AuthError> {
    let token = metadata
        .get(SESSION_TOKEN_KEY)
        .ok_or(AuthError::MissingCredential)?;
    identities.authenticate(token)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::JwtIdentity;
    use crate::model::Role;
    use std::time::Duration;
    use ulid::Ulid;

    fn manager() -> Identity {
        Identity {
            user_id: Ulid::new(),
            business_id: Ulid::new(),
            role: Role::Manager,
        }
    }

    #[test]
    fn no_token_is_missing_credential() {
        let jwt = JwtIdentity::new(b"k");
        let meta = HashMap::new();
        assert_eq!(
            session_identity(&meta, &jwt).unwrap_err(),
            AuthError::MissingCredential
        );
    }

    #[test]
    fn stored_token_resolves_each_time() {
        let jwt = JwtIdentity::new(b"k");
        let who = manager();
        let token = jwt.mint(&who, Duration::from_secs(60)).unwrap();
        let mut meta = HashMap::new();

        assert_eq!(store_session_token(&mut meta, &jwt, token).unwrap(), who);
        assert_eq!(session_identity(&meta, &jwt).unwrap(), who);

        clear_session_token(&mut meta);
        assert!(session_identity(&meta, &jwt).is_err());
    }

    #[test]
    fn bad_token_keeps_previous_session() {
        let jwt = JwtIdentity::new(b"k");
        let who = manager();
        let good = jwt.mint(&who, Duration::from_secs(60)).unwrap();
        let mut meta = HashMap::new();
        store_session_token(&mut meta, &jwt, good).unwrap();

        let forged = JwtIdentity::new(b"other")
            .mint(&manager(), Duration::from_secs(60))
            .unwrap();
        assert!(store_session_token(&mut meta, &jwt, forged).is_err());
        assert_eq!(session_identity(&meta, &jwt).unwrap(), who);
    }
}
