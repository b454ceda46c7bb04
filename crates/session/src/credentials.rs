//! Credential provisioning seam.

use std::future::Future;
use std::pin::Pin;

use uplink_protocol::Credentials;

use crate::SessionError;

/// Boxed future returned by [`CredentialProvider::provision`].
pub type ProvisionFuture<'a> =
    Pin<Box<dyn Future<Output = Result<Credentials, SessionError>> + Send + 'a>>;

/// Issues connection identifiers and a session token for a recording.
pub trait CredentialProvider: Send + Sync {
    fn provision<'a>(&'a self, session_id: &'a str) -> ProvisionFuture<'a>;
}

/// Fixed identifiers taken from configuration.
#[derive(Debug, Clone)]
pub struct StaticCredentials {
    connection_id: String,
    connection_token: String,
}

impl StaticCredentials {
    pub fn new(connection_id: impl Into<String>, connection_token: impl Into<String>) -> Self {
        Self {
            connection_id: connection_id.into(),
            connection_token: connection_token.into(),
        }
    }
}

impl CredentialProvider for StaticCredentials {
    fn provision<'a>(&'a self, session_id: &'a str) -> ProvisionFuture<'a> {
        Box::pin(async move {
            if self.connection_id.is_empty() || self.connection_token.is_empty() {
                return Err(SessionError::Provision(
                    "connection id and token must not be empty".into(),
                ));
            }
            Ok(Credentials {
                session_id: session_id.to_string(),
                connection_id: self.connection_id.clone(),
                connection_token: self.connection_token.clone(),
            })
        })
    }
}
