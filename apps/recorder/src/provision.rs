//! HTTP credential provisioning.
//!
//! `POST <provisioning_url>` with `{"session_id": ...}`; the server answers
//! with the connection id and token the ingestion endpoint expects.

use serde::{Deserialize, Serialize};

use uplink_protocol::Credentials;
use uplink_session::{CredentialProvider, ProvisionFuture, SessionError};

#[derive(Serialize)]
struct ProvisionRequest<'a> {
    session_id: &'a str,
}

#[derive(Deserialize)]
struct ProvisionResponse {
    connection_id: String,
    connection_token: String,
}

/// Fetches credentials from an HTTP endpoint.
pub struct HttpProvisioner {
    http: reqwest::Client,
    url: String,
}

impl HttpProvisioner {
    pub fn new(url: impl Into<String>) -> Result<Self, reqwest::Error> {
        let http = reqwest::Client::builder()
            .user_agent(concat!("uplink-recorder/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self {
            http,
            url: url.into(),
        })
    }

    async fn fetch(&self, session_id: &str) -> Result<Credentials, SessionError> {
        let resp = self
            .http
            .post(&self.url)
            .json(&ProvisionRequest { session_id })
            .send()
            .await
            .map_err(|e| SessionError::Provision(e.to_string()))?;
        let status = resp.status();

        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(SessionError::Provision(format!(
                "provisioning failed with {}: {body}",
                status.as_u16()
            )));
        }

        let issued: ProvisionResponse = resp
            .json()
            .await
            .map_err(|e| SessionError::Provision(format!("invalid response: {e}")))?;
        if issued.connection_id.is_empty() || issued.connection_token.is_empty() {
            return Err(SessionError::Provision(
                "server issued empty credentials".into(),
            ));
        }

        tracing::debug!(connection_id = %issued.connection_id, "credentials provisioned");
        Ok(Credentials {
            session_id: session_id.to_string(),
            connection_id: issued.connection_id,
            connection_token: issued.connection_token,
        })
    }
}

impl CredentialProvider for HttpProvisioner {
    fn provision<'a>(&'a self, session_id: &'a str) -> ProvisionFuture<'a> {
        Box::pin(self.fetch(session_id))
    }
}
