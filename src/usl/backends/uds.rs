//! UDS Registration Authority Client
//!
//! HTTP adapter for the remote registration authority. A registration is
//! started with a `PUT` and polled with a `GET` on the same endpoint:
//! `201 Created` means pending, `200 OK` means confirmed.

use crate::domain::ports::{RegistrationAuthority, RegistrationRequest, RegistrationStatus};
use crate::error::{Error, Result};
use async_trait::async_trait;
use reqwest::{Client, StatusCode, Url};
use std::time::Duration;
use tracing::debug;

const REGISTER_DEVICE_PATH: &str = "uds/v1/registration/RegisterDevice";

/// [`RegistrationAuthority`] backed by the UDS REST API
#[derive(Debug, Clone)]
pub struct UdsClient {
    client: Client,
    endpoint: Url,
}

impl UdsClient {
    /// Create a client for the authority at `base_url`
    pub fn new(base_url: &str) -> Result<Self> {
        let base = Url::parse(base_url)
            .map_err(|e| Error::Configuration(format!("Invalid UDS URL {}: {}", base_url, e)))?;
        if !matches!(base.scheme(), "http" | "https") {
            return Err(Error::Configuration(format!(
                "UDS URL must be http or https: {}",
                base_url
            )));
        }

        let base = if base.path().ends_with('/') {
            base
        } else {
            Url::parse(&format!("{}/", base))
                .map_err(|e| Error::Configuration(format!("Invalid UDS URL {}: {}", base_url, e)))?
        };
        let endpoint = base
            .join(REGISTER_DEVICE_PATH)
            .map_err(|e| Error::Configuration(format!("Invalid UDS URL {}: {}", base_url, e)))?;

        let client = Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .map_err(Error::Http)?;

        Ok(Self { client, endpoint })
    }

    /// Endpoint used for both start and status requests
    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }
}

fn classify(status: StatusCode) -> RegistrationStatus {
    match status {
        StatusCode::CREATED => RegistrationStatus::Created,
        StatusCode::OK => RegistrationStatus::Confirmed,
        other => RegistrationStatus::Unexpected(other.as_u16()),
    }
}

#[async_trait]
impl RegistrationAuthority for UdsClient {
    async fn start(&self, request: &RegistrationRequest) -> Result<RegistrationStatus> {
        debug!("Starting UDS registration for {}", request.url);
        let response = self
            .client
            .put(self.endpoint.clone())
            .query(&[
                ("url", request.url.as_str()),
                ("regPin", request.reg_pin.as_str()),
                ("regToken", request.reg_token.as_str()),
            ])
            .send()
            .await?;
        Ok(classify(response.status()))
    }

    async fn status(&self) -> Result<RegistrationStatus> {
        let response = self.client.get(self.endpoint.clone()).send().await?;
        Ok(classify(response.status()))
    }
}
