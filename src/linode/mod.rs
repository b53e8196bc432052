//! Linode v4 REST client.
//!
//! [`LinodeClient`] implements [`CloudApi`] over `reqwest`. It is an
//! explicit handle built from configuration and passed by value into the
//! provisioner or inventory builder; nothing here is global except the
//! shared connection pool.

mod error;
mod wire;

use std::fmt;
use std::sync::LazyLock;
use std::time::Duration;

use reqwest::{Method, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use tracing::debug;

use crate::cloud::{
    ApiFuture, BootConfig, CloudApi, ConfigId, CreateBootConfigRequest, CreateDiskRequest,
    CreateInstanceRequest, CreatePayloadRequest, Disk, Image, Instance, InstanceFilter,
    InstanceId, IpAddress, PayloadId, ProvisioningPayload,
};
use crate::config::LinodeConfig;

pub use error::LinodeError;
use wire::{BootBody, ConfigResponse, DiskBody, DiskResponse, ErrorBody, Page};

/// Production API endpoint.
pub const LINODE_API_BASE: &str = "https://api.linode.com/v4";

/// Items requested per page from list endpoints.
pub const PAGE_SIZE: u32 = 500;

const HTTP_TIMEOUT: Duration = Duration::from_secs(30);
const FILTER_HEADER: &str = "X-Filter";

static HTTP_CLIENT: LazyLock<reqwest::Client> = LazyLock::new(|| {
    reqwest::Client::builder()
        .timeout(HTTP_TIMEOUT)
        .build()
        .unwrap_or_else(|_| reqwest::Client::new())
});

#[derive(Clone, Copy, Debug)]
enum Verb {
    Get,
    Post,
    Delete,
}

impl Verb {
    const fn as_str(self) -> &'static str {
        match self {
            Self::Get => "GET",
            Self::Post => "POST",
            Self::Delete => "DELETE",
        }
    }

    const fn method(self) -> Method {
        match self {
            Self::Get => Method::GET,
            Self::Post => Method::POST,
            Self::Delete => Method::DELETE,
        }
    }
}

/// Authenticated handle on the Linode API.
#[derive(Clone)]
pub struct LinodeClient {
    http: reqwest::Client,
    base_url: String,
    token: String,
}

impl fmt::Debug for LinodeClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LinodeClient")
            .field("base_url", &self.base_url)
            .field("token", &"<redacted>")
            .finish_non_exhaustive()
    }
}

impl LinodeClient {
    /// Creates a client for the production endpoint.
    ///
    /// # Errors
    ///
    /// Returns [`LinodeError::MissingToken`] when `token` is blank.
    pub fn new(token: impl Into<String>) -> Result<Self, LinodeError> {
        let trimmed = token.into().trim().to_owned();
        if trimmed.is_empty() {
            return Err(LinodeError::MissingToken);
        }
        Ok(Self {
            http: HTTP_CLIENT.clone(),
            base_url: LINODE_API_BASE.to_owned(),
            token: trimmed,
        })
    }

    /// Creates a client from loaded configuration.
    ///
    /// # Errors
    ///
    /// Returns [`LinodeError::MissingToken`] when no token is configured.
    pub fn from_config(config: &LinodeConfig) -> Result<Self, LinodeError> {
        Ok(Self::new(config.personal_access_token.as_str())?.with_base_url(&config.api_url))
    }

    /// Points the client at another endpoint.
    #[must_use]
    pub fn with_base_url(mut self, base_url: &str) -> Self {
        base_url.trim().trim_end_matches('/').clone_into(&mut self.base_url);
        self
    }

    /// Replaces the underlying HTTP client.
    #[must_use]
    pub fn with_http_client(mut self, http: reqwest::Client) -> Self {
        self.http = http;
        self
    }

    /// The API base URL requests are sent to.
    #[must_use]
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn request(&self, verb: Verb, path: &str) -> RequestBuilder {
        self.http
            .request(verb.method(), format!("{}{path}", self.base_url))
            .bearer_auth(&self.token)
            .timeout(HTTP_TIMEOUT)
    }

    async fn execute(
        verb: Verb,
        path: &str,
        builder: RequestBuilder,
    ) -> Result<Response, LinodeError> {
        debug!(method = verb.as_str(), path, "linode request");
        let response = builder.send().await.map_err(|err| LinodeError::Http {
            method: verb.as_str(),
            path: path.to_owned(),
            message: err.to_string(),
        })?;
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let bytes = response.bytes().await.unwrap_or_default();
        let mut reasons = serde_json::from_slice::<ErrorBody>(&bytes)
            .unwrap_or_default()
            .into_reasons();
        if reasons.is_empty() {
            reasons.push(
                status
                    .canonical_reason()
                    .unwrap_or("unexpected status")
                    .to_owned(),
            );
        }
        debug!(method = verb.as_str(), path, status = status.as_u16(), ?reasons, "linode error");
        Err(LinodeError::Api {
            method: verb.as_str(),
            path: path.to_owned(),
            status: status.as_u16(),
            reasons,
        })
    }

    async fn decode<T: DeserializeOwned>(
        verb: Verb,
        path: &str,
        response: Response,
    ) -> Result<T, LinodeError> {
        let bytes = response.bytes().await.map_err(|err| LinodeError::Http {
            method: verb.as_str(),
            path: path.to_owned(),
            message: err.to_string(),
        })?;
        serde_json::from_slice(&bytes).map_err(|err| LinodeError::Decode {
            path: path.to_owned(),
            message: err.to_string(),
        })
    }

    async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T, LinodeError> {
        let response = Self::execute(Verb::Get, path, self.request(Verb::Get, path)).await?;
        Self::decode(Verb::Get, path, response).await
    }

    async fn post<B: serde::Serialize + Sync, T: DeserializeOwned>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T, LinodeError> {
        let builder = self.request(Verb::Post, path).json(body);
        let response = Self::execute(Verb::Post, path, builder).await?;
        Self::decode(Verb::Post, path, response).await
    }

    async fn delete(&self, path: &str) -> Result<(), LinodeError> {
        Self::execute(Verb::Delete, path, self.request(Verb::Delete, path)).await?;
        Ok(())
    }

    async fn list_all<T: DeserializeOwned>(
        &self,
        path: &str,
        filter: Option<&str>,
    ) -> Result<Vec<T>, LinodeError> {
        let mut items = Vec::new();
        let mut page = 1_u32;
        loop {
            let mut builder = self
                .request(Verb::Get, path)
                .query(&[("page", page), ("page_size", PAGE_SIZE)]);
            if let Some(value) = filter {
                builder = builder.header(FILTER_HEADER, value);
            }
            let response = Self::execute(Verb::Get, path, builder).await?;
            let batch: Page<T> = Self::decode(Verb::Get, path, response).await?;
            items.extend(batch.data);
            if batch.page >= batch.pages {
                return Ok(items);
            }
            page = batch.page + 1;
        }
    }
}

impl CloudApi for LinodeClient {
    type Error = LinodeError;

    fn get_image<'a>(&'a self, image_id: &'a str) -> ApiFuture<'a, Image, Self::Error> {
        Box::pin(async move { self.get(&format!("/images/{image_id}")).await })
    }

    fn create_instance<'a>(
        &'a self,
        request: &'a CreateInstanceRequest,
    ) -> ApiFuture<'a, Instance, Self::Error> {
        Box::pin(async move { self.post("/linode/instances", request).await })
    }

    fn create_disk<'a>(
        &'a self,
        instance_id: InstanceId,
        request: &'a CreateDiskRequest<'a>,
    ) -> ApiFuture<'a, Disk, Self::Error> {
        Box::pin(async move {
            let path = format!("/linode/instances/{instance_id}/disks");
            let disk: DiskResponse = self.post(&path, &DiskBody::from(request)).await?;
            Ok(disk.into_disk(instance_id))
        })
    }

    fn create_boot_config<'a>(
        &'a self,
        instance_id: InstanceId,
        request: &'a CreateBootConfigRequest,
    ) -> ApiFuture<'a, BootConfig, Self::Error> {
        Box::pin(async move {
            let path = format!("/linode/instances/{instance_id}/configs");
            let config: ConfigResponse = self.post(&path, request).await?;
            Ok(config.into_config(instance_id))
        })
    }

    fn boot_instance(
        &self,
        instance_id: InstanceId,
        config_id: ConfigId,
    ) -> ApiFuture<'_, (), Self::Error> {
        Box::pin(async move {
            let path = format!("/linode/instances/{instance_id}/boot");
            let _: serde_json::Value = self.post(&path, &BootBody { config_id }).await?;
            Ok(())
        })
    }

    fn get_instance(&self, instance_id: InstanceId) -> ApiFuture<'_, Instance, Self::Error> {
        Box::pin(async move { self.get(&format!("/linode/instances/{instance_id}")).await })
    }

    fn delete_instance(&self, instance_id: InstanceId) -> ApiFuture<'_, (), Self::Error> {
        Box::pin(async move { self.delete(&format!("/linode/instances/{instance_id}")).await })
    }

    fn list_instances<'a>(
        &'a self,
        filter: &'a InstanceFilter,
    ) -> ApiFuture<'a, Vec<Instance>, Self::Error> {
        Box::pin(async move {
            let path = "/linode/instances";
            let header = if filter.is_empty() {
                None
            } else {
                Some(
                    serde_json::to_string(filter).map_err(|err| LinodeError::Decode {
                        path: path.to_owned(),
                        message: err.to_string(),
                    })?,
                )
            };
            self.list_all(path, header.as_deref()).await
        })
    }

    fn list_ip_addresses(&self) -> ApiFuture<'_, Vec<IpAddress>, Self::Error> {
        Box::pin(async move { self.list_all("/networking/ips", None).await })
    }

    fn create_payload<'a>(
        &'a self,
        request: &'a CreatePayloadRequest,
    ) -> ApiFuture<'a, ProvisioningPayload, Self::Error> {
        Box::pin(async move { self.post("/linode/stackscripts", request).await })
    }

    fn delete_payload(&self, payload_id: PayloadId) -> ApiFuture<'_, (), Self::Error> {
        Box::pin(async move { self.delete(&format!("/linode/stackscripts/{payload_id}")).await })
    }
}

#[cfg(test)]
mod tests;
