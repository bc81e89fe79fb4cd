use async_trait::async_trait;
use custodian_application::{ResourcePayload, ResourceStore, WriteReceipt};
use custodian_core::{AppError, AppResult};
use custodian_domain::{FieldSet, ResourceRef};
use reqwest::StatusCode;
use serde::Deserialize;

/// Client for the external store holding protected resource content.
///
/// Only the mediator and the retention scheduler call this store, so every
/// request it sends has already been authorized.
#[derive(Clone)]
pub struct HttpResourceStore {
    http_client: reqwest::Client,
    base_url: String,
}

#[derive(Debug, Deserialize)]
struct RevisionResponse {
    revision: String,
}

impl HttpResourceStore {
    /// Creates a client for the store at `base_url`.
    #[must_use]
    pub fn new(http_client: reqwest::Client, base_url: impl Into<String>) -> Self {
        Self {
            http_client,
            base_url: base_url.into().trim_end_matches('/').to_owned(),
        }
    }

    fn resource_url(&self, reference: &ResourceRef) -> String {
        format!(
            "{}/resources/{}/{}",
            self.base_url,
            reference.resource_type().as_str(),
            reference.resource_id().as_str()
        )
    }
}

fn read_url(resource_url: &str, fields: &FieldSet) -> String {
    let names: Vec<&str> = fields.iter().map(|field| field.as_str()).collect();
    format!("{resource_url}?fields={}", names.join(","))
}

fn transport_error(error: reqwest::Error) -> AppError {
    AppError::Unavailable(format!("resource store transport error: {error}"))
}

fn status_error(operation: &str, reference: &ResourceRef, status: StatusCode) -> AppError {
    if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
        return AppError::Unavailable(format!(
            "resource store returned {status} for {operation} of '{reference}'"
        ));
    }

    AppError::Internal(format!(
        "resource store rejected {operation} of '{reference}' with {status}"
    ))
}

#[async_trait]
impl ResourceStore for HttpResourceStore {
    async fn read(
        &self,
        reference: &ResourceRef,
        fields: &FieldSet,
    ) -> AppResult<ResourcePayload> {
        let response = self
            .http_client
            .get(read_url(self.resource_url(reference).as_str(), fields))
            .send()
            .await
            .map_err(transport_error)?;

        match response.status() {
            status if status.is_success() => {
                let payload: ResourcePayload = response.json().await.map_err(|error| {
                    AppError::Internal(format!("resource store returned malformed payload: {error}"))
                })?;
                // The store is trusted to filter, but never relied on.
                Ok(payload.restricted_to(fields))
            }
            StatusCode::NOT_FOUND => Err(AppError::NotFound(format!(
                "resource '{reference}' has no content"
            ))),
            status => Err(status_error("read", reference, status)),
        }
    }

    async fn write(
        &self,
        reference: &ResourceRef,
        payload: ResourcePayload,
    ) -> AppResult<WriteReceipt> {
        let response = self
            .http_client
            .put(self.resource_url(reference))
            .json(&payload)
            .send()
            .await
            .map_err(transport_error)?;

        let status = response.status();
        if !status.is_success() {
            return Err(status_error("write", reference, status));
        }

        let revision: RevisionResponse = response.json().await.map_err(|error| {
            AppError::Internal(format!("resource store returned malformed revision: {error}"))
        })?;
        Ok(WriteReceipt {
            reference: reference.clone(),
            revision: revision.revision,
        })
    }

    async fn revert_write(&self, receipt: &WriteReceipt) -> AppResult<bool> {
        let response = self
            .http_client
            .delete(format!(
                "{}/revisions/{}",
                self.resource_url(&receipt.reference),
                receipt.revision
            ))
            .send()
            .await
            .map_err(transport_error)?;

        match response.status() {
            status if status.is_success() => Ok(true),
            StatusCode::NOT_FOUND | StatusCode::METHOD_NOT_ALLOWED | StatusCode::CONFLICT => {
                Ok(false)
            }
            status => Err(status_error("revert", &receipt.reference, status)),
        }
    }

    async fn delete(&self, reference: &ResourceRef) -> AppResult<()> {
        let response = self
            .http_client
            .delete(self.resource_url(reference))
            .send()
            .await
            .map_err(transport_error)?;

        match response.status() {
            status if status.is_success() => Ok(()),
            StatusCode::NOT_FOUND | StatusCode::GONE => Ok(()),
            status => Err(status_error("delete", reference, status)),
        }
    }

    async fn archive(&self, reference: &ResourceRef) -> AppResult<()> {
        let response = self
            .http_client
            .post(format!("{}/archive", self.resource_url(reference)))
            .send()
            .await
            .map_err(transport_error)?;

        match response.status() {
            status if status.is_success() => Ok(()),
            StatusCode::CONFLICT => {
                tracing::warn!(resource = %reference, "resource already archived");
                Ok(())
            }
            status => Err(status_error("archive", reference, status)),
        }
    }
}
