//! Entity store client (§6, external contract).
//!
//! A thin REST wrapper over the content-addressed entity store. Compare-
//! and-swap semantics live one level up, in [`crate::publisher`]; this
//! module only exposes the raw operations and maps transport failures into
//! [`crate::error::OrganizerError::StoreTransient`] /
//! `StorePermanent`.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{OrganizerError, Result};
use crate::model::Entity;

pub struct EntityStoreClient {
    http: reqwest::Client,
    base: String,
}

#[derive(Debug, Serialize)]
pub struct CreateEntityRequest {
    pub components: BTreeMap<String, String>,
    pub parent: String,
    #[serde(rename = "type")]
    pub entity_type: String,
    pub note: String,
}

#[derive(Debug, Serialize)]
pub struct AppendVersionRequest {
    pub expect_tip: String,
    pub components: BTreeMap<String, String>,
    pub components_remove: Vec<String>,
    pub note: String,
}

#[derive(Debug, Deserialize)]
pub struct UploadedBlob {
    pub cid: String,
}

impl EntityStoreClient {
    pub fn new(base: String, timeout: std::time::Duration) -> Result<Self> {
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self { http, base })
    }

    pub async fn get_entity(&self, id: &str) -> Result<Entity> {
        let response = self
            .http
            .get(format!("{}/entities/{id}", self.base))
            .send()
            .await
            .map_err(|err| OrganizerError::StoreTransient(err.to_string()))?;
        self.parse_response(response).await
    }

    pub async fn cat(&self, cid: &str) -> Result<Vec<u8>> {
        let response = self
            .http
            .get(format!("{}/cat/{cid}", self.base))
            .send()
            .await
            .map_err(|err| OrganizerError::StoreTransient(err.to_string()))?;

        let status = response.status();
        if status.is_client_error() {
            return Err(OrganizerError::StorePermanent(format!(
                "cat {cid} returned {status}"
            )));
        }
        if !status.is_success() {
            return Err(OrganizerError::StoreTransient(format!(
                "cat {cid} returned {status}"
            )));
        }

        response
            .bytes()
            .await
            .map(|b| b.to_vec())
            .map_err(|err| OrganizerError::StoreTransient(err.to_string()))
    }

    /// Upload raw content as a single multipart part; the store returns one
    /// content address per uploaded part.
    pub async fn upload(&self, filename: &str, content: Vec<u8>) -> Result<String> {
        let part = reqwest::multipart::Part::bytes(content).file_name(filename.to_string());
        let form = reqwest::multipart::Form::new().part("file", part);

        let response = self
            .http
            .post(format!("{}/upload", self.base))
            .multipart(form)
            .send()
            .await
            .map_err(|err| OrganizerError::StoreTransient(err.to_string()))?;

        let blobs: Vec<UploadedBlob> = self.parse_response(response).await?;
        blobs
            .into_iter()
            .next()
            .map(|blob| blob.cid)
            .ok_or_else(|| OrganizerError::StoreTransient("upload returned no cid".to_string()))
    }

    pub async fn create_entity(&self, request: CreateEntityRequest) -> Result<Entity> {
        let response = self
            .http
            .post(format!("{}/entities", self.base))
            .json(&request)
            .send()
            .await
            .map_err(|err| OrganizerError::StoreTransient(err.to_string()))?;
        self.parse_response(response).await
    }

    /// Append a new version to entity `id`. Fails with `StoreTransient` on a
    /// CAS mismatch so the caller's retry loop refetches the tip before
    /// trying again (§4.I, §9).
    pub async fn append_version(&self, id: &str, request: AppendVersionRequest) -> Result<Entity> {
        let response = self
            .http
            .post(format!("{}/entities/{id}/versions", self.base))
            .json(&request)
            .send()
            .await
            .map_err(|err| OrganizerError::StoreTransient(err.to_string()))?;

        if response.status() == reqwest::StatusCode::CONFLICT {
            return Err(OrganizerError::StoreTransient(format!(
                "CAS conflict appending version to {id}"
            )));
        }

        self.parse_response(response).await
    }

    async fn parse_response<T: serde::de::DeserializeOwned>(&self, response: reqwest::Response) -> Result<T> {
        let status = response.status();

        if status.is_client_error() {
            let body: Value = response.json().await.unwrap_or(Value::Null);
            return Err(OrganizerError::StorePermanent(format!(
                "entity store returned {status}: {body}"
            )));
        }
        if !status.is_success() {
            return Err(OrganizerError::StoreTransient(format!(
                "entity store returned {status}"
            )));
        }

        response
            .json::<T>()
            .await
            .map_err(|err| OrganizerError::StoreTransient(err.to_string()))
    }
}
