//! Client for the internal access API that knows which user may download
//! which dataset and upload into which box, and until when.

use std::collections::HashMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use reqwest::StatusCode;
use tracing::error;
use uuid::Uuid;

/// Hard timeout for calls to the access API.
const TIMEOUT: Duration = Duration::from_secs(60);

/// Errors when querying the access API.
///
/// These signal infrastructure faults, never a missing permission; a missing
/// permission is a regular `Ok(None)` / empty result. Keeping the two apart
/// lets callers fail closed on faults without treating them as denials.
#[derive(Debug, thiserror::Error)]
pub enum AccessCheckError {
    #[error("call to the access API failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("call to the access API failed with status {0}")]
    Status(StatusCode),
    #[error("invalid expiration date in access API response")]
    InvalidExpiration,
    #[error("invalid resource ID in access API response")]
    InvalidResourceId,
}

/// A client for the download and upload halves of the access API.
pub struct AccessCheckClient {
    client: reqwest::Client,
    download_url: String,
    upload_url: String,
}

fn parse_expiration(value: &str) -> Result<DateTime<Utc>, AccessCheckError> {
    DateTime::parse_from_rfc3339(value)
        .map(|datetime| datetime.with_timezone(&Utc))
        .map_err(|_| {
            error!(value, "invalid expiration date from the access API");
            AccessCheckError::InvalidExpiration
        })
}

impl AccessCheckClient {
    /// Configure a client for the access API at the given base URL.
    pub fn new(access_url: &str) -> Result<Self, AccessCheckError> {
        let base_url = access_url.trim_end_matches('/');
        let client = reqwest::Client::builder().timeout(TIMEOUT).build()?;
        Ok(AccessCheckClient {
            client,
            download_url: format!("{base_url}/download-access"),
            upload_url: format!("{base_url}/upload-access"),
        })
    }

    async fn get_expiration(
        &self,
        url: String,
    ) -> Result<Option<DateTime<Utc>>, AccessCheckError> {
        let response = self.client.get(&url).send().await?;
        match response.status() {
            StatusCode::OK => {}
            StatusCode::NOT_FOUND => return Ok(None),
            status => {
                error!(%status, "call to the access API failed");
                return Err(AccessCheckError::Status(status));
            }
        }
        match response.json::<Option<String>>().await? {
            Some(valid_until) => parse_expiration(&valid_until).map(Some),
            None => Ok(None),
        }
    }

    async fn get_expirations(
        &self,
        url: String,
    ) -> Result<HashMap<String, DateTime<Utc>>, AccessCheckError> {
        let response = self.client.get(&url).send().await?;
        match response.status() {
            StatusCode::OK => {}
            StatusCode::NOT_FOUND => return Ok(HashMap::new()),
            status => {
                error!(%status, "call to the access API failed");
                return Err(AccessCheckError::Status(status));
            }
        }
        let expirations = response.json::<HashMap<String, String>>().await?;
        expirations
            .into_iter()
            .map(|(id, valid_until)| Ok((id, parse_expiration(&valid_until)?)))
            .collect()
    }

    /// Check until when the given user has download access for the given
    /// dataset. `None` means no access.
    pub async fn check_download_access(
        &self,
        user_id: Uuid,
        dataset_id: &str,
    ) -> Result<Option<DateTime<Utc>>, AccessCheckError> {
        let url = format!("{}/users/{user_id}/datasets/{dataset_id}", self.download_url);
        self.get_expiration(url).await
    }

    /// All datasets the given user may download, mapped to the access
    /// expiration dates.
    pub async fn list_download_datasets(
        &self,
        user_id: Uuid,
    ) -> Result<HashMap<String, DateTime<Utc>>, AccessCheckError> {
        let url = format!("{}/users/{user_id}/datasets", self.download_url);
        self.get_expirations(url).await
    }

    /// Check until when the given user has upload access for the given box.
    /// `None` means no access.
    pub async fn check_upload_access(
        &self,
        user_id: Uuid,
        box_id: Uuid,
    ) -> Result<Option<DateTime<Utc>>, AccessCheckError> {
        let url = format!("{}/users/{user_id}/boxes/{box_id}", self.upload_url);
        self.get_expiration(url).await
    }

    /// All upload boxes the given user may upload into, mapped to the access
    /// expiration dates.
    pub async fn list_upload_boxes(
        &self,
        user_id: Uuid,
    ) -> Result<HashMap<Uuid, DateTime<Utc>>, AccessCheckError> {
        let url = format!("{}/users/{user_id}/boxes", self.upload_url);
        self.get_expirations(url)
            .await?
            .into_iter()
            .map(|(box_id, expiration)| {
                let box_id = box_id.parse().map_err(|_| {
                    error!(%box_id, "invalid box ID from the access API");
                    AccessCheckError::InvalidResourceId
                })?;
                Ok((box_id, expiration))
            })
            .collect()
    }
}
