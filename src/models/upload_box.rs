use chrono::{DateTime, Utc};
use uuid::Uuid;

use super::Accession;

/// The lifecycle state of an upload box.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BoxState {
    Open,
    Locked,
    Archived,
}

/// The full research data upload box resource as published by the upload
/// coordination service.
///
/// Only a subset of these fields is projected locally, see [`UploadBoxBasics`].
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct ResearchDataUploadBox {
    /// Unique identifier of the research data upload box.
    pub id: Uuid,
    /// A counter indicating the resource version.
    pub version: u64,
    /// Current state of the research data upload box.
    pub state: BoxState,
    /// Short meaningful name of the box.
    pub title: String,
    /// Describes the upload box in more detail.
    pub description: Option<String>,
    /// Timestamp of the latest change.
    pub last_changed: DateTime<Utc>,
    /// ID of the user who performed the latest change.
    pub changed_by: Uuid,
    /// The ID of the contained file upload box.
    pub file_upload_box_id: Uuid,
    /// A counter indicating the file upload box version.
    pub file_upload_box_version: u64,
    /// Current state of the file upload box.
    pub file_upload_box_state: BoxState,
    /// The number of files in the box.
    #[serde(default)]
    pub file_count: u64,
    /// The total size of all files in the box in bytes.
    #[serde(default)]
    pub size: u64,
    /// Alias of the object storage to use for uploads.
    pub storage_alias: String,
}

impl ResearchDataUploadBox {
    /// The locally projected subset of this resource.
    pub fn basics(&self) -> UploadBoxBasics {
        UploadBoxBasics {
            id: self.id,
            file_upload_box_id: self.file_upload_box_id,
            title: self.title.clone(),
            description: self.description.clone(),
        }
    }
}

/// The locally stored subset of a research data upload box.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct UploadBoxBasics {
    /// The ID of the research data upload box. This is the ID that upload
    /// access claims are tied to.
    pub id: Uuid,
    /// The ID of the contained file upload box. This is the ID that the
    /// downstream upload services recognize.
    pub file_upload_box_id: Uuid,
    /// The title of the upload box.
    pub title: String,
    /// The description of the upload box.
    #[serde(default)]
    pub description: Option<String>,
}

/// An upload box together with the date until which the user may access it.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct BoxWithExpiration {
    #[serde(flatten)]
    pub box_basics: UploadBoxBasics,
    /// The expiration date of the user's access to the upload box.
    pub expires: DateTime<Utc>,
}

/// Associates a file accession with the ID of the corresponding file upload.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct FileAccessionMap {
    /// The accession assigned to the file.
    pub accession: Accession,
    /// Unique identifier of the file upload.
    pub file_id: Uuid,
}
