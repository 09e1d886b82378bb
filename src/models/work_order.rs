use uuid::Uuid;

use super::{Accession, ValidationError};

/// A work order token authorizing one specific operation on one specific
/// resource.
///
/// The variant is carried in the `work_type` claim; each variant only has
/// the fields that are meaningful for its operation, so no illegal
/// combination can be constructed.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(tag = "work_type", rename_all = "lowercase")]
pub enum WorkOrderToken {
    /// Authorizes downloading a single file from a dataset.
    Download {
        /// The ID of the file upload if known, otherwise the accession.
        file_id: String,
        /// The accession of the file.
        accession: Accession,
        /// The user's public Crypt4GH key in base64 encoding.
        user_public_crypt4gh_key: String,
    },
    /// Authorizes viewing the contents of a file upload box.
    View {
        /// The ID of the file upload box.
        box_id: Uuid,
        /// The user's public Crypt4GH key in base64 encoding.
        user_public_crypt4gh_key: String,
    },
    /// Authorizes initiating a new file upload.
    Create {
        /// The alias of the file to be uploaded.
        alias: String,
        /// The ID of the file upload box.
        box_id: Uuid,
        /// The user's public Crypt4GH key in base64 encoding.
        user_public_crypt4gh_key: String,
    },
    /// Authorizes requesting part upload URLs for an existing file upload.
    Upload {
        /// The ID of the file upload.
        file_id: Uuid,
        /// The ID of the file upload box.
        box_id: Uuid,
        /// The user's public Crypt4GH key in base64 encoding.
        user_public_crypt4gh_key: String,
    },
    /// Authorizes completing an existing file upload.
    Close {
        /// The ID of the file upload.
        file_id: Uuid,
        /// The ID of the file upload box.
        box_id: Uuid,
        /// The user's public Crypt4GH key in base64 encoding.
        user_public_crypt4gh_key: String,
    },
    /// Authorizes deleting an existing file upload.
    Delete {
        /// The ID of the file upload.
        file_id: Uuid,
        /// The ID of the file upload box.
        box_id: Uuid,
        /// The user's public Crypt4GH key in base64 encoding.
        user_public_crypt4gh_key: String,
    },
}

impl WorkOrderToken {
    /// The value of the `work_type` claim of this token.
    pub fn work_type(&self) -> &'static str {
        match self {
            WorkOrderToken::Download { .. } => "download",
            WorkOrderToken::View { .. } => "view",
            WorkOrderToken::Create { .. } => "create",
            WorkOrderToken::Upload { .. } => "upload",
            WorkOrderToken::Close { .. } => "close",
            WorkOrderToken::Delete { .. } => "delete",
        }
    }
}

/// The kinds of work order tokens that can be requested for an upload box.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UploadWorkType {
    Create,
    Upload,
    Close,
    Delete,
    View,
}

/// Request payload for minting an upload-path work order token.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct UploadWorkOrderTokenRequest {
    /// The type of work order token to create.
    pub work_type: UploadWorkType,
    /// The file alias, required for the `create` work type.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alias: Option<String>,
    /// The file upload ID, required for the `upload`, `close` and `delete`
    /// work types.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_id: Option<Uuid>,
}

impl UploadWorkOrderTokenRequest {
    /// Check that exactly the parameters required by the work type are given.
    pub fn validate(&self) -> Result<(), ValidationError> {
        let mut errors = Vec::new();
        match self.work_type {
            UploadWorkType::View => {
                if self.alias.is_some() {
                    errors.push("alias shouldn't be provided for view work order tokens");
                }
                if self.file_id.is_some() {
                    errors.push("file_id shouldn't be provided for view work order tokens");
                }
            }
            UploadWorkType::Create => {
                if self.alias.as_deref().map_or(true, str::is_empty) {
                    errors.push("alias is required for create work order tokens");
                }
                if self.file_id.is_some() {
                    errors.push("file_id shouldn't be provided for create work order tokens");
                }
            }
            UploadWorkType::Upload | UploadWorkType::Close | UploadWorkType::Delete => {
                if self.file_id.is_none() {
                    errors.push("file_id is required for upload, close and delete work order tokens");
                }
                if self.alias.is_some() {
                    errors.push("alias shouldn't be provided for upload, close and delete work order tokens");
                }
            }
        }
        if errors.is_empty() {
            Ok(())
        } else {
            Err(ValidationError::from_messages(errors))
        }
    }
}
