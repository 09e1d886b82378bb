use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use super::{Accession, ValidationError};

/// The kind of work that a work package authorizes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkPackageType {
    Download,
    Upload,
}

impl WorkPackageType {
    /// The capitalized name as used in user-facing messages.
    pub fn capitalized(&self) -> &'static str {
        match self {
            WorkPackageType::Download => "Download",
            WorkPackageType::Upload => "Upload",
        }
    }
}

impl std::fmt::Display for WorkPackageType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            WorkPackageType::Download => "download",
            WorkPackageType::Upload => "upload",
        })
    }
}

fn check_package_ids(
    work_type: WorkPackageType,
    dataset_id: Option<&str>,
    box_id: Option<&Uuid>,
) -> Result<(), ValidationError> {
    let mut errors = Vec::new();
    match work_type {
        WorkPackageType::Download => {
            if dataset_id.map_or(true, str::is_empty) {
                errors.push("dataset_id is required for download work packages");
            }
            if box_id.is_some() {
                errors.push("box_id shouldn't be provided for download work packages");
            }
        }
        WorkPackageType::Upload => {
            if box_id.is_none() {
                errors.push("box_id is required for upload work packages");
            }
            if dataset_id.is_some() {
                errors.push("dataset_id shouldn't be provided for upload work packages");
            }
        }
    }
    if errors.is_empty() {
        Ok(())
    } else {
        Err(ValidationError::from_messages(errors))
    }
}

/// All data necessary to create a work package.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct WorkPackageCreationData {
    /// The work package type.
    pub r#type: WorkPackageType,
    /// The accession of the dataset, for download work packages.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dataset_id: Option<Accession>,
    /// The ID of the upload box, for upload work packages.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub box_id: Option<Uuid>,
    /// Accessions of the files to include. If absent, all files of the
    /// dataset are assumed as target.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_ids: Option<Vec<Accession>>,
    /// The user's public Crypt4GH key in base64 encoding.
    pub user_public_crypt4gh_key: String,
}

impl WorkPackageCreationData {
    /// Check the cross-field invariant between the work type and the
    /// dataset/box IDs, and validate and normalize the public key.
    ///
    /// Returns the data with the key stripped of any PEM wrapper.
    pub fn validated(mut self) -> Result<Self, ValidationError> {
        check_package_ids(self.r#type, self.dataset_id.as_deref(), self.box_id.as_ref())?;
        self.user_public_crypt4gh_key = crate::crypto::validate_public_key(&self.user_public_crypt4gh_key)
            .map_err(|error| ValidationError(error.to_string()))?;
        Ok(self)
    }
}

/// All data that describes a work package.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct WorkPackage {
    /// The ID of the work package.
    pub id: Uuid,
    /// The work package type.
    pub r#type: WorkPackageType,
    /// The accession of the dataset, for download work packages.
    #[serde(default)]
    pub dataset_id: Option<Accession>,
    /// The ID of the upload box, for upload work packages.
    #[serde(default)]
    pub box_id: Option<Uuid>,
    /// Accessions of all included files mapped to their file extensions.
    /// Empty for upload work packages, where files arrive dynamically.
    #[serde(default)]
    pub files: BTreeMap<Accession, String>,
    /// The unique ID of the user.
    pub user_id: Uuid,
    /// The user's full name, including an academic title if present.
    pub full_user_name: String,
    /// E-mail address of the user.
    pub email: String,
    /// The user's public Crypt4GH key in base64 encoding.
    pub user_public_crypt4gh_key: String,
    /// Hex-encoded SHA-256 hash of the work package access token. The
    /// plaintext token is never persisted.
    pub token_hash: String,
    /// Creation date of the work package.
    pub created: DateTime<Utc>,
    /// Expiration date of the work package.
    pub expires: DateTime<Utc>,
}

impl WorkPackage {
    /// The subset of the work package that holders of the access token may
    /// inspect.
    pub fn details(&self) -> WorkPackageDetails {
        WorkPackageDetails {
            r#type: self.r#type,
            files: match self.r#type {
                WorkPackageType::Download => Some(self.files.clone()),
                WorkPackageType::Upload => None,
            },
            box_id: self.box_id,
            created: self.created,
            expires: self.expires,
        }
    }
}

/// Response returned when a work package has been created.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct WorkPackageCreationResponse {
    /// The ID of the work package.
    pub id: Uuid,
    /// The work package access token, encrypted with the user's public
    /// Crypt4GH key.
    pub token: String,
    /// The expiration date of the work package.
    pub expires: DateTime<Utc>,
}

/// Details about a work package that can be requested with its access token.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct WorkPackageDetails {
    /// The work package type.
    pub r#type: WorkPackageType,
    /// Accessions of all included files mapped to their file extensions.
    /// Absent for upload work packages.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub files: Option<BTreeMap<Accession, String>>,
    /// The ID of the upload box, for upload work packages.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub box_id: Option<Uuid>,
    /// Creation date of the work package.
    pub created: DateTime<Utc>,
    /// Expiration date of the work package.
    pub expires: DateTime<Utc>,
}
