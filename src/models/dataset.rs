use chrono::{DateTime, Utc};

use super::{Accession, WorkPackageType};

/// A single file that is part of a dataset.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct DatasetFile {
    /// The file accession.
    pub id: Accession,
    /// The file extension, including the leading dot.
    pub extension: String,
}

/// A dataset as projected from the metadata catalog.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct Dataset {
    /// The dataset accession.
    pub id: Accession,
    /// The stage the dataset is currently in, which determines the kind of
    /// work packages that can be created for it.
    pub stage: WorkPackageType,
    /// The title of the dataset.
    pub title: String,
    /// The description of the dataset.
    pub description: Option<String>,
    /// The files contained in the dataset, in catalog order.
    pub files: Vec<DatasetFile>,
}

/// A dataset together with the date until which the user may access it.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct DatasetWithExpiration {
    #[serde(flatten)]
    pub dataset: Dataset,
    /// The expiration date of the user's access to the dataset.
    pub expires: DateTime<Utc>,
}
