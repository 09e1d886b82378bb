//! Domain entities and request/response models of the work package service.

mod dataset;
mod upload_box;
mod work_order;
mod work_package;

pub use self::{
    dataset::{Dataset, DatasetFile, DatasetWithExpiration},
    upload_box::{BoxState, BoxWithExpiration, FileAccessionMap, ResearchDataUploadBox, UploadBoxBasics},
    work_order::{UploadWorkOrderTokenRequest, UploadWorkType, WorkOrderToken},
    work_package::{
        WorkPackage, WorkPackageCreationData, WorkPackageCreationResponse, WorkPackageDetails,
        WorkPackageType,
    },
};

/// A stable domain identifier for a file or dataset, shaped `GHGA…` for files.
///
/// Dataset accessions predate the naming scheme and are not constrained to the
/// `GHGA` prefix, so this stays a plain string alias.
pub type Accession = String;

/// An error describing why a request model failed cross-field validation.
///
/// Multiple violations are joined with `"; "` in the order they were detected.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{0}")]
pub struct ValidationError(pub String);

impl ValidationError {
    pub(crate) fn from_messages(messages: Vec<&str>) -> Self {
        ValidationError(messages.join("; "))
    }
}
