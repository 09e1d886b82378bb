//! The work package repository: creation and retrieval of work packages,
//! minting of work order tokens, and maintenance of the local dataset and
//! upload box projections.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Duration, SubsecRound, Utc};
use tracing::{debug, error, info};
use uuid::Uuid;

use crate::access::{AccessCheckClient, AccessCheckError};
use crate::config::Config;
use crate::crypto::{
    generate_access_secret, hash_secret, seal, sign_work_order_token, JwkError, KeyError,
    SigningError, SigningKey,
};
use crate::models::{
    Accession, BoxWithExpiration, Dataset, DatasetWithExpiration, FileAccessionMap,
    ResearchDataUploadBox, UploadBoxBasics, UploadWorkType, WorkOrderToken, WorkPackage,
    WorkPackageCreationData, WorkPackageCreationResponse, WorkPackageType,
};
use crate::store::{Dao, DocumentStore, StoreError};

/// The identity of the authenticated user, as taken from a verified bearer
/// token.
#[derive(Debug, Clone)]
pub struct AuthContext {
    /// The internal user ID.
    pub id: String,
    /// The user's name.
    pub name: String,
    /// The user's e-mail address.
    pub email: String,
    /// The user's academic title, if any.
    pub title: Option<String>,
}

impl AuthContext {
    fn full_user_name(&self) -> String {
        match &self.title {
            Some(title) => format!("{title} {}", self.name),
            None => self.name.clone(),
        }
    }
}

/// Errors raised by the work package repository.
#[derive(Debug, thiserror::Error)]
pub enum RepositoryError {
    /// An authorization or validation failure that must not leak more detail
    /// than its message.
    #[error("{0}")]
    Access(String),
    /// A dataset lookup failed.
    #[error("Dataset not found")]
    DatasetNotFound,
    /// An upload box lookup failed.
    #[error("UploadBox not found")]
    UploadBoxNotFound,
    /// The access API could not be queried.
    #[error(transparent)]
    AccessCheck(#[from] AccessCheckError),
    /// The document store failed.
    #[error(transparent)]
    Store(#[from] StoreError),
    /// A work order token could not be signed.
    #[error(transparent)]
    Signing(#[from] SigningError),
    /// A token could not be encrypted to the user's key.
    #[error(transparent)]
    Sealing(#[from] KeyError),
}

fn access_error(message: impl Into<String>) -> RepositoryError {
    let error = RepositoryError::Access(message.into());
    error!(%error, "access denied");
    error
}

/// The central component of the service.
///
/// Holds the work order signing key and the handles to the access API and
/// the projection and work package stores. All mutations of local state go
/// through this type.
pub struct WorkPackageRepository {
    valid_duration: Duration,
    signing_key: SigningKey,
    access: AccessCheckClient,
    datasets: Dao<Dataset>,
    upload_boxes: Dao<UploadBoxBasics>,
    accession_maps: Dao<FileAccessionMap>,
    work_packages: Dao<WorkPackage>,
}

impl std::fmt::Debug for WorkPackageRepository {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkPackageRepository").finish_non_exhaustive()
    }
}

impl WorkPackageRepository {
    /// Create the repository from the service configuration.
    ///
    /// Fails if the configured signing key cannot be used for signing, so a
    /// public-only key is rejected at startup.
    pub fn new(
        config: &Config,
        access: AccessCheckClient,
        store: Arc<dyn DocumentStore>,
    ) -> Result<Self, JwkError> {
        let signing_key = SigningKey::from_jwk(&config.work_package_signing_key)?;
        Ok(WorkPackageRepository {
            valid_duration: Duration::days(config.work_package_valid_days),
            signing_key,
            access,
            datasets: Dao::new(store.clone(), &config.datasets_collection, "id"),
            upload_boxes: Dao::new(store.clone(), &config.upload_boxes_collection, "id"),
            accession_maps: Dao::new(store.clone(), &config.accession_maps_collection, "accession"),
            work_packages: Dao::new(store, &config.work_packages_collection, "id"),
        })
    }

    fn parse_user_id(auth_context: &AuthContext) -> Result<Uuid, RepositoryError> {
        auth_context
            .id
            .parse()
            .map_err(|_| access_error("Malformed user ID supplied"))
    }

    /// Create a work package and store it.
    ///
    /// The caller must have passed `creation_data` through
    /// [`WorkPackageCreationData::validated`] first; the returned token is
    /// encrypted with the user's public Crypt4GH key.
    pub async fn create(
        &self,
        creation_data: WorkPackageCreationData,
        auth_context: &AuthContext,
    ) -> Result<WorkPackageCreationResponse, RepositoryError> {
        let user_id = Self::parse_user_id(auth_context)?;
        match creation_data.r#type {
            WorkPackageType::Download => {
                let dataset_id = creation_data
                    .dataset_id
                    .clone()
                    .ok_or_else(|| access_error("dataset_id required for download work packages"))?;
                self.create_download_package(creation_data, auth_context, user_id, dataset_id)
                    .await
            }
            WorkPackageType::Upload => {
                let box_id = creation_data
                    .box_id
                    .ok_or_else(|| access_error("box_id required for upload work packages"))?;
                self.create_upload_package(creation_data, auth_context, user_id, box_id)
                    .await
            }
        }
    }

    async fn create_download_package(
        &self,
        creation_data: WorkPackageCreationData,
        auth_context: &AuthContext,
        user_id: Uuid,
        dataset_id: Accession,
    ) -> Result<WorkPackageCreationResponse, RepositoryError> {
        let expires = self
            .access
            .check_download_access(user_id, &dataset_id)
            .await
            .map_err(|error| {
                error!(%error, %user_id, %dataset_id, "access check failed");
                access_error("Failed to check dataset access permission")
            })?
            .ok_or_else(|| access_error("Missing dataset access permission"))?;

        let dataset = self
            .get_dataset(&dataset_id)
            .await
            .map_err(|_| access_error("Cannot determine dataset files"))?;

        let files: BTreeMap<Accession, String> = match &creation_data.file_ids {
            None => dataset
                .files
                .iter()
                .map(|file| (file.id.clone(), file.extension.clone()))
                .collect(),
            Some(file_ids) => dataset
                .files
                .iter()
                .filter(|file| file_ids.contains(&file.id))
                .map(|file| (file.id.clone(), file.extension.clone()))
                .collect(),
        };
        if files.is_empty() {
            return Err(access_error("No existing files have been specified"));
        }

        self.create_package_record(
            creation_data,
            auth_context,
            user_id,
            expires,
            files,
            Some(dataset_id),
            None,
        )
        .await
    }

    async fn create_upload_package(
        &self,
        creation_data: WorkPackageCreationData,
        auth_context: &AuthContext,
        user_id: Uuid,
        box_id: Uuid,
    ) -> Result<WorkPackageCreationResponse, RepositoryError> {
        let expires = self
            .access
            .check_upload_access(user_id, box_id)
            .await
            .map_err(|error| {
                error!(%error, %user_id, %box_id, "access check failed");
                access_error("Failed to check upload box access permission")
            })?
            .ok_or_else(|| access_error("Missing upload box access permission"))?;

        // files are created dynamically for upload work packages
        let files = BTreeMap::new();

        self.create_package_record(
            creation_data,
            auth_context,
            user_id,
            expires,
            files,
            None,
            Some(box_id),
        )
        .await
    }

    #[allow(clippy::too_many_arguments)]
    async fn create_package_record(
        &self,
        creation_data: WorkPackageCreationData,
        auth_context: &AuthContext,
        user_id: Uuid,
        access_expires: DateTime<Utc>,
        files: BTreeMap<Accession, String>,
        dataset_id: Option<Accession>,
        box_id: Option<Uuid>,
    ) -> Result<WorkPackageCreationResponse, RepositoryError> {
        let created = Utc::now().trunc_subsecs(3);
        let expires = (created + self.valid_duration).min(access_expires).trunc_subsecs(3);

        let secret = generate_access_secret();
        let work_package = WorkPackage {
            id: Uuid::new_v4(),
            r#type: creation_data.r#type,
            dataset_id,
            box_id,
            files,
            user_id,
            full_user_name: auth_context.full_user_name(),
            email: auth_context.email.clone(),
            user_public_crypt4gh_key: creation_data.user_public_crypt4gh_key.clone(),
            token_hash: hash_secret(&secret),
            created,
            expires,
        };
        self.work_packages.insert(&work_package).await?;
        let token = seal(&secret, &creation_data.user_public_crypt4gh_key)?;
        info!(work_package_id = %work_package.id, %user_id, "created work package");

        Ok(WorkPackageCreationResponse {
            id: work_package.id,
            token,
            expires,
        })
    }

    fn check_not_expired(work_package: &WorkPackage) -> Result<(), RepositoryError> {
        let now = Utc::now();
        if work_package.created <= now && now < work_package.expires {
            Ok(())
        } else {
            Err(access_error("Work package has expired"))
        }
    }

    /// Get the work package with the given ID.
    ///
    /// When an access token is supplied, its hash must match the stored
    /// token hash. With `check_valid`, the package must be inside its
    /// validity window and the upstream access grant is re-checked, so a
    /// revoked grant is caught at redemption time.
    pub async fn get(
        &self,
        work_package_id: Uuid,
        check_valid: bool,
        work_package_access_token: Option<&str>,
    ) -> Result<WorkPackage, RepositoryError> {
        let work_package = self
            .work_packages
            .get_by_id(&work_package_id.to_string())
            .await
            .map_err(|_| access_error("Work package not found"))?;

        if let Some(token) = work_package_access_token {
            if hash_secret(token) != work_package.token_hash {
                return Err(access_error("Invalid work package access token"));
            }
        }

        if check_valid {
            Self::check_not_expired(&work_package)?;
            let expires = match work_package.r#type {
                WorkPackageType::Download => {
                    let dataset_id = work_package.dataset_id.as_deref().ok_or_else(|| {
                        access_error("Invalid download work package: missing dataset_id")
                    })?;
                    self.access
                        .check_download_access(work_package.user_id, dataset_id)
                        .await
                }
                WorkPackageType::Upload => {
                    let box_id = work_package.box_id.ok_or_else(|| {
                        access_error("Invalid upload work package: missing box_id")
                    })?;
                    self.access
                        .check_upload_access(work_package.user_id, box_id)
                        .await
                }
            }
            .map_err(|error| {
                error!(%error, work_package_id = %work_package.id, "access check failed");
                access_error(format!("Failed to check {} access", work_package.r#type))
            })?;
            if expires.is_none() {
                return Err(access_error(format!(
                    "{} access has been revoked",
                    work_package.r#type.capitalized()
                )));
            }
        }
        Ok(work_package)
    }

    /// Mint an encrypted work order token for downloading a single file.
    pub async fn get_download_wot(
        &self,
        work_package_id: Uuid,
        accession: &str,
        work_package_access_token: &str,
    ) -> Result<String, RepositoryError> {
        let work_package = self
            .get(work_package_id, true, Some(work_package_access_token))
            .await?;

        if work_package.r#type != WorkPackageType::Download {
            return Err(access_error(
                "Work package type must be DOWNLOAD to obtain a download access WOT",
            ));
        }
        if !work_package.files.contains_key(accession) {
            return Err(access_error("File is not contained in work package"));
        }

        // the file upload ID is only known once the accession map has been
        // propagated; until then the accession itself identifies the file
        let file_id = match self.accession_maps.get_by_id(accession).await {
            Ok(map) => map.file_id.to_string(),
            Err(StoreError::NotFound) => {
                debug!(accession, "no accession map entry, passing the accession through");
                accession.to_string()
            }
            Err(error) => return Err(error.into()),
        };

        let token = WorkOrderToken::Download {
            file_id,
            accession: accession.to_string(),
            user_public_crypt4gh_key: work_package.user_public_crypt4gh_key.clone(),
        };
        self.sign_and_seal(&token, &work_package.user_public_crypt4gh_key)
    }

    /// Mint an encrypted work order token for an upload box operation.
    ///
    /// The box ID in the minted token is the file upload box ID, which is
    /// the ID the downstream upload services expect, not the ID of the
    /// research data upload box itself.
    pub async fn get_upload_wot(
        &self,
        work_package_id: Uuid,
        work_type: UploadWorkType,
        box_id: Uuid,
        alias: Option<String>,
        file_id: Option<Uuid>,
        work_package_access_token: &str,
    ) -> Result<String, RepositoryError> {
        let work_package = self
            .get(work_package_id, true, Some(work_package_access_token))
            .await?;

        if work_package.r#type != WorkPackageType::Upload {
            return Err(access_error(
                "Work package type must be UPLOAD to obtain an upload WOT",
            ));
        }
        if work_package.box_id != Some(box_id) {
            return Err(access_error("Upload box is not covered by this work package"));
        }

        let upload_box = self
            .get_upload_box(box_id)
            .await
            .map_err(|_| access_error("Cannot determine the file upload box"))?;
        let box_id = upload_box.file_upload_box_id;
        let user_public_crypt4gh_key = work_package.user_public_crypt4gh_key.clone();

        let token = match work_type {
            UploadWorkType::Create => {
                let alias = alias
                    .filter(|alias| !alias.is_empty())
                    .ok_or_else(|| access_error("Alias must be provided for file creation WOTs"))?;
                WorkOrderToken::Create {
                    alias,
                    box_id,
                    user_public_crypt4gh_key,
                }
            }
            UploadWorkType::Upload | UploadWorkType::Close | UploadWorkType::Delete => {
                let file_id = file_id
                    .ok_or_else(|| access_error("File ID must be provided for file upload WOTs"))?;
                match work_type {
                    UploadWorkType::Upload => WorkOrderToken::Upload {
                        file_id,
                        box_id,
                        user_public_crypt4gh_key,
                    },
                    UploadWorkType::Close => WorkOrderToken::Close {
                        file_id,
                        box_id,
                        user_public_crypt4gh_key,
                    },
                    _ => WorkOrderToken::Delete {
                        file_id,
                        box_id,
                        user_public_crypt4gh_key,
                    },
                }
            }
            UploadWorkType::View => WorkOrderToken::View {
                box_id,
                user_public_crypt4gh_key,
            },
        };
        self.sign_and_seal(&token, &work_package.user_public_crypt4gh_key)
    }

    fn sign_and_seal(
        &self,
        token: &WorkOrderToken,
        user_public_crypt4gh_key: &str,
    ) -> Result<String, RepositoryError> {
        let signed = sign_work_order_token(token, &self.signing_key)?;
        Ok(seal(&signed, user_public_crypt4gh_key)?)
    }

    /// Register a dataset with all of its files.
    pub async fn register_dataset(&self, dataset: &Dataset) -> Result<(), RepositoryError> {
        self.datasets.upsert(dataset).await?;
        info!(dataset_id = %dataset.id, "upserted dataset");
        Ok(())
    }

    /// Delete the dataset with the given accession. Treats a missing dataset
    /// as already deleted.
    pub async fn delete_dataset(&self, dataset_id: &str) -> Result<(), RepositoryError> {
        match self.datasets.delete(dataset_id).await {
            Ok(()) => {
                info!(dataset_id, "deleted dataset");
                Ok(())
            }
            Err(StoreError::NotFound) => {
                info!(dataset_id, "dataset not found, presumed already deleted");
                Ok(())
            }
            Err(error) => Err(error.into()),
        }
    }

    /// Get a registered dataset by its accession.
    pub async fn get_dataset(&self, dataset_id: &str) -> Result<Dataset, RepositoryError> {
        self.datasets
            .get_by_id(dataset_id)
            .await
            .map_err(|_| RepositoryError::DatasetNotFound)
    }

    /// Register an upload box, keeping only the locally needed subset.
    pub async fn register_upload_box(
        &self,
        upload_box: &ResearchDataUploadBox,
    ) -> Result<(), RepositoryError> {
        self.upload_boxes.upsert(&upload_box.basics()).await?;
        info!(box_id = %upload_box.id, "upserted upload box");
        Ok(())
    }

    /// Delete the upload box with the given ID. Treats a missing box as
    /// already deleted.
    pub async fn delete_upload_box(&self, box_id: Uuid) -> Result<(), RepositoryError> {
        match self.upload_boxes.delete(&box_id.to_string()).await {
            Ok(()) => {
                info!(%box_id, "deleted upload box");
                Ok(())
            }
            Err(StoreError::NotFound) => {
                info!(%box_id, "upload box not found, presumed already deleted");
                Ok(())
            }
            Err(error) => Err(error.into()),
        }
    }

    /// Get a registered upload box by its ID.
    pub async fn get_upload_box(&self, box_id: Uuid) -> Result<UploadBoxBasics, RepositoryError> {
        self.upload_boxes
            .get_by_id(&box_id.to_string())
            .await
            .map_err(|_| RepositoryError::UploadBoxNotFound)
    }

    /// Register a mapping from a file accession to the file upload ID.
    pub async fn register_accession_map(
        &self,
        accession_map: &FileAccessionMap,
    ) -> Result<(), RepositoryError> {
        self.accession_maps.upsert(accession_map).await?;
        info!(accession = %accession_map.accession, "upserted accession map");
        Ok(())
    }

    /// Delete the accession map entry for the given accession. Treats a
    /// missing entry as already deleted.
    pub async fn delete_accession_map(&self, accession: &str) -> Result<(), RepositoryError> {
        match self.accession_maps.delete(accession).await {
            Ok(()) => {
                info!(accession, "deleted accession map");
                Ok(())
            }
            Err(StoreError::NotFound) => {
                info!(accession, "accession map not found, presumed already deleted");
                Ok(())
            }
            Err(error) => Err(error.into()),
        }
    }

    /// All datasets accessible to the given user, with access expiration
    /// dates. Datasets the projection does not know yet are skipped.
    pub async fn get_datasets(
        &self,
        user_id: Uuid,
    ) -> Result<Vec<DatasetWithExpiration>, RepositoryError> {
        let expirations = self.access.list_download_datasets(user_id).await?;
        let mut datasets = Vec::with_capacity(expirations.len());
        for (dataset_id, expires) in expirations {
            match self.get_dataset(&dataset_id).await {
                Ok(dataset) => datasets.push(DatasetWithExpiration { dataset, expires }),
                Err(RepositoryError::DatasetNotFound) => {
                    debug!(%dataset_id, "dataset not registered yet, skipping");
                }
                Err(error) => return Err(error),
            }
        }
        Ok(datasets)
    }

    /// All upload boxes accessible to the given user, with access expiration
    /// dates. Boxes with expired access or without a local projection are
    /// skipped.
    pub async fn get_upload_boxes(
        &self,
        user_id: Uuid,
    ) -> Result<Vec<BoxWithExpiration>, RepositoryError> {
        let expirations = self.access.list_upload_boxes(user_id).await?;
        let now = Utc::now();
        let mut boxes = Vec::with_capacity(expirations.len());
        for (box_id, expires) in expirations {
            if expires <= now {
                continue;
            }
            match self.get_upload_box(box_id).await {
                Ok(box_basics) => boxes.push(BoxWithExpiration { box_basics, expires }),
                Err(RepositoryError::UploadBoxNotFound) => {
                    debug!(%box_id, "upload box not registered yet, skipping");
                }
                Err(error) => return Err(error),
            }
        }
        Ok(boxes)
    }
}
