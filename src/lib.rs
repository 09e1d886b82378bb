//! The work package service mediates access to datasets and upload boxes in
//! a genomic data platform.
//!
//! Authenticated users create a long-lived *work package* authorizing a
//! download or upload campaign. Against that work package, identified by an
//! opaque access token, they redeem short-lived signed *work order tokens*
//! that the storage and transfer services accept as proof of intent for one
//! specific operation on one specific file.
//!
//! The [`repository::WorkPackageRepository`] is the core engine. It is fed
//! from two sides: the REST API in [`http`] serves users, and the consumer
//! in [`events`] keeps the local projections of datasets, upload boxes and
//! accession maps in sync with the rest of the platform. Authorization
//! decisions are delegated to the external access API through
//! [`access::AccessCheckClient`]; work order tokens are signed and sealed
//! with the primitives in [`crypto`].
//!
//! # Example
//! Wiring up the repository with an in-memory store:
//! ```no_run
//! # use std::sync::Arc;
//! # use wps::{AccessCheckClient, Config, WorkPackageRepository};
//! # use wps::store::MemoryStore;
//! # fn main() -> anyhow::Result<()> {
//! let config = Config::load()?;
//! let access = AccessCheckClient::new(&config.access_url)?;
//! let store = Arc::new(MemoryStore::new());
//! let repository = WorkPackageRepository::new(&config, access, store)?;
//! # Ok(())
//! # }
//! ```
#![forbid(unsafe_code)]

pub mod access;
pub mod config;
pub mod crypto;
pub mod events;
pub mod http;
pub mod models;
pub mod repository;
pub mod store;

pub use crate::{
    access::AccessCheckClient,
    config::Config,
    http::{router, AppState},
    repository::{AuthContext, WorkPackageRepository},
};
