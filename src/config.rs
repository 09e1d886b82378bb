//! Configuration parameter modeling and parsing.

use anyhow::Context as _;
use config::{Environment, File};
use serde::{Deserialize, Serialize};

/// The name of this service, also used for the retry topic.
pub const SERVICE_NAME: &str = "wps";

/// All configuration parameters of the service.
///
/// Values are taken from the defaults, overridden by an optional TOML file
/// (`wps.toml`, or the path in `WPS_CONFIG`), overridden by `WPS_*`
/// environment variables.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// The service name, used as the suffix of the retry topic.
    pub service_name: String,
    /// Host the REST API binds to.
    pub host: String,
    /// Port the REST API binds to.
    pub port: u16,
    /// Base URL of the internal access API for download and upload grants.
    pub access_url: String,
    /// The public JWK (JSON) for verifying inbound user bearer tokens.
    pub auth_key: String,
    /// The private JWK (JSON) for signing work order tokens. Startup fails
    /// if this key carries no private material.
    pub work_package_signing_key: String,
    /// How many days a work package and its access token stay valid.
    pub work_package_valid_days: i64,
    /// Name of the collection holding dataset projections.
    pub datasets_collection: String,
    /// Name of the collection holding upload box projections.
    pub upload_boxes_collection: String,
    /// Name of the collection holding accession map projections.
    pub accession_maps_collection: String,
    /// Name of the collection holding work packages.
    pub work_packages_collection: String,
    /// The Kafka bootstrap servers.
    pub kafka_servers: Vec<String>,
    /// Whether unprocessable events are published to the dead letter queue.
    /// When disabled, a failing event stops the consumer instead.
    pub kafka_enable_dlq: bool,
    /// Name of the dead letter queue topic.
    pub kafka_dlq_topic: String,
    /// The consumer group this service joins.
    pub consumer_group: String,
    /// Name of the topic announcing dataset changes.
    pub dataset_change_topic: String,
    /// Event type announcing new or changed datasets.
    pub dataset_upsertion_type: String,
    /// Event type announcing deleted datasets.
    pub dataset_deletion_type: String,
    /// Name of the outbox topic carrying upload box state.
    pub upload_box_topic: String,
    /// Name of the outbox topic carrying accession map state.
    pub accession_map_topic: String,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            service_name: SERVICE_NAME.to_string(),
            host: "127.0.0.1".to_string(),
            port: 8080,
            access_url: "http://127.0.0.1/".to_string(),
            auth_key: String::new(),
            work_package_signing_key: String::new(),
            work_package_valid_days: 30,
            datasets_collection: "datasets".to_string(),
            upload_boxes_collection: "uploadBoxes".to_string(),
            accession_maps_collection: "accessionMaps".to_string(),
            work_packages_collection: "workPackages".to_string(),
            kafka_servers: vec!["localhost:9092".to_string()],
            kafka_enable_dlq: true,
            kafka_dlq_topic: "dlq".to_string(),
            consumer_group: SERVICE_NAME.to_string(),
            dataset_change_topic: "metadata_datasets".to_string(),
            dataset_upsertion_type: "dataset_created".to_string(),
            dataset_deletion_type: "dataset_deleted".to_string(),
            upload_box_topic: "research-data-upload-boxes".to_string(),
            accession_map_topic: "file-accession-maps".to_string(),
        }
    }
}

impl Config {
    /// Load the configuration from defaults, file and environment.
    pub fn load() -> anyhow::Result<Self> {
        let config_file =
            std::env::var("WPS_CONFIG").unwrap_or_else(|_| "wps.toml".to_string());
        config::Config::builder()
            .add_source(config::Config::try_from(&Config::default())?)
            .add_source(File::with_name(&config_file).required(false))
            .add_source(Environment::with_prefix("wps").try_parsing(true))
            .build()
            .context("failed to build config")?
            .try_deserialize()
            .context("failed to deserialize config")
    }

    /// The name of the retry topic that re-feeds dead-lettered events.
    pub fn retry_topic(&self) -> String {
        format!("retry-{}", self.service_name)
    }

    /// The socket address of the REST API.
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}
