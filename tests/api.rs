//! End-to-end tests of the REST API, driving the full stack with an
//! in-memory store and a stubbed access API.

use std::sync::Arc;

use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use base64::{engine::general_purpose::STANDARD, engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use chrono::{DateTime, Duration, Utc};
use http_body_util::BodyExt;
use p256::elliptic_curve::sec1::ToEncodedPoint;
use serde_json::{json, Value};
use tokio::sync::Mutex;
use tower::ServiceExt;
use uuid::Uuid;

use wps::config::Config;
use wps::crypto::VerifyingKey;
use wps::models::{Dataset, DatasetFile, FileAccessionMap, UploadBoxBasics, WorkPackageType};
use wps::store::{Dao, MemoryStore};
use wps::{AccessCheckClient, AppState, WorkPackageRepository};

const USER_ID: &str = "a86f8281-e18a-429e-88a9-a5c8ea0cf754";
const DATASET_ID: &str = "some-dataset-id";
const BOX_ID: &str = "91ba4d24-bf10-4cf2-9708-b54d0e3d0f29";

/// A generated EC P-256 key pair as private and public JWK.
struct KeyPair {
    private_jwk: String,
    public_jwk: String,
    encoding: jsonwebtoken::EncodingKey,
}

fn generate_key_pair() -> KeyPair {
    let secret = p256::SecretKey::random(&mut rand::rngs::OsRng);
    let point = secret.public_key().to_encoded_point(false);
    let x = URL_SAFE_NO_PAD.encode(point.x().unwrap());
    let y = URL_SAFE_NO_PAD.encode(point.y().unwrap());
    let d = URL_SAFE_NO_PAD.encode(secret.to_bytes());
    let private_jwk = json!({"kty": "EC", "crv": "P-256", "x": x, "y": y, "d": d}).to_string();
    let public_jwk = json!({"kty": "EC", "crv": "P-256", "x": x, "y": y}).to_string();
    use p256::pkcs8::EncodePrivateKey;
    let der = secret.to_pkcs8_der().unwrap();
    KeyPair {
        private_jwk,
        public_jwk,
        encoding: jsonwebtoken::EncodingKey::from_ec_der(der.as_bytes()),
    }
}

/// Grant state of the stubbed access API. `None` answers `null`, which
/// means "no access".
#[derive(Clone, Default)]
struct AccessState {
    download_expiry: Arc<Mutex<Option<DateTime<Utc>>>>,
    upload_expiry: Arc<Mutex<Option<DateTime<Utc>>>>,
}

impl AccessState {
    async fn grant_download(&self, expiry: DateTime<Utc>) {
        *self.download_expiry.lock().await = Some(expiry);
    }

    async fn revoke_download(&self) {
        *self.download_expiry.lock().await = None;
    }

    async fn grant_upload(&self, expiry: DateTime<Utc>) {
        *self.upload_expiry.lock().await = Some(expiry);
    }
}

fn expiry_response(expiry: Option<DateTime<Utc>>) -> axum::response::Response {
    match expiry {
        Some(expiry) => Json(json!(expiry.to_rfc3339())).into_response(),
        None => Json(Value::Null).into_response(),
    }
}

async fn spawn_access_api(state: AccessState) -> String {
    let download = state.clone();
    let download_list = state.clone();
    let upload = state.clone();
    let upload_list = state;
    let app = Router::new()
        .route(
            "/download-access/users/{user_id}/datasets/{dataset_id}",
            get(move || async move { expiry_response(*download.download_expiry.lock().await) }),
        )
        .route(
            "/download-access/users/{user_id}/datasets",
            get(move || async move {
                match *download_list.download_expiry.lock().await {
                    Some(expiry) => {
                        Json(json!({DATASET_ID: expiry.to_rfc3339()})).into_response()
                    }
                    None => StatusCode::NOT_FOUND.into_response(),
                }
            }),
        )
        .route(
            "/upload-access/users/{user_id}/boxes/{box_id}",
            get(move || async move { expiry_response(*upload.upload_expiry.lock().await) }),
        )
        .route(
            "/upload-access/users/{user_id}/boxes",
            get(move || async move {
                match *upload_list.upload_expiry.lock().await {
                    Some(expiry) => Json(json!({BOX_ID: expiry.to_rfc3339()})).into_response(),
                    None => StatusCode::NOT_FOUND.into_response(),
                }
            }),
        );
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let address = listener.local_addr().unwrap();
    tokio::spawn(async move { axum::serve(listener, app).await.unwrap() });
    format!("http://{address}/")
}

/// Everything a test scenario needs: the app under test, the stubbed access
/// grants, the store handle and the involved keys.
struct TestBed {
    app: Router,
    access: AccessState,
    store: Arc<MemoryStore>,
    auth_keys: KeyPair,
    wot_verifier: VerifyingKey,
    user_key: crypto_box::SecretKey,
}

impl TestBed {
    async fn new() -> Self {
        let auth_keys = generate_key_pair();
        let signing_keys = generate_key_pair();
        let access = AccessState::default();
        let access_url = spawn_access_api(access.clone()).await;
        let config = Config {
            access_url,
            auth_key: auth_keys.public_jwk.clone(),
            work_package_signing_key: signing_keys.private_jwk.clone(),
            ..Config::default()
        };
        let store = Arc::new(MemoryStore::new());
        let client = AccessCheckClient::new(&config.access_url).unwrap();
        let repository =
            Arc::new(WorkPackageRepository::new(&config, client, store.clone()).unwrap());
        let auth_key = VerifyingKey::from_jwk(&config.auth_key).unwrap();
        let app = wps::router(AppState::new(repository, auth_key));
        TestBed {
            app,
            access,
            store,
            auth_keys,
            wot_verifier: VerifyingKey::from_jwk(&signing_keys.public_jwk).unwrap(),
            user_key: crypto_box::SecretKey::generate(&mut rand::rngs::OsRng),
        }
    }

    fn user_public_key(&self) -> String {
        STANDARD.encode(self.user_key.public_key().as_bytes())
    }

    fn user_bearer(&self) -> String {
        let now = Utc::now().timestamp();
        let claims = json!({
            "id": USER_ID,
            "name": "John Doe",
            "email": "john@home.org",
            "title": "Dr.",
            "iat": now,
            "exp": now + 3600,
        });
        let header = jsonwebtoken::Header::new(jsonwebtoken::Algorithm::ES256);
        jsonwebtoken::encode(&header, &claims, &self.auth_keys.encoding).unwrap()
    }

    /// Open a sealed box from a response and return the contained string.
    fn unseal(&self, sealed: &str) -> String {
        let decoded = STANDARD.decode(sealed).unwrap();
        let opened = self.user_key.unseal(&decoded).unwrap();
        String::from_utf8(opened).unwrap()
    }

    async fn register_dataset(&self) {
        let dao: Dao<Dataset> = Dao::new(self.store.clone(), "datasets", "id");
        dao.upsert(&Dataset {
            id: DATASET_ID.to_string(),
            stage: WorkPackageType::Download,
            title: "Test dataset 1".to_string(),
            description: Some("The first test dataset".to_string()),
            files: vec![
                DatasetFile { id: "GHGA001".to_string(), extension: ".json".to_string() },
                DatasetFile { id: "GHGA002".to_string(), extension: ".csv".to_string() },
                DatasetFile { id: "GHGA003".to_string(), extension: ".bam".to_string() },
            ],
        })
        .await
        .unwrap();
    }

    async fn register_upload_box(&self, file_upload_box_id: Uuid) {
        let dao: Dao<UploadBoxBasics> = Dao::new(self.store.clone(), "uploadBoxes", "id");
        dao.upsert(&UploadBoxBasics {
            id: BOX_ID.parse().unwrap(),
            file_upload_box_id,
            title: "Test Upload Box".to_string(),
            description: None,
        })
        .await
        .unwrap();
    }

    async fn register_accession_map(&self, accession: &str, file_id: Uuid) {
        let dao: Dao<FileAccessionMap> =
            Dao::new(self.store.clone(), "accessionMaps", "accession");
        dao.upsert(&FileAccessionMap { accession: accession.to_string(), file_id })
            .await
            .unwrap();
    }

    async fn request(
        &self,
        method: &str,
        uri: &str,
        bearer: &str,
        body: Option<Value>,
    ) -> (StatusCode, axum::http::HeaderMap, Value) {
        let mut builder = Request::builder()
            .method(method)
            .uri(uri)
            .header(header::AUTHORIZATION, format!("Bearer {bearer}"));
        let body = match body {
            Some(value) => {
                builder = builder.header(header::CONTENT_TYPE, "application/json");
                Body::from(value.to_string())
            }
            None => Body::empty(),
        };
        let response = self
            .app
            .clone()
            .oneshot(builder.body(body).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let headers = response.headers().clone();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let body = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap_or(Value::Null)
        };
        (status, headers, body)
    }

    /// Create a download work package for the registered dataset and return
    /// its ID and decrypted access token.
    async fn create_download_package(&self, file_ids: Option<Vec<&str>>) -> (String, String) {
        let mut payload = json!({
            "type": "download",
            "dataset_id": DATASET_ID,
            "user_public_crypt4gh_key": self.user_public_key(),
        });
        if let Some(file_ids) = file_ids {
            payload["file_ids"] = json!(file_ids);
        }
        let (status, _, body) = self
            .request("POST", "/work-packages", &self.user_bearer(), Some(payload))
            .await;
        assert_eq!(status, StatusCode::CREATED, "{body}");
        (
            body["id"].as_str().unwrap().to_string(),
            self.unseal(body["token"].as_str().unwrap()),
        )
    }

    /// Create an upload work package for the registered box and return its
    /// ID and decrypted access token.
    async fn create_upload_package(&self) -> (String, String) {
        let payload = json!({
            "type": "upload",
            "box_id": BOX_ID,
            "user_public_crypt4gh_key": self.user_public_key(),
        });
        let (status, _, body) = self
            .request("POST", "/work-packages", &self.user_bearer(), Some(payload))
            .await;
        assert_eq!(status, StatusCode::CREATED, "{body}");
        (
            body["id"].as_str().unwrap().to_string(),
            self.unseal(body["token"].as_str().unwrap()),
        )
    }

    /// Decrypt and verify a sealed work order token response body.
    fn verified_claims(&self, body: &Value) -> Value {
        let signed = self.unseal(body.as_str().unwrap());
        self.wot_verifier.decode(&signed).unwrap()
    }
}

fn in_days(days: i64) -> DateTime<Utc> {
    Utc::now() + Duration::days(days)
}

#[tokio::test]
async fn health_check_works_without_credentials() {
    let bed = TestBed::new().await;
    let response = bed
        .app
        .clone()
        .oneshot(Request::get("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    assert_eq!(
        serde_json::from_slice::<Value>(&bytes).unwrap(),
        json!({"status": "OK"})
    );
}

#[tokio::test]
async fn download_work_package_lifecycle() {
    let bed = TestBed::new().await;
    bed.register_dataset().await;
    bed.access.grant_download(in_days(365)).await;

    // unknown file accessions are silently dropped from the selection
    let (package_id, token) = bed
        .create_download_package(Some(vec!["GHGA001", "GHGA003", "GHGA005"]))
        .await;

    // the access token is a 24 character alphanumeric secret
    assert_eq!(token.len(), 24);
    assert!(token.chars().all(|c| c.is_ascii_alphanumeric()));

    let (status, _, details) = bed
        .request("GET", &format!("/work-packages/{package_id}"), &token, None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(details["type"], "download");
    assert_eq!(
        details["files"],
        json!({"GHGA001": ".json", "GHGA003": ".bam"})
    );

    // a file outside the package must not be redeemable
    let (status, _, body) = bed
        .request(
            "POST",
            &format!("/work-packages/{package_id}/files/GHGA002/work-order-tokens"),
            &token,
            None,
        )
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["detail"], "File is not contained in work package");

    let (status, headers, body) = bed
        .request(
            "POST",
            &format!("/work-packages/{package_id}/files/GHGA001/work-order-tokens"),
            &token,
            None,
        )
        .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(headers[header::CACHE_CONTROL], "max-age=30, private");

    let claims = bed.verified_claims(&body);
    assert_eq!(claims["work_type"], "download");
    assert_eq!(claims["file_id"], "GHGA001");
    assert_eq!(claims["accession"], "GHGA001");
    assert_eq!(claims["user_public_crypt4gh_key"], bed.user_public_key());
    let validity = claims["exp"].as_i64().unwrap() - claims["iat"].as_i64().unwrap();
    assert_eq!(validity, 30);
}

#[tokio::test]
async fn download_tokens_resolve_file_ids_through_the_accession_map() {
    let bed = TestBed::new().await;
    bed.register_dataset().await;
    bed.access.grant_download(in_days(365)).await;
    let file_id: Uuid = "ed42650f-a683-4300-ad41-6d13e33b45eb".parse().unwrap();
    bed.register_accession_map("GHGA001", file_id).await;

    let (package_id, token) = bed.create_download_package(None).await;
    let (status, _, body) = bed
        .request(
            "POST",
            &format!("/work-packages/{package_id}/files/GHGA001/work-order-tokens"),
            &token,
            None,
        )
        .await;
    assert_eq!(status, StatusCode::CREATED);
    let claims = bed.verified_claims(&body);
    assert_eq!(claims["file_id"], file_id.to_string());
    assert_eq!(claims["accession"], "GHGA001");
}

#[tokio::test]
async fn package_expiry_is_bounded_by_the_access_grant_and_the_service_ceiling() {
    let bed = TestBed::new().await;
    bed.register_dataset().await;

    // a grant closer than the 30 day ceiling bounds the package
    let grant_expiry = in_days(7);
    bed.access.grant_download(grant_expiry).await;
    let payload = json!({
        "type": "download",
        "dataset_id": DATASET_ID,
        "user_public_crypt4gh_key": bed.user_public_key(),
    });
    let (_, _, body) = bed
        .request("POST", "/work-packages", &bed.user_bearer(), Some(payload.clone()))
        .await;
    let expires: DateTime<Utc> = body["expires"].as_str().unwrap().parse().unwrap();
    assert!(expires <= grant_expiry);

    // a distant grant is capped at the service ceiling
    bed.access.grant_download(in_days(365)).await;
    let (_, _, body) = bed
        .request("POST", "/work-packages", &bed.user_bearer(), Some(payload))
        .await;
    let expires: DateTime<Utc> = body["expires"].as_str().unwrap().parse().unwrap();
    assert!(expires <= Utc::now() + Duration::days(30));
}

#[tokio::test]
async fn missing_access_permission_forbids_creation() {
    let bed = TestBed::new().await;
    bed.register_dataset().await;
    // no grant at all
    let payload = json!({
        "type": "download",
        "dataset_id": DATASET_ID,
        "user_public_crypt4gh_key": bed.user_public_key(),
    });
    let (status, _, body) = bed
        .request("POST", "/work-packages", &bed.user_bearer(), Some(payload))
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["detail"], "Missing dataset access permission");
}

#[tokio::test]
async fn revocation_between_create_and_redeem_forbids_minting() {
    let bed = TestBed::new().await;
    bed.register_dataset().await;
    bed.access.grant_download(in_days(365)).await;
    let (package_id, token) = bed.create_download_package(None).await;

    bed.access.revoke_download().await;
    let (status, _, body) = bed
        .request(
            "POST",
            &format!("/work-packages/{package_id}/files/GHGA001/work-order-tokens"),
            &token,
            None,
        )
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["detail"], "Download access has been revoked");
}

#[tokio::test]
async fn upload_create_and_upload_tokens_carry_the_file_upload_box_id() {
    let bed = TestBed::new().await;
    let file_upload_box_id = Uuid::new_v4();
    bed.register_upload_box(file_upload_box_id).await;
    bed.access.grant_upload(in_days(365)).await;
    let (package_id, token) = bed.create_upload_package().await;

    let (status, _, details) = bed
        .request("GET", &format!("/work-packages/{package_id}"), &token, None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(details["type"], "upload");
    assert_eq!(details["files"], Value::Null);
    assert_eq!(details["box_id"], BOX_ID);

    let uri = format!("/work-packages/{package_id}/boxes/{BOX_ID}/work-order-tokens");
    let (status, headers, body) = bed
        .request(
            "POST",
            &uri,
            &token,
            Some(json!({"work_type": "create", "alias": "test-file"})),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED, "{body}");
    assert_eq!(headers[header::CACHE_CONTROL], "max-age=30, private");
    let claims = bed.verified_claims(&body);
    assert_eq!(claims["work_type"], "create");
    assert_eq!(claims["alias"], "test-file");
    assert_eq!(claims["box_id"], file_upload_box_id.to_string());

    let file_id = Uuid::new_v4();
    let (status, _, body) = bed
        .request(
            "POST",
            &uri,
            &token,
            Some(json!({"work_type": "upload", "file_id": file_id})),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED, "{body}");
    let claims = bed.verified_claims(&body);
    assert_eq!(claims["work_type"], "upload");
    assert_eq!(claims["file_id"], file_id.to_string());
    assert_eq!(claims["box_id"], file_upload_box_id.to_string());

    // a view token needs no parameters at all
    let (status, _, body) = bed
        .request("POST", &uri, &token, Some(json!({"work_type": "view"})))
        .await;
    assert_eq!(status, StatusCode::CREATED, "{body}");
    let claims = bed.verified_claims(&body);
    assert_eq!(claims["work_type"], "view");
    assert_eq!(claims["box_id"], file_upload_box_id.to_string());
}

#[tokio::test]
async fn creation_payloads_are_validated() {
    let bed = TestBed::new().await;
    let key = bed.user_public_key();

    let (status, _, body) = bed
        .request(
            "POST",
            "/work-packages",
            &bed.user_bearer(),
            Some(json!({"type": "upload", "dataset_id": "x", "user_public_crypt4gh_key": key})),
        )
        .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    let detail = body["detail"].as_str().unwrap();
    assert!(detail.contains("box_id is required for upload work packages"));

    let (status, _, body) = bed
        .request(
            "POST",
            "/work-packages",
            &bed.user_bearer(),
            Some(json!({"type": "download", "box_id": BOX_ID, "user_public_crypt4gh_key": key})),
        )
        .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(
        body["detail"],
        "dataset_id is required for download work packages; \
         box_id shouldn't be provided for download work packages"
    );

    let (status, _, body) = bed
        .request(
            "POST",
            "/work-packages",
            &bed.user_bearer(),
            Some(json!({
                "type": "download",
                "dataset_id": DATASET_ID,
                "user_public_crypt4gh_key": "too-short",
            })),
        )
        .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY, "{body}");
}

#[tokio::test]
async fn upload_token_requests_are_validated() {
    let bed = TestBed::new().await;
    bed.register_upload_box(Uuid::new_v4()).await;
    bed.access.grant_upload(in_days(365)).await;
    let (package_id, token) = bed.create_upload_package().await;

    let uri = format!("/work-packages/{package_id}/boxes/{BOX_ID}/work-order-tokens");
    let (status, _, body) = bed
        .request("POST", &uri, &token, Some(json!({"work_type": "create"})))
        .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["detail"], "alias is required for create work order tokens");

    let (status, _, _) = bed
        .request(
            "POST",
            &uri,
            &token,
            Some(json!({"work_type": "close", "alias": "nope"})),
        )
        .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
}

#[tokio::test]
async fn bearer_credentials_are_required_and_verified() {
    let bed = TestBed::new().await;

    // missing credential
    let uri = format!("/work-packages/{}", Uuid::new_v4());
    let response = bed
        .app
        .clone()
        .oneshot(Request::get(uri.as_str()).body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);

    // present but unverifiable user bearer
    let (status, _, _) = bed
        .request(
            "POST",
            "/work-packages",
            "not-a-jwt",
            Some(json!({
                "type": "download",
                "dataset_id": DATASET_ID,
                "user_public_crypt4gh_key": bed.user_public_key(),
            })),
        )
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn wrong_package_access_tokens_are_rejected() {
    let bed = TestBed::new().await;
    bed.register_dataset().await;
    bed.access.grant_download(in_days(365)).await;
    let (package_id, _token) = bed.create_download_package(None).await;

    let (status, _, body) = bed
        .request(
            "GET",
            &format!("/work-packages/{package_id}"),
            "123456789012345678901234",
            None,
        )
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["detail"], "Invalid work package access token");
}

#[tokio::test]
async fn listings_are_restricted_to_the_authenticated_user() {
    let bed = TestBed::new().await;
    bed.register_dataset().await;
    bed.access.grant_download(in_days(365)).await;

    let (status, _, body) = bed
        .request("GET", &format!("/users/{USER_ID}/datasets"), &bed.user_bearer(), None)
        .await;
    assert_eq!(status, StatusCode::OK);
    let datasets = body.as_array().unwrap();
    assert_eq!(datasets.len(), 1);
    assert_eq!(datasets[0]["id"], DATASET_ID);
    assert_eq!(datasets[0]["title"], "Test dataset 1");
    assert!(datasets[0]["expires"].is_string());

    // asking for somebody else's datasets is forbidden
    let other_user = Uuid::new_v4();
    let (status, _, body) = bed
        .request("GET", &format!("/users/{other_user}/datasets"), &bed.user_bearer(), None)
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["detail"], "Not authorized to get datasets");
}

#[tokio::test]
async fn box_listings_carry_expirations_and_skip_unknown_boxes() {
    let bed = TestBed::new().await;
    bed.access.grant_upload(in_days(365)).await;

    // the box is granted but not projected yet
    let (status, _, body) = bed
        .request("GET", &format!("/users/{USER_ID}/boxes"), &bed.user_bearer(), None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body.as_array().unwrap().len(), 0);

    bed.register_upload_box(Uuid::new_v4()).await;
    let (status, _, body) = bed
        .request("GET", &format!("/users/{USER_ID}/boxes"), &bed.user_bearer(), None)
        .await;
    assert_eq!(status, StatusCode::OK);
    let boxes = body.as_array().unwrap();
    assert_eq!(boxes.len(), 1);
    assert_eq!(boxes[0]["id"], BOX_ID);
    assert_eq!(boxes[0]["title"], "Test Upload Box");
}
