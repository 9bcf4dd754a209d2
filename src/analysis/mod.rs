//! Stage 3 (Upload) and Stage 4 (Analyze) collaborators (`spec.md` §4.2,
//! §4.7). Both the object store and the recognition endpoint are out of
//! scope implementations (`SPEC_FULL.md` §1); this module defines the trait
//! boundary plus a thin HTTP adapter and a scripted fake for tests.

use crate::config::ProtocolVersion;
use crate::model::RecognitionResult;
use rand::Rng;
use std::time::Duration;

const ANALYSIS_TIMEOUT: Duration = Duration::from_secs(60);

/// Request sent to the recognition endpoint, per `spec.md` §4.7.
#[derive(Debug, Clone, serde::Serialize)]
pub struct AnalysisRequest {
    pub storage_key: String,
    pub original_filename: String,
    pub mime_type: String,
    pub size_bytes: u64,
    pub model_name: String,
    pub category: String,
    pub user_id: Option<String>,
    pub execution_id: Option<String>,
    pub participant_preset: Option<String>,
}

#[derive(Debug, Clone, Default, serde::Deserialize)]
pub struct AnalysisResponse {
    pub success: bool,
    pub image_id: Option<String>,
    pub analysis: Vec<RecognitionResult>,
}

#[derive(Debug, thiserror::Error)]
pub enum AnalysisError {
    #[error("analysis request to {endpoint} ({version}) timed out")]
    Timeout { endpoint: String, version: String },
    #[error("analysis request to {endpoint} ({version}) failed: {message}")]
    Request {
        endpoint: String,
        version: String,
        message: String,
    },
    #[error("analysis endpoint {endpoint} ({version}) returned success=false")]
    Unsuccessful { endpoint: String, version: String },
}

/// Out-of-scope recognition service, behind a trait so the worker and
/// matcher can be exercised without a live endpoint.
pub trait RecognitionClient: Send + Sync {
    fn analyze(&self, request: &AnalysisRequest, protocol: ProtocolVersion) -> Result<AnalysisResponse, AnalysisError>;
}

fn endpoint_for(protocol: ProtocolVersion) -> &'static str {
    match protocol {
        ProtocolVersion::V2 => "/v2/analyze",
        ProtocolVersion::V3 => "/v3/analyze",
        ProtocolVersion::V4 => "/v4/analyze",
    }
}

fn version_label(protocol: ProtocolVersion) -> &'static str {
    match protocol {
        ProtocolVersion::V2 => "v2",
        ProtocolVersion::V3 => "v3",
        ProtocolVersion::V4 => "v4",
    }
}

/// `reqwest`-backed adapter, matching the sibling Tauri example's blocking
/// client configuration (`spec.md` §4.7 supplement).
pub struct HttpRecognitionClient {
    client: reqwest::blocking::Client,
    base_url: String,
}

impl HttpRecognitionClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        let client = reqwest::blocking::Client::builder()
            .timeout(ANALYSIS_TIMEOUT)
            .build()
            .expect("reqwest client builds with static config");
        Self {
            client,
            base_url: base_url.into(),
        }
    }
}

impl RecognitionClient for HttpRecognitionClient {
    fn analyze(&self, request: &AnalysisRequest, protocol: ProtocolVersion) -> Result<AnalysisResponse, AnalysisError> {
        let endpoint = endpoint_for(protocol);
        let version = version_label(protocol).to_string();
        let url = format!("{}{}", self.base_url, endpoint);

        let response = self.client.post(&url).json(request).send().map_err(|e| {
            if e.is_timeout() {
                AnalysisError::Timeout {
                    endpoint: endpoint.to_string(),
                    version: version.clone(),
                }
            } else {
                AnalysisError::Request {
                    endpoint: endpoint.to_string(),
                    version: version.clone(),
                    message: e.to_string(),
                }
            }
        })?;

        let parsed: AnalysisResponse = response.json().map_err(|e| AnalysisError::Request {
            endpoint: endpoint.to_string(),
            version: version.clone(),
            message: e.to_string(),
        })?;

        if !parsed.success {
            return Err(AnalysisError::Unsuccessful {
                endpoint: endpoint.to_string(),
                version,
            });
        }
        Ok(parsed)
    }
}

/// Scripted in-memory responder for tests (`SPEC_FULL.md` §4.7 supplement).
pub struct FakeRecognitionClient {
    response: Result<AnalysisResponse, ()>,
}

impl FakeRecognitionClient {
    pub fn succeeding(analysis: Vec<RecognitionResult>) -> Self {
        Self {
            response: Ok(AnalysisResponse {
                success: true,
                image_id: Some("fake-image-id".into()),
                analysis,
            }),
        }
    }

    pub fn failing() -> Self {
        Self { response: Err(()) }
    }
}

impl RecognitionClient for FakeRecognitionClient {
    fn analyze(&self, _request: &AnalysisRequest, protocol: ProtocolVersion) -> Result<AnalysisResponse, AnalysisError> {
        self.response.clone().map_err(|_| AnalysisError::Request {
            endpoint: endpoint_for(protocol).to_string(),
            version: version_label(protocol).to_string(),
            message: "fake client configured to fail".into(),
        })
    }
}

#[derive(Debug, thiserror::Error)]
pub enum UploadError {
    #[error("upload failed: {0}")]
    Request(String),
}

/// Out-of-scope object store; stage 3 of the worker posts compressed bytes
/// through this trait (`spec.md` §4.2).
pub trait ObjectStoreClient: Send + Sync {
    fn upload(&self, storage_key: &str, mime_type: &str, bytes: &[u8]) -> Result<String, UploadError>;
}

pub struct HttpObjectStoreClient {
    client: reqwest::blocking::Client,
    base_url: String,
}

impl HttpObjectStoreClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        let client = reqwest::blocking::Client::builder()
            .timeout(ANALYSIS_TIMEOUT)
            .build()
            .expect("reqwest client builds with static config");
        Self {
            client,
            base_url: base_url.into(),
        }
    }
}

impl ObjectStoreClient for HttpObjectStoreClient {
    fn upload(&self, storage_key: &str, mime_type: &str, bytes: &[u8]) -> Result<String, UploadError> {
        let url = format!("{}/{}", self.base_url, storage_key);
        self.client
            .put(&url)
            .header("Content-Type", mime_type)
            .body(bytes.to_vec())
            .send()
            .map_err(|e| UploadError::Request(e.to_string()))?;
        Ok(url)
    }
}

pub struct FakeObjectStoreClient {
    pub fail: bool,
}

impl ObjectStoreClient for FakeObjectStoreClient {
    fn upload(&self, storage_key: &str, _mime_type: &str, _bytes: &[u8]) -> Result<String, UploadError> {
        if self.fail {
            return Err(UploadError::Request("fake store configured to fail".into()));
        }
        Ok(format!("https://fake-store.test/{storage_key}"))
    }
}

/// `${epochMs}_${random36(13)}.${ext}`, per `spec.md` §4.2/§6. `ext` is
/// derived from MIME, not the source extension.
pub fn generate_storage_key(epoch_ms: u64, mime_type: &str) -> String {
    let ext = match mime_type {
        "image/png" => "png",
        "image/webp" => "webp",
        _ => "jpg",
    };
    format!("{epoch_ms}_{}.{ext}", random_base36(13))
}

fn random_base36(len: usize) -> String {
    const ALPHABET: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyz";
    let mut rng = rand::thread_rng();
    (0..len).map(|_| ALPHABET[rng.gen_range(0..ALPHABET.len())] as char).collect()
}

/// Out-of-scope token-accounting collaborator (`spec.md` §4.2 stage 4,
/// `SPEC_FULL.md` §5): consulted after a successful analysis; its failures
/// never abort processing.
pub trait BillingClient: Send + Sync {
    fn consume_token(&self, execution_id: Option<&str>) -> Result<(), String>;
}

pub struct NullBillingClient;

impl BillingClient for NullBillingClient {
    fn consume_token(&self, _execution_id: Option<&str>) -> Result<(), String> {
        Ok(())
    }
}
