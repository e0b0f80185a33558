//! HTTP types and client for the app-config backend endpoint.
//!
//! The endpoint is a JSON-over-HTTPS POST: the request carries an
//! app/device/vendor/network metadata snapshot, the response is a nested
//! structure in which every field is optional. Status classification follows
//! the same taxonomy the rest of the codebase uses: transport failures and
//! transient backend errors are retryable, credential problems are not.

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, USER_AGENT};
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::environment::EnvironmentSnapshot;

/// Schema version advertised in app-config requests.
pub const APP_CONFIG_SCHEMA_VERSION: &str = "1.0";
/// SDK version reported to the backend and used in the user agent.
pub const SDK_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Error taxonomy for app-config fetches.
#[derive(Debug, Error)]
pub enum HttpError {
    /// Credentials were rejected by the backend.
    #[error("unauthorized - invalid application identifier or credentials")]
    Unauthorized,
    /// Request failed due to a malformed request or proxy issue (4xx).
    #[error("request rejected: status {0}")]
    Rejected(u16),
    /// Backend reported a temporary outage (5xx).
    #[error("transient backend error: status {0}")]
    Retryable(u16),
    /// Transport-level issue (DNS, TLS, socket, etc.).
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),
    /// Response payload could not be decoded as JSON.
    #[error("failed to decode app config payload: {0}")]
    Decode(#[from] serde_json::Error),
    /// A static header value could not be constructed.
    #[error("invalid header value: {0}")]
    InvalidHeader(String),
}

/// Body of the app-config request.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AppConfigRequestBody {
    /// SDK and publisher configuration metadata.
    pub configuration: ConfigurationBody,
    /// Device metadata snapshot.
    pub device: DeviceBody,
}

/// Configuration section of the request body.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigurationBody {
    pub app: AppBody,
    /// The backend-assigned application identifier accepted by the orchestrator.
    pub application_identifier: String,
    pub core_version: String,
    pub framework: FrameworkBody,
    pub player: PlayerBody,
    pub schema_version: String,
    pub vendor: VendorBody,
}

/// App metadata included in the request.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AppBody {
    pub bundle_id: Option<String>,
    pub publisher_application_identifier: Option<String>,
    pub version: Option<String>,
}

/// Host framework metadata (set by cross-platform wrappers).
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FrameworkBody {
    pub name: Option<String>,
    pub version: Option<String>,
}

/// Publisher-defined player identifier.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PlayerBody {
    pub player_id: Option<String>,
}

/// Vendor identifier and its scope.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VendorBody {
    pub identifier: Option<String>,
    pub scope: Option<String>,
}

/// Device section of the request body.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceBody {
    pub locale: Option<String>,
    pub network: NetworkBody,
    pub os: OsBody,
    pub screen: ScreenBody,
    pub specifications: SpecificationsBody,
}

/// Current network connection type.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NetworkBody {
    pub connection_type: Option<String>,
}

/// Operating system name and version.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OsBody {
    pub name: String,
    pub version: String,
}

/// Screen geometry.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScreenBody {
    pub height: u32,
    pub width: u32,
    pub scale: f64,
}

/// Device make and model.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SpecificationsBody {
    pub make: String,
    pub model: String,
}

impl AppConfigRequestBody {
    /// Builds a request body from the accepted application identifier and
    /// the current environment snapshot.
    pub fn new(app_identifier: &str, environment: &EnvironmentSnapshot) -> Self {
        Self {
            configuration: ConfigurationBody {
                app: AppBody {
                    bundle_id: environment.bundle_id.clone(),
                    publisher_application_identifier: environment
                        .publisher_app_identifier
                        .clone(),
                    version: environment.app_version.clone(),
                },
                application_identifier: app_identifier.to_owned(),
                core_version: SDK_VERSION.to_owned(),
                framework: FrameworkBody {
                    name: environment.framework_name.clone(),
                    version: environment.framework_version.clone(),
                },
                player: PlayerBody {
                    player_id: environment.player_id.clone(),
                },
                schema_version: APP_CONFIG_SCHEMA_VERSION.to_owned(),
                vendor: VendorBody {
                    identifier: environment.vendor_identifier.clone(),
                    scope: environment.vendor_identifier_scope.clone(),
                },
            },
            device: DeviceBody {
                locale: environment.locale.clone(),
                network: NetworkBody {
                    connection_type: environment.connection_type.clone(),
                },
                os: OsBody {
                    name: environment.os_name.clone(),
                    version: environment.os_version.clone(),
                },
                screen: ScreenBody {
                    height: environment.screen_height,
                    width: environment.screen_width,
                    scale: environment.screen_scale,
                },
                specifications: SpecificationsBody {
                    make: environment.device_make.clone(),
                    model: environment.device_model.clone(),
                },
            },
        }
    }
}

/// Response body of the app-config endpoint. Every field is optional.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct AppConfigResponsePayload {
    /// Platform-specific config container.
    pub platform: Option<PlatformPayload>,
}

/// Platform container carrying the actual tunables and module list.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlatformPayload {
    pub consent_update_batch_delay_ms: Option<u64>,
    pub core_initialization_delay_base_ms: Option<u64>,
    pub core_initialization_delay_max_ms: Option<u64>,
    pub core_initialization_retry_count_max: Option<u32>,
    pub is_child_directed: Option<bool>,
    pub log_level: Option<String>,
    pub module_initialization_delay_base_ms: Option<u64>,
    pub module_initialization_delay_max_ms: Option<u64>,
    pub module_initialization_retry_count_max: Option<u32>,
    pub schema_version: Option<String>,
    pub modules: Option<Vec<ModulePayload>>,
}

/// Backend-declared module descriptor on the wire.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModulePayload {
    pub class_name: Option<String>,
    pub non_native_class_name: Option<String>,
    pub id: String,
    pub config: Option<ModuleConfigPayload>,
}

/// Per-module wire config: a version hint and opaque constructor params.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModuleConfigPayload {
    pub version: Option<String>,
    pub params: Option<serde_json::Value>,
}

/// Client for the app-config endpoint.
///
/// `Ok(None)` means the backend answered successfully but with an empty body;
/// the store treats that as a distinct protocol error.
#[async_trait]
pub trait AppConfigClient: Send + Sync {
    /// Posts the request and returns the parsed payload, if any.
    async fn fetch_app_config(
        &self,
        request: &AppConfigRequestBody,
    ) -> Result<Option<AppConfigResponsePayload>, HttpError>;
}

/// Production `reqwest`-backed implementation of [`AppConfigClient`].
#[derive(Debug, Clone)]
pub struct HttpAppConfigClient {
    /// Underlying HTTP client (shared across requests).
    client: Client,
    /// Fully qualified endpoint URL.
    endpoint: String,
}

impl HttpAppConfigClient {
    /// Builds a client posting to `endpoint`.
    pub fn new(endpoint: impl Into<String>) -> Result<Self, HttpError> {
        let mut headers = HeaderMap::new();
        let user_agent = format!("sdk-core/{SDK_VERSION}");
        headers.insert(
            USER_AGENT,
            HeaderValue::from_str(&user_agent)
                .map_err(|_| HttpError::InvalidHeader(user_agent.clone()))?,
        );
        let client = Client::builder()
            .default_headers(headers)
            .build()
            .map_err(HttpError::Transport)?;
        Ok(Self {
            client,
            endpoint: endpoint.into(),
        })
    }

    /// Maps a non-success status code onto the error taxonomy.
    fn classify_status(status: StatusCode) -> HttpError {
        match status {
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => HttpError::Unauthorized,
            status if status.is_server_error() => HttpError::Retryable(status.as_u16()),
            status => HttpError::Rejected(status.as_u16()),
        }
    }
}

#[async_trait]
impl AppConfigClient for HttpAppConfigClient {
    /// Posts the request body as JSON and decodes the optional response payload.
    async fn fetch_app_config(
        &self,
        request: &AppConfigRequestBody,
    ) -> Result<Option<AppConfigResponsePayload>, HttpError> {
        debug!("posting app config request to {}", self.endpoint);
        let response = self
            .client
            .post(&self.endpoint)
            .json(request)
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            return Err(Self::classify_status(status));
        }
        let body = response.bytes().await?;
        if body.is_empty() {
            // Success with no payload; the caller decides how to surface it.
            return Ok(None);
        }
        let payload = serde_json::from_slice(&body)?;
        Ok(Some(payload))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::environment::EnvironmentSnapshot;

    /// Builds a request body against a plain snapshot for the tests below.
    fn request_body() -> AppConfigRequestBody {
        let environment = EnvironmentSnapshot {
            bundle_id: Some("com.example.game".into()),
            os_name: "android".into(),
            os_version: "14".into(),
            ..Default::default()
        };
        AppConfigRequestBody::new("app-123", &environment)
    }

    /// The serialized request uses the documented camelCase field names.
    #[test]
    fn request_body_serializes_with_camel_case_keys() {
        let json = serde_json::to_value(request_body()).unwrap();
        assert_eq!(
            json["configuration"]["applicationIdentifier"],
            serde_json::json!("app-123")
        );
        assert_eq!(
            json["configuration"]["app"]["bundleId"],
            serde_json::json!("com.example.game")
        );
        assert_eq!(
            json["configuration"]["schemaVersion"],
            serde_json::json!(APP_CONFIG_SCHEMA_VERSION)
        );
        assert_eq!(json["device"]["os"]["name"], serde_json::json!("android"));
    }

    /// A successful response with a payload parses into the optional structure.
    #[tokio::test]
    async fn fetch_parses_successful_payload() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/init")
            .with_status(200)
            .with_body(
                r#"{"platform":{"coreInitializationRetryCountMax":5,"modules":[{"id":"analytics","className":"AnalyticsModule"}]}}"#,
            )
            .create_async()
            .await;
        let client = HttpAppConfigClient::new(format!("{}/init", server.url())).unwrap();
        let payload = client
            .fetch_app_config(&request_body())
            .await
            .unwrap()
            .expect("payload expected");
        let platform = payload.platform.unwrap();
        assert_eq!(platform.core_initialization_retry_count_max, Some(5));
        assert_eq!(platform.modules.unwrap()[0].id, "analytics");
        mock.assert_async().await;
    }

    /// An empty 200 body surfaces as `Ok(None)`, not as a decode error.
    #[tokio::test]
    async fn fetch_maps_empty_body_to_none() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/init")
            .with_status(200)
            .with_body("")
            .create_async()
            .await;
        let client = HttpAppConfigClient::new(format!("{}/init", server.url())).unwrap();
        let payload = client.fetch_app_config(&request_body()).await.unwrap();
        assert!(payload.is_none());
    }

    /// Server errors classify as retryable, client errors as rejected.
    #[tokio::test]
    async fn fetch_classifies_error_statuses() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/init")
            .with_status(503)
            .create_async()
            .await;
        let client = HttpAppConfigClient::new(format!("{}/init", server.url())).unwrap();
        match client.fetch_app_config(&request_body()).await {
            Err(HttpError::Retryable(503)) => {}
            other => panic!("expected retryable error, got {other:?}"),
        }
        assert!(matches!(
            HttpAppConfigClient::classify_status(StatusCode::UNAUTHORIZED),
            HttpError::Unauthorized
        ));
        assert!(matches!(
            HttpAppConfigClient::classify_status(StatusCode::BAD_REQUEST),
            HttpError::Rejected(400)
        ));
    }
}
