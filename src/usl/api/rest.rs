//! REST API Handlers
//!
//! Maps the USL REST endpoints onto [`UslService`]. Every route lives under
//! `/usl/v1`, except the health and readiness probes.

use crate::error::{Error, ErrorKind};
use crate::udx::ProvisionUdxRequest;
use crate::usl::service::UslService;
use axum::{
    body::Bytes,
    extract::{Json, Path, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};
use uuid::Uuid;

// =============================================================================
// Request/Response Types
// =============================================================================

/// Device registration request
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterDeviceRequest {
    pub url: String,
    pub pin: String,
}

/// API error response
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiErrorResponse {
    pub error: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

// =============================================================================
// REST Router
// =============================================================================

/// REST API router builder
pub struct RestRouter {
    service: Arc<UslService>,
}

impl RestRouter {
    pub fn new(service: Arc<UslService>) -> Self {
        Self { service }
    }

    /// Build the Axum router
    pub fn build(self) -> Router {
        let state = AppState {
            service: self.service,
        };

        let usl = Router::new()
            // Devices and volumes
            .route("/devices", get(list_devices))
            .route("/devices/:device_id/volumes", get(list_volumes))
            .route(
                "/devices/:device_id/volumes/:volume_id/mount",
                post(mount_volume),
            )
            .route(
                "/devices/:device_id/volumes/:volume_id/unmount",
                post(unmount_volume),
            )
            .route("/events", get(next_event))
            // Registration
            .route("/registerDevice", post(register_device))
            .route("/registrationToken", get(registration_token))
            // System
            .route("/system", get(system_info))
            .route("/system/networkInterfaces", get(network_interfaces))
            .route(
                "/system/certificates",
                post(create_domain_key)
                    .put(put_domain_certificate)
                    .delete(delete_domain_certificates),
            )
            .route("/system/certificates/:material_type", get(get_material))
            // UDX
            .route("/udx/provision", post(provision_udx));

        Router::new()
            .nest("/usl/v1", usl)
            .route("/health", get(health_check))
            .route("/ready", get(readiness_check))
            .layer(TraceLayer::new_for_http())
            .with_state(state)
    }
}

/// Shared application state
#[derive(Clone)]
struct AppState {
    service: Arc<UslService>,
}

// =============================================================================
// Error Mapping
// =============================================================================

fn status_for(kind: ErrorKind) -> StatusCode {
    match kind {
        ErrorKind::NotFound => StatusCode::NOT_FOUND,
        ErrorKind::Conflict => StatusCode::CONFLICT,
        ErrorKind::BadRequest => StatusCode::BAD_REQUEST,
        ErrorKind::GatewayTimeout => StatusCode::GATEWAY_TIMEOUT,
        ErrorKind::Unavailable => StatusCode::SERVICE_UNAVAILABLE,
        ErrorKind::Internal => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn error_code(kind: ErrorKind) -> &'static str {
    match kind {
        ErrorKind::NotFound => "not_found",
        ErrorKind::Conflict => "conflict",
        ErrorKind::BadRequest => "bad_request",
        ErrorKind::GatewayTimeout => "gateway_timeout",
        ErrorKind::Unavailable => "unavailable",
        ErrorKind::Internal => "internal_error",
    }
}

fn error_response(e: Error) -> Response {
    let kind = e.kind();
    let status = status_for(kind);
    if status.is_server_error() {
        error!("Request failed: {}", e);
    } else {
        warn!("Request rejected: {}", e);
    }
    (
        status,
        Json(ApiErrorResponse {
            error: error_code(kind).into(),
            message: e.to_string(),
            details: None,
        }),
    )
        .into_response()
}

fn octet_stream(body: bytes::Bytes) -> Response {
    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, "application/octet-stream")],
        body,
    )
        .into_response()
}

// =============================================================================
// Handlers
// =============================================================================

async fn list_devices(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.service.get_device_list())
}

async fn list_volumes(
    State(state): State<AppState>,
    Path(device_id): Path<Uuid>,
) -> impl IntoResponse {
    match state.service.get_device_volumes_list(&device_id) {
        Ok(volumes) => Json(volumes).into_response(),
        Err(e) => error_response(e),
    }
}

async fn mount_volume(
    State(state): State<AppState>,
    Path((device_id, volume_id)): Path<(Uuid, Uuid)>,
) -> impl IntoResponse {
    match state.service.post_device_volume_mount(&device_id, &volume_id) {
        Ok(mount) => Json(mount).into_response(),
        Err(e) => error_response(e),
    }
}

async fn unmount_volume(
    State(state): State<AppState>,
    Path((device_id, volume_id)): Path<(Uuid, Uuid)>,
) -> impl IntoResponse {
    match state.service.post_device_volume_unmount(&device_id, &volume_id) {
        Ok(handle) => Json(handle).into_response(),
        Err(e) => error_response(e),
    }
}

/// Long poll: completes when the next volume event is available
async fn next_event(State(state): State<AppState>) -> impl IntoResponse {
    match state.service.get_events().await {
        Ok(event) => Json(event).into_response(),
        Err(e) => error_response(e),
    }
}

async fn register_device(
    State(state): State<AppState>,
    Json(request): Json<RegisterDeviceRequest>,
) -> impl IntoResponse {
    info!("Registering device at {}", request.url);
    match state.service.register_device(&request.url, &request.pin).await {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(e) => error_response(e),
    }
}

async fn registration_token(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.service.get_registration_token())
}

async fn system_info(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.service.get_system())
}

async fn network_interfaces(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.service.get_network_interfaces())
}

async fn create_domain_key(State(state): State<AppState>) -> impl IntoResponse {
    match state.service.create_domain_key().await {
        Ok(public_key) => octet_stream(public_key),
        Err(e) => error_response(e),
    }
}

async fn put_domain_certificate(
    State(state): State<AppState>,
    body: Bytes,
) -> impl IntoResponse {
    match state.service.put_domain_certificate(&body).await {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(e) => error_response(e),
    }
}

async fn delete_domain_certificates(State(state): State<AppState>) -> impl IntoResponse {
    match state.service.delete_domain_certificates().await {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(e) => error_response(e),
    }
}

async fn get_material(
    State(state): State<AppState>,
    Path(material_type): Path<String>,
) -> impl IntoResponse {
    match state.service.get_material(&material_type).await {
        Ok(material) => octet_stream(material),
        Err(e) => error_response(e),
    }
}

async fn provision_udx(
    State(state): State<AppState>,
    Json(request): Json<ProvisionUdxRequest>,
) -> impl IntoResponse {
    info!(
        "Provisioning UDX resources: user {}, bucket {}",
        request.iam_user_name, request.bucket_name
    );
    match state.service.provision_udx(&request).await {
        Ok(resources) => (StatusCode::CREATED, Json(resources)).into_response(),
        Err(e) => error_response(e),
    }
}

/// Health check
async fn health_check() -> impl IntoResponse {
    (StatusCode::OK, "ok")
}

/// Readiness check
async fn readiness_check(State(state): State<AppState>) -> impl IntoResponse {
    if state.service.is_running() {
        (StatusCode::OK, "ready")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "shutting down")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::model::{Device, MountResponse, PublicEvent, PublicVolume};
    use crate::usl::service::tests::{harness, udx_bucket};
    use crate::usl::service::RegistrationToken;
    use axum::body::Body;
    use axum::http::{Method, Request};
    use serde::de::DeserializeOwned;
    use tower::ServiceExt;

    async fn call(app: &Router, method: Method, uri: &str, body: Body) -> Response {
        app.clone()
            .oneshot(Request::builder().method(method).uri(uri).body(body).unwrap())
            .await
            .unwrap()
    }

    async fn json<T: DeserializeOwned>(response: Response) -> T {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    async fn raw(response: Response) -> bytes::Bytes {
        axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap()
    }

    #[test]
    fn test_status_mapping() {
        assert_eq!(status_for(ErrorKind::NotFound), StatusCode::NOT_FOUND);
        assert_eq!(status_for(ErrorKind::Conflict), StatusCode::CONFLICT);
        assert_eq!(status_for(ErrorKind::GatewayTimeout), StatusCode::GATEWAY_TIMEOUT);
        assert_eq!(status_for(ErrorKind::Unavailable), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn test_devices_and_volumes() {
        let h = harness().await;
        let app = RestRouter::new(h.service.clone()).build();
        let device_id = h.service.device().uuid;

        let response = call(&app, Method::GET, "/usl/v1/devices", Body::empty()).await;
        assert_eq!(response.status(), StatusCode::OK);
        let devices: Vec<Device> = json(response).await;
        assert_eq!(devices[0].uuid, device_id);

        udx_bucket(&h.backend, "photos").await;
        h.service.reconciler().update().await.unwrap();

        let uri = format!("/usl/v1/devices/{}/volumes", device_id);
        let volumes: Vec<PublicVolume> = json(call(&app, Method::GET, &uri, Body::empty()).await).await;
        assert_eq!(volumes.len(), 1);
        assert_eq!(volumes[0].name, "lab: photos");

        let uri = format!("/usl/v1/devices/{}/volumes", Uuid::new_v4());
        let response = call(&app, Method::GET, &uri, Body::empty()).await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        let body: ApiErrorResponse = json(response).await;
        assert_eq!(body.error, "not_found");

        let uri = format!("/usl/v1/devices/{}/volumes/{}/mount", device_id, volumes[0].uuid);
        let mount: MountResponse = json(call(&app, Method::POST, &uri, Body::empty()).await).await;
        assert_eq!(mount.handle, "photos");
        h.service.shutdown().await;
    }

    #[tokio::test]
    async fn test_events_endpoint() {
        let h = harness().await;
        let app = RestRouter::new(h.service.clone()).build();

        udx_bucket(&h.backend, "photos").await;
        h.service.reconciler().update().await.unwrap();

        let response = call(&app, Method::GET, "/usl/v1/events", Body::empty()).await;
        assert_eq!(response.status(), StatusCode::OK);
        let body: serde_json::Value = json(response).await;
        assert_eq!(body["eventType"], "newVolume");

        let event: PublicEvent = serde_json::from_value(body).unwrap();
        assert_matches::assert_matches!(event, PublicEvent::NewVolume { .. });
        h.service.shutdown().await;
    }

    #[tokio::test]
    async fn test_registration_endpoints() {
        let h = harness().await;
        let app = RestRouter::new(h.service.clone()).build();

        let token: RegistrationToken =
            json(call(&app, Method::GET, "/usl/v1/registrationToken", Body::empty()).await).await;
        assert_eq!(token.registration_token.len(), 12);

        let request = Request::builder()
            .method(Method::POST)
            .uri("/usl/v1/registerDevice")
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(r#"{"url":"ftp://nowhere","pin":"1234"}"#))
            .unwrap();
        let response = app.clone().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let request = Request::builder()
            .method(Method::POST)
            .uri("/usl/v1/registerDevice")
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(r#"{"url":"https://partner.example","pin":"1234"}"#))
            .unwrap();
        let response = app.clone().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::NO_CONTENT);
        h.service.shutdown().await;
    }

    #[tokio::test]
    async fn test_certificate_endpoints() {
        let h = harness().await;
        let app = RestRouter::new(h.service.clone()).build();

        let response = call(&app, Method::POST, "/usl/v1/system/certificates", Body::empty()).await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers()[header::CONTENT_TYPE],
            "application/octet-stream"
        );
        assert!(raw(response).await.starts_with(b"-----BEGIN PUBLIC KEY-----"));

        let response = call(&app, Method::POST, "/usl/v1/system/certificates", Body::empty()).await;
        assert_eq!(response.status(), StatusCode::CONFLICT);

        let pem = rcgen::generate_simple_self_signed(vec!["usl.local".to_string()])
            .unwrap()
            .cert
            .pem();
        let response = call(&app, Method::PUT, "/usl/v1/system/certificates", Body::from(pem.clone())).await;
        assert_eq!(response.status(), StatusCode::NO_CONTENT);

        let response = call(
            &app,
            Method::GET,
            "/usl/v1/system/certificates/domainCertificate",
            Body::empty(),
        )
        .await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(raw(response).await, pem.as_bytes());

        let response = call(
            &app,
            Method::GET,
            "/usl/v1/system/certificates/nativePrivateKey",
            Body::empty(),
        )
        .await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);

        let response = call(
            &app,
            Method::GET,
            "/usl/v1/system/certificates/somethingElse",
            Body::empty(),
        )
        .await;
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);

        let response = call(&app, Method::DELETE, "/usl/v1/system/certificates", Body::empty()).await;
        assert_eq!(response.status(), StatusCode::NO_CONTENT);
        let response = call(&app, Method::DELETE, "/usl/v1/system/certificates", Body::empty()).await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        h.service.shutdown().await;
    }

    #[tokio::test]
    async fn test_udx_provision_endpoint() {
        let h = harness().await;
        let app = RestRouter::new(h.service.clone()).build();

        let request = Request::builder()
            .method(Method::POST)
            .uri("/usl/v1/udx/provision")
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(
                r#"{"session":{"accessKey":"AK","secretKey":"SK"},
                    "iamUserName":"udx-partner","iamUserPassword":"pw","bucketName":"exchange"}"#,
            ))
            .unwrap();
        let response = app.clone().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::CREATED);
        let body: serde_json::Value = json(response).await;
        assert_eq!(body["bucketName"], "udx-exchange");
        assert_eq!(body["iamUserName"], "udx-partner");
        h.service.shutdown().await;
    }

    #[tokio::test]
    async fn test_probes() {
        let h = harness().await;
        let app = RestRouter::new(h.service.clone()).build();

        assert_eq!(call(&app, Method::GET, "/health", Body::empty()).await.status(), StatusCode::OK);
        assert_eq!(call(&app, Method::GET, "/ready", Body::empty()).await.status(), StatusCode::OK);

        h.service.shutdown().await;
        assert_eq!(
            call(&app, Method::GET, "/ready", Body::empty()).await.status(),
            StatusCode::SERVICE_UNAVAILABLE
        );
    }

    #[tokio::test]
    async fn test_system_endpoints() {
        let h = harness().await;
        let app = RestRouter::new(h.service.clone()).build();

        let system: serde_json::Value =
            json(call(&app, Method::GET, "/usl/v1/system", Body::empty()).await).await;
        assert_eq!(system["model"], "EES");
        assert_eq!(system["friendlyName"], "lab");

        let interfaces: serde_json::Value = json(
            call(&app, Method::GET, "/usl/v1/system/networkInterfaces", Body::empty()).await,
        )
        .await;
        assert_eq!(interfaces[0]["macAddress"], "AA:BB:CC:DD:EE:FF");
        h.service.shutdown().await;
    }
}
