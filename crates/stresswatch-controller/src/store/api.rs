use super::ObjectStore;
use crate::error::{ControllerError, Result};
use async_trait::async_trait;
use k8s_openapi::api::core::v1::Pod;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use reqwest::{header, Client, Method, RequestBuilder, StatusCode};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use stresswatch_core::{AnnotationPatch, GroupVersionKind, NetworkChaos, ResourceKey, ResourceVersion};
use tracing::debug;

const MERGE_PATCH: &str = "application/merge-patch+json";

/// Object store backed by a Kubernetes-compatible API server
pub struct ApiObjectStore {
    base_url: String,
    client: Client,
    token: Option<String>,
}

#[derive(Deserialize)]
struct ObjectList<T> {
    #[serde(default = "Vec::new")]
    items: Vec<T>,
}

#[derive(Deserialize)]
struct PatchedObject {
    metadata: ObjectMeta,
}

impl ApiObjectStore {
    pub fn new(base_url: &str) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client: Client::new(),
            token: None,
        }
    }

    /// Authenticate every request with a bearer token
    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        let url = format!("{}{}", self.base_url, path);
        debug!("{} {}", method, url);
        let builder = self.client.request(method, &url);
        match &self.token {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        }
    }

    async fn send(&self, builder: RequestBuilder) -> Result<reqwest::Response> {
        builder
            .send()
            .await
            .map_err(|e| ControllerError::api_request_failed(format!("HTTP request failed: {}", e)))
    }

    async fn get_object<T: DeserializeOwned>(&self, key: &ResourceKey) -> Result<Option<T>> {
        let resp = self.send(self.request(Method::GET, &key.api_path())).await?;

        if resp.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let resp = check_status(resp, "GET", key).await?;

        resp.json::<T>().await.map(Some).map_err(|e| {
            ControllerError::api_request_failed(format!("Failed to parse {}: {}", key, e))
        })
    }

    async fn list_objects<T: DeserializeOwned>(
        &self,
        gvk: GroupVersionKind,
        namespace: Option<&str>,
    ) -> Result<Vec<T>> {
        let path = match namespace {
            Some(ns) => ResourceKey::new(gvk.clone(), ns, "").collection_path(),
            None => format!("/{}/{}", gvk.api_path(), gvk.resource_name()),
        };
        let resp = self.send(self.request(Method::GET, &path)).await?;
        let resp = check_status(resp, "LIST", &gvk).await?;

        let list: ObjectList<T> = resp.json().await.map_err(|e| {
            ControllerError::api_request_failed(format!("Failed to parse {} list: {}", gvk, e))
        })?;
        Ok(list.items)
    }

    /// PATCH with a JSON merge patch whose `metadata.resourceVersion` makes
    /// the write conditional
    async fn patch_object(
        &self,
        key: &ResourceKey,
        patch: &AnnotationPatch,
        expected: &ResourceVersion,
    ) -> Result<ResourceVersion> {
        let body = patch.to_merge_patch(expected.as_str()).to_string();
        let builder = self
            .request(Method::PATCH, &key.api_path())
            .header(header::CONTENT_TYPE, MERGE_PATCH)
            .body(body);
        let resp = self.send(builder).await?;

        match resp.status() {
            StatusCode::CONFLICT => return Err(ControllerError::conflict(key, expected)),
            StatusCode::NOT_FOUND => return Err(ControllerError::not_found(key)),
            _ => {}
        }
        let resp = check_status(resp, "PATCH", key).await?;

        let patched: PatchedObject = resp.json().await.map_err(|e| {
            ControllerError::api_request_failed(format!("Failed to parse patched {}: {}", key, e))
        })?;
        patched
            .metadata
            .resource_version
            .map(ResourceVersion::new)
            .ok_or_else(|| {
                ControllerError::api_request_failed(format!(
                    "Patched {} has no resourceVersion",
                    key
                ))
            })
    }
}

async fn check_status(
    resp: reqwest::Response,
    verb: &str,
    target: &impl std::fmt::Display,
) -> Result<reqwest::Response> {
    if resp.status().is_success() {
        return Ok(resp);
    }
    let status = resp.status();
    let body = resp.text().await.unwrap_or_default();
    Err(ControllerError::api_request_failed(format!(
        "{} {} failed with status {}: {}",
        verb, target, status, body
    )))
}

#[async_trait]
impl ObjectStore for ApiObjectStore {
    async fn get_pod(&self, namespace: &str, name: &str) -> Result<Option<Pod>> {
        self.get_object(&ResourceKey::pod(namespace, name)).await
    }

    async fn list_pods(&self, namespace: Option<&str>) -> Result<Vec<Pod>> {
        self.list_objects(GroupVersionKind::pod(), namespace).await
    }

    async fn list_fault_resources(&self, namespace: &str) -> Result<Vec<NetworkChaos>> {
        self.list_objects(GroupVersionKind::network_chaos(), Some(namespace))
            .await
    }

    async fn get_fault_resource(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<NetworkChaos>> {
        self.get_object(&ResourceKey::network_chaos(namespace, name))
            .await
    }

    async fn patch_pod(
        &self,
        namespace: &str,
        name: &str,
        patch: &AnnotationPatch,
        expected: &ResourceVersion,
    ) -> Result<ResourceVersion> {
        self.patch_object(&ResourceKey::pod(namespace, name), patch, expected)
            .await
    }

    async fn patch_fault_resource(
        &self,
        namespace: &str,
        name: &str,
        patch: &AnnotationPatch,
        expected: &ResourceVersion,
    ) -> Result<ResourceVersion> {
        self.patch_object(&ResourceKey::network_chaos(namespace, name), patch, expected)
            .await
    }
}

#[cfg(test)]
mod tests {
    //! Runs the client against a small in-process API server whose state is
    //! a `MockObjectStore`.

    use super::*;
    use crate::store::MockObjectStore;
    use axum::extract::{Path, Request, State};
    use axum::http::HeaderMap;
    use axum::middleware::{self, Next};
    use axum::response::{IntoResponse, Response};
    use axum::routing::get;
    use axum::{Json, Router};
    use serde_json::Value;
    use stresswatch_core::{Resource, CHAOS_STARTED_ANNOTATION, TEST_INSTANCE_LABEL};

    const TOKEN: &str = "test-token";

    fn patch_from_body(body: &Value) -> (AnnotationPatch, ResourceVersion) {
        let mut patch = AnnotationPatch::new();
        if let Some(annotations) = body["metadata"]["annotations"].as_object() {
            for (key, value) in annotations {
                patch = match value.as_str() {
                    Some(v) => patch.set(key.clone(), v),
                    None => patch.remove(key.clone()),
                };
            }
        }
        let version = body["metadata"]["resourceVersion"]
            .as_str()
            .unwrap_or_default();
        (patch, ResourceVersion::new(version))
    }

    fn patch_response(result: Result<ResourceVersion>) -> Response {
        match result {
            Ok(version) => {
                Json(serde_json::json!({"metadata": {"resourceVersion": version.0}})).into_response()
            }
            Err(ControllerError::Conflict { .. }) => axum::http::StatusCode::CONFLICT.into_response(),
            Err(ControllerError::NotFound { .. }) => axum::http::StatusCode::NOT_FOUND.into_response(),
            Err(_) => axum::http::StatusCode::INTERNAL_SERVER_ERROR.into_response(),
        }
    }

    fn found<T: serde::Serialize>(object: Option<T>) -> Response {
        match object {
            Some(object) => Json(object).into_response(),
            None => axum::http::StatusCode::NOT_FOUND.into_response(),
        }
    }

    async fn get_pod(
        State(store): State<MockObjectStore>,
        Path((ns, name)): Path<(String, String)>,
    ) -> Response {
        found(store.get_pod(&ns, &name).await.ok().flatten())
    }

    async fn patch_pod(
        State(store): State<MockObjectStore>,
        Path((ns, name)): Path<(String, String)>,
        headers: HeaderMap,
        Json(body): Json<Value>,
    ) -> Response {
        assert_eq!(
            headers.get(axum::http::header::CONTENT_TYPE).unwrap(),
            MERGE_PATCH
        );
        let (patch, version) = patch_from_body(&body);
        patch_response(store.patch_pod(&ns, &name, &patch, &version).await)
    }

    async fn list_pods(State(store): State<MockObjectStore>) -> Response {
        let items = store.list_pods(None).await.unwrap_or_default();
        Json(serde_json::json!({ "items": items })).into_response()
    }

    async fn list_chaos(
        State(store): State<MockObjectStore>,
        Path(ns): Path<String>,
    ) -> Response {
        let items = store.list_fault_resources(&ns).await.unwrap_or_default();
        Json(serde_json::json!({ "items": items })).into_response()
    }

    async fn get_chaos(
        State(store): State<MockObjectStore>,
        Path((ns, name)): Path<(String, String)>,
    ) -> Response {
        found(store.get_fault_resource(&ns, &name).await.ok().flatten())
    }

    async fn patch_chaos(
        State(store): State<MockObjectStore>,
        Path((ns, name)): Path<(String, String)>,
        Json(body): Json<Value>,
    ) -> Response {
        let (patch, version) = patch_from_body(&body);
        patch_response(store.patch_fault_resource(&ns, &name, &patch, &version).await)
    }

    async fn require_token(req: Request, next: Next) -> Response {
        let expected = format!("Bearer {}", TOKEN);
        match req.headers().get(axum::http::header::AUTHORIZATION) {
            Some(value) if value.to_str().ok() == Some(expected.as_str()) => next.run(req).await,
            _ => axum::http::StatusCode::UNAUTHORIZED.into_response(),
        }
    }

    async fn serve(store: MockObjectStore) -> String {
        let app = Router::new()
            .route("/api/v1/pods", get(list_pods))
            .route(
                "/api/v1/namespaces/{ns}/pods/{name}",
                get(get_pod).patch(patch_pod),
            )
            .route(
                "/apis/chaos-mesh.org/v1alpha1/namespaces/{ns}/networkchaos",
                get(list_chaos),
            )
            .route(
                "/apis/chaos-mesh.org/v1alpha1/namespaces/{ns}/networkchaos/{name}",
                get(get_chaos).patch(patch_chaos),
            )
            .layer(middleware::from_fn(require_token))
            .with_state(store);

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{}/", addr)
    }

    fn running_pod() -> Pod {
        let mut pod = Pod::default();
        pod.metadata.namespace = Some("ns".to_string());
        pod.metadata.name = Some("p1".to_string());
        pod
    }

    #[tokio::test]
    async fn test_get_list_and_patch() {
        let store = MockObjectStore::new();
        store.insert_pod(running_pod()).await.unwrap();
        store
            .insert_fault_resource(
                NetworkChaos::new("ns", "f1")
                    .with_selector(TEST_INSTANCE_LABEL, "t1")
                    .paused(),
            )
            .await
            .unwrap();

        let api = ApiObjectStore::new(&serve(store.clone()).await).with_token(TOKEN);

        let pod = api.get_pod("ns", "p1").await.unwrap().unwrap();
        assert!(api.get_pod("ns", "missing").await.unwrap().is_none());
        assert_eq!(api.list_pods(None).await.unwrap().len(), 1);

        let chaos = api.list_fault_resources("ns").await.unwrap();
        assert_eq!(chaos.len(), 1);
        assert!(chaos[0].is_paused());

        let version = chaos[0].resource_version().unwrap();
        let new_version = api
            .patch_fault_resource("ns", "f1", &AnnotationPatch::clear_pause(), &version)
            .await
            .unwrap();
        assert_ne!(version, new_version);
        let chaos = api.get_fault_resource("ns", "f1").await.unwrap().unwrap();
        assert!(!chaos.is_paused());

        api.patch_pod(
            "ns",
            "p1",
            &AnnotationPatch::mark_chaos_started(),
            &pod.resource_version().unwrap(),
        )
        .await
        .unwrap();
        let stored = store.pod("ns", "p1").await.unwrap();
        assert_eq!(
            stored.metadata.annotations.unwrap()[CHAOS_STARTED_ANNOTATION],
            "true"
        );
    }

    #[tokio::test]
    async fn test_status_mapping() {
        let store = MockObjectStore::new();
        store.insert_pod(running_pod()).await.unwrap();
        let api = ApiObjectStore::new(&serve(store.clone()).await).with_token(TOKEN);

        let err = api
            .patch_pod(
                "ns",
                "p1",
                &AnnotationPatch::mark_chaos_started(),
                &ResourceVersion::new("stale"),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, ControllerError::Conflict { .. }));

        let err = api
            .patch_pod(
                "ns",
                "ghost",
                &AnnotationPatch::mark_chaos_started(),
                &ResourceVersion::new("1"),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, ControllerError::NotFound { .. }));

        let anonymous = ApiObjectStore::new(api.base_url());
        let err = anonymous.get_pod("ns", "p1").await.unwrap_err();
        assert!(matches!(err, ControllerError::ApiRequestFailed { .. }));
        assert!(err.is_transient());
    }
}
