//! Client for the study backend.
//!
//! Responses are decoded into [`crate::types`] here and nowhere else.

use crate::types::{Schema, StudiesResponse, Study, StudyKey};
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::{Path, PathBuf};
use thiserror::Error;

pub type Result<T> = std::result::Result<T, ApiError>;

#[derive(Error, Debug)]
pub enum ApiError {
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("API returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Failed to decode response: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("Invalid request: {0}")]
    Invalid(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Body of `POST /rename`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RenameRequest {
    pub old_name: String,
    pub new_name: String,
}

#[derive(Debug, Clone)]
pub struct ApiClient {
    client: Client,
    base_url: String,
}

impl ApiClient {
    pub fn new(base_url: &str) -> Self {
        Self::with_client(Client::new(), base_url)
    }

    pub fn with_client(client: Client, base_url: &str) -> Self {
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path)
    }

    /// All studies a user saved under a schema; empty if they have none.
    pub async fn list_studies(&self, username: &str, schema: Schema) -> Result<Vec<Study>> {
        require("username", username)?;
        let request = self
            .client
            .get(self.endpoint("get_user_studies"))
            .query(&[("username", username), ("schema", schema.as_str())]);
        let response: StudiesResponse = self.send_json(request).await?;
        tracing::debug!(username, %schema, count = response.studies.len(), "listed studies");
        Ok(response.studies)
    }

    /// The named study, or `None` when the backend returns no match.
    pub async fn find_study(&self, key: &StudyKey) -> Result<Option<Study>> {
        require("username", &key.username)?;
        require("study name", &key.seg_name)?;
        let request = self.client.get(self.endpoint("get_user_studies")).query(&[
            ("username", key.username.as_str()),
            ("schema", key.schema.as_str()),
            ("study_name", key.seg_name.as_str()),
        ]);
        let response: StudiesResponse = self.send_json(request).await?;
        Ok(response.studies.into_iter().next())
    }

    /// Study geometry as a raw GeoJSON document.
    pub async fn study_geoms(&self, key: &StudyKey) -> Result<Value> {
        require("study name", &key.seg_name)?;
        let request = self.client.get(self.endpoint("get_user_study_geoms")).query(&[
            ("username", key.username.as_str()),
            ("study", key.seg_name.as_str()),
            ("schema", key.schema.as_str()),
        ]);
        self.send_json(request).await
    }

    pub async fn rename_study(
        &self,
        username: &str,
        schema: Schema,
        old_name: &str,
        new_name: &str,
    ) -> Result<Value> {
        require("username", username)?;
        require("old name", old_name)?;
        let new_name = new_name.trim();
        require("new name", new_name)?;
        if new_name == old_name {
            return Err(ApiError::Invalid("new name matches the current name".to_string()));
        }

        let body = RenameRequest {
            old_name: old_name.to_string(),
            new_name: new_name.to_string(),
        };
        let request = self
            .client
            .post(self.endpoint("rename"))
            .query(&[("username", username), ("schema", schema.as_str())])
            .json(&body);
        let reply: Value = self.send_json(request).await?;
        tracing::info!(username, %schema, old_name, new_name, "renamed study");
        Ok(reply)
    }

    pub async fn delete_study(&self, key: &StudyKey) -> Result<()> {
        require("username", &key.username)?;
        require("study name", &key.seg_name)?;
        let request = self.client.post(self.endpoint("delete")).query(&[
            ("username", key.username.as_str()),
            ("schema", key.schema.as_str()),
            ("study", key.seg_name.as_str()),
        ]);
        self.send(request).await?;
        tracing::info!(study = %key, "deleted study");
        Ok(())
    }

    pub async fn set_shared(&self, key: &StudyKey, shared: bool) -> Result<()> {
        require("username", &key.username)?;
        require("study name", &key.seg_name)?;
        let shared = if shared { "true" } else { "false" };
        let request = self.client.post(self.endpoint("share")).query(&[
            ("username", key.username.as_str()),
            ("schema", key.schema.as_str()),
            ("study", key.seg_name.as_str()),
            ("shared", shared),
        ]);
        self.send(request).await?;
        tracing::info!(study = %key, shared, "updated sharing");
        Ok(())
    }

    /// Writes the study geometry to `output`. A directory (or no output at
    /// all) gets a file named after the study.
    pub async fn download_study(&self, key: &StudyKey, output: Option<&Path>) -> Result<PathBuf> {
        let geoms = self.study_geoms(key).await?;
        let path = match output {
            Some(dir) if dir.is_dir() => dir.join(download_file_name(&key.seg_name)),
            Some(file) => file.to_path_buf(),
            None => PathBuf::from(download_file_name(&key.seg_name)),
        };
        let bytes = serde_json::to_vec_pretty(&geoms)?;
        tokio::fs::write(&path, bytes).await?;
        tracing::info!(study = %key, ?path, "downloaded study geometry");
        Ok(path)
    }

    async fn send(&self, request: reqwest::RequestBuilder) -> Result<String> {
        let response = request.send().await?;
        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            return Err(ApiError::Status {
                status: status.as_u16(),
                body,
            });
        }
        Ok(body)
    }

    async fn send_json<T: DeserializeOwned>(&self, request: reqwest::RequestBuilder) -> Result<T> {
        let body = self.send(request).await?;
        Ok(serde_json::from_str(&body)?)
    }
}

/// `{seg_name}.geojson`, with path separators replaced and leading dots
/// stripped so the file always lands in the target directory.
pub fn download_file_name(seg_name: &str) -> String {
    let cleaned: String = seg_name
        .chars()
        .map(|c| match c {
            '/' | '\\' | ':' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .collect();
    let cleaned = cleaned.trim().trim_start_matches('.');
    let stem = if cleaned.is_empty() { "study" } else { cleaned };
    format!("{}.geojson", stem)
}

fn require(field: &str, value: &str) -> Result<()> {
    if value.trim().is_empty() {
        return Err(ApiError::Invalid(format!("{} must not be empty", field)));
    }
    Ok(())
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use axum::extract::Query;
    use axum::http::StatusCode;
    use axum::response::IntoResponse;
    use axum::routing::{get, post};
    use axum::{Json, Router};
    use serde_json::json;
    use std::collections::HashMap;

    type Params = Query<HashMap<String, String>>;

    /// Serves `app` on an ephemeral port and returns its base URL.
    pub(crate) async fn spawn_backend(app: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{}", addr)
    }

    async fn get_user_studies(Query(params): Params) -> impl IntoResponse {
        if params.get("username").map(String::as_str) != Some("alice") {
            return Json(json!({ "studies": ["No studies have been created yet!"] }));
        }
        let shared = params.get("study_name").map(String::as_str) == Some("Market St");
        Json(json!({
            "studies": [{
                "username": "alice",
                "seg_name": params.get("study_name").cloned().unwrap_or("Market St".into()),
                "shared": shared,
                "has_isochrone": true,
                "miles": 1.25,
                "total_pop": 12345,
                "bike_ped_crashes": [{"Total Bike Crashes": 2, "Total Pedestrian Crashes": 5}],
                "schema_seen": params.get("schema")
            }]
        }))
    }

    async fn get_geoms(Query(params): Params) -> impl IntoResponse {
        if params.get("study").map(String::as_str) == Some("missing") {
            return (StatusCode::NOT_FOUND, "no such study").into_response();
        }
        Json(json!({
            "type": "FeatureCollection",
            "features": [{
                "type": "Feature",
                "properties": {},
                "geometry": {"type": "Point", "coordinates": [-75.1, 40.0]}
            }]
        }))
        .into_response()
    }

    async fn rename(Query(params): Params, Json(body): Json<RenameRequest>) -> impl IntoResponse {
        Json(json!({
            "username": params.get("username"),
            "schema": params.get("schema"),
            "renamed": [body.old_name, body.new_name]
        }))
    }

    async fn share(Query(params): Params) -> impl IntoResponse {
        match params.get("shared").map(String::as_str) {
            Some("true") | Some("false") => StatusCode::OK,
            _ => StatusCode::BAD_REQUEST,
        }
    }

    async fn delete(Query(params): Params) -> impl IntoResponse {
        if params.get("study").map(String::as_str) == Some("locked") {
            return (StatusCode::INTERNAL_SERVER_ERROR, "cannot delete").into_response();
        }
        StatusCode::OK.into_response()
    }

    pub(crate) fn fake_backend() -> Router {
        Router::new()
            .route("/get_user_studies", get(get_user_studies))
            .route("/get_user_study_geoms", get(get_geoms))
            .route("/rename", post(rename))
            .route("/share", post(share))
            .route("/delete", post(delete))
    }

    async fn client() -> ApiClient {
        let base = spawn_backend(fake_backend()).await;
        ApiClient::new(&format!("{}/", base))
    }

    #[tokio::test]
    async fn lists_and_decodes_studies() {
        let api = client().await;
        let studies = api.list_studies("alice", Schema::Sidewalk).await.unwrap();
        assert_eq!(studies.len(), 1);
        assert_eq!(studies[0].total_pop, 12345);
        assert_eq!(studies[0].crash_summary().pedestrian, "5");

        let none = api.list_studies("bob", Schema::Lts).await.unwrap();
        assert!(none.is_empty());
    }

    #[tokio::test]
    async fn finds_single_study_by_name() {
        let api = client().await;
        let key = StudyKey::new("alice", Schema::Lts, "Market St");
        let study = api.find_study(&key).await.unwrap().unwrap();
        assert!(study.shared);
        assert_eq!(study.seg_name, "Market St");

        let missing = api
            .find_study(&StudyKey::new("bob", Schema::Lts, "Nope"))
            .await
            .unwrap();
        assert!(missing.is_none());
    }

    #[tokio::test]
    async fn surfaces_status_errors() {
        let api = client().await;
        let err = api
            .study_geoms(&StudyKey::new("alice", Schema::Lts, "missing"))
            .await
            .unwrap_err();
        match err {
            ApiError::Status { status, body } => {
                assert_eq!(status, 404);
                assert_eq!(body, "no such study");
            }
            other => panic!("unexpected error: {other}"),
        }

        let err = api
            .delete_study(&StudyKey::new("alice", Schema::Lts, "locked"))
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::Status { status: 500, .. }));
    }

    #[tokio::test]
    async fn rename_posts_old_and_new_names() {
        let api = client().await;
        let reply = api
            .rename_study("alice", Schema::Sidewalk, "Old", "  New  ")
            .await
            .unwrap();
        assert_eq!(reply["renamed"], json!(["Old", "New"]));
        assert_eq!(reply["schema"], "sidewalk");
    }

    #[tokio::test]
    async fn rename_checks_presence_before_calling() {
        let api = ApiClient::new("http://127.0.0.1:9");
        let err = api.rename_study("alice", Schema::Lts, "Old", "   ").await.unwrap_err();
        assert!(matches!(err, ApiError::Invalid(_)));
        let err = api.rename_study("alice", Schema::Lts, "Old", "Old").await.unwrap_err();
        assert!(matches!(err, ApiError::Invalid(_)));
        let err = api
            .delete_study(&StudyKey::new("alice", Schema::Lts, ""))
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::Invalid(_)));
    }

    #[tokio::test]
    async fn share_and_delete_succeed() {
        let api = client().await;
        let key = StudyKey::new("alice", Schema::Lts, "Market St");
        api.set_shared(&key, true).await.unwrap();
        api.set_shared(&key, false).await.unwrap();
        api.delete_study(&key).await.unwrap();
    }

    #[tokio::test]
    async fn downloads_geometry_to_file() {
        let api = client().await;
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("study.geojson");
        let key = StudyKey::new("alice", Schema::Lts, "Market St");

        let written = api.download_study(&key, Some(&target)).await.unwrap();
        assert_eq!(written, target);
        let content: Value = serde_json::from_slice(&std::fs::read(&target).unwrap()).unwrap();
        assert_eq!(content["type"], "FeatureCollection");
    }

    #[tokio::test]
    async fn download_into_directory_names_file_after_study() {
        let api = client().await;
        let dir = tempfile::tempdir().unwrap();
        let key = StudyKey::new("alice", Schema::Lts, "../../etc/Market St");

        let written = api.download_study(&key, Some(dir.path())).await.unwrap();
        assert_eq!(written, dir.path().join("_.._etc_Market St.geojson"));
        assert_eq!(written.parent(), Some(dir.path()));
        assert!(written.exists());
    }

    #[test]
    fn download_names_cannot_escape_the_directory() {
        assert_eq!(download_file_name("Market St"), "Market St.geojson");
        assert_eq!(download_file_name("../secret"), "_secret.geojson");
        assert_eq!(download_file_name("a/b\\c"), "a_b_c.geojson");
        assert_eq!(download_file_name(".."), "study.geojson");
        assert_eq!(download_file_name(""), "study.geojson");
    }
}
