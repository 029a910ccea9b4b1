use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use reqwest::multipart::{Form, Part};
use reqwest::{Method, Response, StatusCode};
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::json;
use tracing::{info, warn};

use super::{FormManager, require_uid, server_message};
use crate::error::{BifrostError, Precondition};
use crate::job::{JobFailure, JobHandle, JobKind, JobReport};
use crate::kobo::client::{JSON_FORMAT, read_json};
use crate::kobo::types::{
    AssetPage, DeploymentResponse, DeploymentStatus, ExportResult, ImportResult, JobAccepted,
};
use crate::kobo::{ExportSpec, FormAsset, RequestBody, TransportError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ImportAction {
    Created,
    Updated,
}

/// Result of a create or update import.
#[derive(Debug, Clone, Serialize)]
pub struct ImportSummary {
    pub asset_uid: String,
    pub owner: Option<String>,
    pub action: ImportAction,
    pub polls: u32,
    pub duration_ms: i64,
}

/// State of an asset after a deploy or redeploy.
#[derive(Debug, Clone, Serialize)]
pub struct DeploymentSummary {
    pub asset_uid: String,
    pub name: String,
    pub deployment_status: DeploymentStatus,
    pub active: bool,
    pub version_id: Option<String>,
    pub deployed_version_id: Option<String>,
    pub collection_url: Option<String>,
    pub submission_count: u64,
}

impl From<DeploymentResponse> for DeploymentSummary {
    fn from(response: DeploymentResponse) -> Self {
        let collection_url = response.asset.collection_url().map(str::to_string);
        let asset = response.asset;
        Self {
            asset_uid: asset.uid,
            name: asset.name,
            deployment_status: asset.deployment_status,
            active: response.active,
            version_id: response.version_id.or(asset.version_id),
            deployed_version_id: asset.deployed_version_id,
            collection_url,
            submission_count: asset.submission_count,
        }
    }
}

/// An import followed by a deploy or redeploy of the same asset.
#[derive(Debug, Clone, Serialize)]
pub struct PublishSummary {
    pub import: ImportSummary,
    pub deployment: DeploymentSummary,
}

#[derive(Debug, Clone, Serialize)]
pub struct DeleteSummary {
    pub asset_uid: String,
    /// `false` when the server no longer knew the asset.
    pub existed: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct ExportSummary {
    pub asset_uid: String,
    pub path: PathBuf,
    pub bytes: u64,
    pub download_url: String,
    pub polls: u32,
}

impl FormManager {
    /// Every asset visible to the account, following pagination.
    pub async fn list_assets(&self) -> Result<Vec<FormAsset>, BifrostError> {
        let mut assets = Vec::new();
        let mut next = Some(self.client.endpoint("assets/"));
        while let Some(url) = next {
            let page: AssetPage = self.client.get_json(&url).await?;
            assets.extend(page.results);
            next = page.next;
        }
        info!(count = assets.len(), "listed assets");
        Ok(assets)
    }

    /// Import a form definition file as a new draft asset.
    pub async fn create_form(&self, file: &Path) -> Result<ImportSummary, BifrostError> {
        let form = import_form(file, &[("library", "false")]).await?;
        info!(file = %file.display(), "creating form");
        let report = self.run_import(form).await?;
        let result: ImportResult = decode_payload(&report)?;

        let created = result.messages.created.into_iter().next().ok_or_else(|| {
            BifrostError::ImportRejected("the server reported no created asset".to_string())
        })?;

        Ok(ImportSummary {
            asset_uid: created.uid,
            owner: created.owner,
            action: ImportAction::Created,
            polls: report.polls,
            duration_ms: report.duration_ms,
        })
    }

    /// Replace the content of an existing asset with a form definition file.
    pub async fn update_form(
        &self,
        asset_uid: &str,
        file: &Path,
    ) -> Result<ImportSummary, BifrostError> {
        let uid = require_uid(asset_uid)?;
        let destination = self.client.endpoint(&format!("assets/{uid}/"));
        let form = import_form(
            file,
            &[
                ("library", "false"),
                ("destination", destination.as_str()),
                ("assetUid", uid),
            ],
        )
        .await?;
        info!(asset = uid, file = %file.display(), "updating form");
        let report = self.run_import(form).await?;
        let result: ImportResult = decode_payload(&report)?;

        let messages = result.messages;
        let updated = messages
            .updated
            .into_iter()
            .chain(messages.created)
            .next()
            .ok_or_else(|| {
                BifrostError::ImportRejected(format!(
                    "the server reported no updated asset for {uid}"
                ))
            })?;

        Ok(ImportSummary {
            asset_uid: updated.uid,
            owner: updated.owner,
            action: ImportAction::Updated,
            polls: report.polls,
            duration_ms: report.duration_ms,
        })
    }

    /// Make the asset's current version live for data collection.
    pub async fn deploy_form(&self, asset_uid: &str) -> Result<DeploymentSummary, BifrostError> {
        let uid = require_uid(asset_uid)?;
        let url = self.client.endpoint(&format!("assets/{uid}/deployment/"));
        info!(asset = uid, "deploying form");

        let response = self
            .client
            .send_json::<DeploymentResponse>(
                Method::POST,
                &url,
                RequestBody::Json(json!({"active": true})),
            )
            .await;

        match response {
            Ok(deployment) => Ok(deployment.into()),
            Err(TransportError::Status { status: 404, .. }) => Err(Precondition::AssetNotFound {
                asset_uid: uid.to_string(),
            }
            .into()),
            Err(TransportError::Status { status, body }) if is_state_conflict(status) => {
                Err(self.deploy_rejection(uid, status, &body).await)
            }
            Err(err) => Err(err.into()),
        }
    }

    /// Create a form and deploy it. Nothing is deployed when the import fails.
    pub async fn create_and_deploy(&self, file: &Path) -> Result<PublishSummary, BifrostError> {
        let import = self.create_form(file).await?;
        let deployment = self
            .deploy_form(&import.asset_uid)
            .await
            .inspect_err(|err| {
                warn!(asset = %import.asset_uid, error = %err, "form created but not deployed");
            })?;
        Ok(PublishSummary { import, deployment })
    }

    /// Update a form and redeploy it. Nothing is redeployed when the import fails.
    pub async fn update_and_redeploy(
        &self,
        asset_uid: &str,
        file: &Path,
    ) -> Result<PublishSummary, BifrostError> {
        let import = self.update_form(asset_uid, file).await?;
        let deployment = self
            .redeploy_form(&import.asset_uid)
            .await
            .inspect_err(|err| {
                warn!(asset = %import.asset_uid, error = %err, "form updated but not redeployed");
            })?;
        Ok(PublishSummary { import, deployment })
    }

    /// A rejected deploy means "already deployed" only when the asset says so.
    /// Any other rejection is reported with the server's reason.
    async fn deploy_rejection(&self, uid: &str, status: u16, body: &str) -> BifrostError {
        let detail = server_message(body);
        let asset_url = self.client.endpoint(&format!("assets/{uid}/"));
        match self.client.get_json::<FormAsset>(&asset_url).await {
            Ok(asset) if asset.is_deployed() => Precondition::AlreadyDeployed {
                asset_uid: uid.to_string(),
                detail,
            }
            .into(),
            Ok(_) => rejection(status, detail),
            Err(err) => {
                warn!(asset = uid, error = %err, "could not check deployment state");
                rejection(status, detail)
            }
        }
    }

    /// Deploy the asset's latest saved version over an existing deployment.
    pub async fn redeploy_form(&self, asset_uid: &str) -> Result<DeploymentSummary, BifrostError> {
        let uid = require_uid(asset_uid)?;
        let asset_url = self.client.endpoint(&format!("assets/{uid}/"));
        let asset: FormAsset = self
            .client
            .get_json(&asset_url)
            .await
            .map_err(|err| not_found_as(err, || asset_not_found(uid)))?;

        if !asset.is_deployed() {
            return Err(Precondition::NotYetDeployed {
                asset_uid: uid.to_string(),
            }
            .into());
        }

        let version_id = asset.version_id.ok_or_else(|| TransportError::Decode {
            url: asset_url.clone(),
            message: "asset has no version_id".to_string(),
        })?;
        info!(asset = uid, version = %version_id, "redeploying form");

        let url = self.client.endpoint(&format!("assets/{uid}/deployment/"));
        let response = self
            .client
            .send_json::<DeploymentResponse>(
                Method::PATCH,
                &url,
                RequestBody::Json(json!({"version_id": version_id, "active": true})),
            )
            .await;

        match response {
            Ok(deployment) => Ok(deployment.into()),
            Err(TransportError::Status { status: 404, .. }) => Err(Precondition::NotYetDeployed {
                asset_uid: uid.to_string(),
            }
            .into()),
            Err(TransportError::Status { status, body }) => {
                Err(rejection(status, server_message(&body)))
            }
            Err(err) => Err(err.into()),
        }
    }

    /// Delete an asset. An asset the server does not know is reported, not an error.
    pub async fn delete_form(&self, asset_uid: &str) -> Result<DeleteSummary, BifrostError> {
        let uid = require_uid(asset_uid)?;
        let url = self.client.endpoint(&format!("assets/{uid}/"));

        let existed = match self
            .client
            .send(Method::DELETE, &url, RequestBody::Empty, &[])
            .await
        {
            Ok(_) => true,
            Err(TransportError::Status { status: 404, .. }) => {
                warn!(asset = uid, "asset to delete does not exist");
                false
            }
            Err(err) => return Err(err.into()),
        };

        info!(asset = uid, existed, "delete finished");
        Ok(DeleteSummary {
            asset_uid: uid.to_string(),
            existed,
        })
    }

    /// Export collected submissions and download the file to `destination`.
    pub async fn export_data(
        &self,
        asset_uid: &str,
        spec: &ExportSpec,
        destination: &Path,
    ) -> Result<ExportSummary, BifrostError> {
        let uid = require_uid(asset_uid)?;
        check_destination(destination)?;

        let url = self.client.endpoint(&format!("assets/{uid}/exports/"));
        let body = RequestBody::Json(serde_json::to_value(spec)?);
        info!(asset = uid, format = ?spec.format, "starting export");

        let response = self
            .client
            .send(Method::POST, &url, body, JSON_FORMAT)
            .await
            .map_err(|err| not_found_as(err, || asset_not_found(uid)))?;
        let handle = accept_job(JobKind::Export, &url, response).await?;
        let report = self.poller().wait(handle).await?;

        let result: ExportResult = decode_payload(&report)?;
        let download_url = result
            .result
            .filter(|url| !url.is_empty())
            .ok_or_else(|| {
                JobFailure::Malformed("completed export has no result URL".to_string())
            })?;

        let bytes = self.client.download(&download_url, destination).await?;
        info!(asset = uid, bytes, path = %destination.display(), "export downloaded");

        Ok(ExportSummary {
            asset_uid: uid.to_string(),
            path: destination.to_path_buf(),
            bytes,
            download_url,
            polls: report.polls,
        })
    }

    async fn run_import(&self, form: Form) -> Result<JobReport, BifrostError> {
        let url = self.client.endpoint("imports/");
        let response = self
            .client
            .send(Method::POST, &url, RequestBody::Multipart(form), JSON_FORMAT)
            .await?;
        let handle = accept_job(JobKind::Import, &url, response).await?;
        Ok(self.poller().wait(handle).await?)
    }
}

/// A rejected deployment change that says something about the asset's state,
/// as opposed to authentication or a missing resource.
fn is_state_conflict(status: u16) -> bool {
    (400..500).contains(&status) && !matches!(status, 401 | 403 | 404)
}

fn rejection(status: u16, detail: String) -> BifrostError {
    TransportError::Status {
        status,
        body: detail,
    }
    .into()
}

fn asset_not_found(uid: &str) -> BifrostError {
    Precondition::AssetNotFound {
        asset_uid: uid.to_string(),
    }
    .into()
}

fn not_found_as(err: TransportError, missing: impl FnOnce() -> BifrostError) -> BifrostError {
    match err {
        TransportError::Status { status: 404, .. } => missing(),
        other => other.into(),
    }
}

/// Turn a submission response into a handle. Only 201 starts a job.
async fn accept_job(
    kind: JobKind,
    url: &str,
    response: Response,
) -> Result<JobHandle, BifrostError> {
    let status = response.status();
    if status != StatusCode::CREATED {
        return Err(JobFailure::NotAccepted {
            status: status.as_u16(),
        }
        .into());
    }
    let accepted: JobAccepted = read_json(url, response).await?;
    info!(%kind, url = %accepted.url, status = ?accepted.status, "job accepted");
    Ok(JobHandle::new(kind, accepted.url))
}

fn decode_payload<T: DeserializeOwned>(report: &JobReport) -> Result<T, BifrostError> {
    serde_json::from_value(report.payload.clone()).map_err(|err| {
        TransportError::Decode {
            url: report.handle.url().to_string(),
            message: err.to_string(),
        }
        .into()
    })
}

/// Multipart body for `POST /imports/`. The file is checked before anything
/// goes over the network.
async fn import_form(file: &Path, fields: &[(&str, &str)]) -> Result<Form, BifrostError> {
    match tokio::fs::metadata(file).await {
        Ok(meta) if meta.is_file() => {}
        Ok(_) => {
            return Err(BifrostError::Validation(format!(
                "{} is not a file",
                file.display()
            )));
        }
        Err(err) if err.kind() == ErrorKind::NotFound => {
            return Err(BifrostError::Validation(format!(
                "form file not found: {}",
                file.display()
            )));
        }
        Err(err) => return Err(BifrostError::io(file, err)),
    }

    let contents = tokio::fs::read(file)
        .await
        .map_err(|err| BifrostError::io(file, err))?;
    let file_name = file
        .file_name()
        .and_then(|name| name.to_str())
        .unwrap_or("form.xlsx")
        .to_string();

    let mut form = Form::new();
    for (name, value) in fields {
        form = form.text(name.to_string(), value.to_string());
    }
    Ok(form.part("file", Part::bytes(contents).file_name(file_name)))
}

fn check_destination(destination: &Path) -> Result<(), BifrostError> {
    if destination.is_dir() {
        return Err(BifrostError::Validation(format!(
            "export destination {} is a directory",
            destination.display()
        )));
    }
    let parent = destination
        .parent()
        .filter(|parent| !parent.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    if !parent.is_dir() {
        return Err(BifrostError::Validation(format!(
            "export directory {} does not exist",
            parent.display()
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::FailureKind;
    use crate::kobo::ExportFormat;
    use crate::operations::test_support::{api, manager_for};
    use serde_json::json;
    use std::io::Write;
    use wiremock::matchers::{body_partial_json, body_string_contains, method, path, path_regex};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn form_file() -> tempfile::NamedTempFile {
        let mut file = tempfile::Builder::new().suffix(".xlsx").tempfile().unwrap();
        file.write_all(b"PK\x03\x04 fake xlsform").unwrap();
        file
    }

    fn deployed_asset(uid: &str) -> serde_json::Value {
        json!({
            "uid": uid,
            "name": "Household survey",
            "deployment_status": "deployed",
            "version_id": "v2",
            "deployed_version_id": "v2",
            "has_deployment": true,
            "deployment__submission_count": 12,
            "deployment__links": {"url": "https://ee.example.org/x/abc"}
        })
    }

    async fn mount_import(server: &MockServer, final_payload: serde_json::Value) {
        Mock::given(method("POST"))
            .and(path("/api/v2/imports/"))
            .respond_with(ResponseTemplate::new(201).set_body_json(json!({
                "url": api(server, "imports/iXyz/"),
                "status": "created"
            })))
            .expect(1)
            .mount(server)
            .await;
        Mock::given(method("GET"))
            .and(path("/api/v2/imports/iXyz/"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"status": "processing"})))
            .up_to_n_times(1)
            .mount(server)
            .await;
        Mock::given(method("GET"))
            .and(path("/api/v2/imports/iXyz/"))
            .respond_with(ResponseTemplate::new(200).set_body_json(final_payload))
            .mount(server)
            .await;
    }

    #[tokio::test]
    async fn list_follows_pagination() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/v2/assets/"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "next": api(&server, "assets/page2/"),
                "results": [{"uid": "a1", "name": "One", "deployment_status": "draft"}]
            })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/api/v2/assets/page2/"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "next": null,
                "results": [deployed_asset("a2")]
            })))
            .mount(&server)
            .await;

        let assets = manager_for(&server).list_assets().await.unwrap();
        let uids: Vec<_> = assets.iter().map(|a| a.uid.as_str()).collect();
        assert_eq!(uids, vec!["a1", "a2"]);
        assert_eq!(assets[1].submission_count, 12);
    }

    #[tokio::test]
    async fn create_polls_until_complete() {
        let server = MockServer::start().await;
        mount_import(
            &server,
            json!({
                "status": "complete",
                "messages": {"created": [{"uid": "aNew", "kind": "asset", "owner__username": "maria"}]}
            }),
        )
        .await;

        let file = form_file();
        let summary = manager_for(&server).create_form(file.path()).await.unwrap();
        assert_eq!(summary.asset_uid, "aNew");
        assert_eq!(summary.owner.as_deref(), Some("maria"));
        assert_eq!(summary.action, ImportAction::Created);
        assert_eq!(summary.polls, 2);
    }

    #[tokio::test]
    async fn create_sends_library_flag_and_file() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/v2/imports/"))
            .and(body_string_contains("name=\"library\""))
            .and(body_string_contains("name=\"file\""))
            .respond_with(ResponseTemplate::new(201).set_body_json(json!({
                "url": api(&server, "imports/i1/")
            })))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/api/v2/imports/i1/"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "status": "complete",
                "messages": {"created": [{"uid": "a1"}]}
            })))
            .mount(&server)
            .await;

        let file = form_file();
        let summary = manager_for(&server).create_form(file.path()).await.unwrap();
        assert_eq!(summary.asset_uid, "a1");
        assert_eq!(summary.owner, None);
    }

    #[tokio::test]
    async fn create_with_no_created_entries_is_rejected() {
        let server = MockServer::start().await;
        mount_import(
            &server,
            json!({"status": "complete", "messages": {"created": []}}),
        )
        .await;

        let file = form_file();
        let err = manager_for(&server)
            .create_form(file.path())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), FailureKind::ImportRejected);
    }

    #[tokio::test]
    async fn create_with_missing_file_never_touches_network() {
        let server = MockServer::start().await;
        Mock::given(wiremock::matchers::any())
            .respond_with(ResponseTemplate::new(500))
            .expect(0)
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let err = manager_for(&server)
            .create_form(&dir.path().join("missing.xlsx"))
            .await
            .unwrap_err();
        assert!(matches!(err, BifrostError::Validation(_)));
    }

    #[tokio::test]
    async fn import_not_accepted_with_201_fails() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/v2/imports/"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"url": "x"})))
            .mount(&server)
            .await;

        let file = form_file();
        let err = manager_for(&server)
            .create_form(file.path())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            BifrostError::Job(JobFailure::NotAccepted { status: 200 })
        ));
    }

    #[tokio::test]
    async fn failed_import_reports_server_error() {
        let server = MockServer::start().await;
        mount_import(
            &server,
            json!({"status": "error", "messages": {"error": "Invalid XLSForm"}}),
        )
        .await;

        let file = form_file();
        let err = manager_for(&server)
            .create_form(file.path())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), FailureKind::JobFailed);
        assert!(err.to_string().contains("Invalid XLSForm"));
    }

    #[tokio::test]
    async fn update_targets_existing_asset() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/v2/imports/"))
            .and(body_string_contains("name=\"assetUid\""))
            .and(body_string_contains("assets/aOld/"))
            .respond_with(ResponseTemplate::new(201).set_body_json(json!({
                "url": api(&server, "imports/iUp/")
            })))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/api/v2/imports/iUp/"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "status": "complete",
                "messages": {"updated": [{"uid": "aOld", "owner__username": "li"}]}
            })))
            .mount(&server)
            .await;

        let file = form_file();
        let summary = manager_for(&server)
            .update_form("aOld", file.path())
            .await
            .unwrap();
        assert_eq!(summary.asset_uid, "aOld");
        assert_eq!(summary.action, ImportAction::Updated);
    }

    #[tokio::test]
    async fn update_without_asset_in_messages_is_rejected() {
        let server = MockServer::start().await;
        mount_import(
            &server,
            json!({"status": "complete", "messages": {"audit_log": []}}),
        )
        .await;

        let file = form_file();
        let err = manager_for(&server)
            .update_form("aOld", file.path())
            .await
            .unwrap_err();
        assert!(matches!(err, BifrostError::ImportRejected(_)));
        assert!(err.to_string().contains("aOld"));
    }

    fn mount_deployment(server: &MockServer, uid: &str) -> Mock {
        Mock::given(method("POST"))
            .and(path(format!("/api/v2/assets/{uid}/deployment/")))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "active": true,
                "version_id": "v2",
                "asset": deployed_asset(uid)
            })))
    }

    #[tokio::test]
    async fn create_and_deploy_deploys_created_asset() {
        let server = MockServer::start().await;
        mount_import(
            &server,
            json!({"status": "complete", "messages": {"created": [{"uid": "aNew"}]}}),
        )
        .await;
        mount_deployment(&server, "aNew").expect(1).mount(&server).await;

        let file = form_file();
        let summary = manager_for(&server)
            .create_and_deploy(file.path())
            .await
            .unwrap();
        assert_eq!(summary.import.asset_uid, "aNew");
        assert_eq!(summary.deployment.asset_uid, "aNew");
        assert_eq!(summary.deployment.deployment_status, DeploymentStatus::Deployed);
    }

    #[tokio::test]
    async fn failed_create_is_never_deployed() {
        let server = MockServer::start().await;
        mount_import(
            &server,
            json!({"status": "error", "messages": {"error": "Invalid XLSForm"}}),
        )
        .await;
        Mock::given(method("POST"))
            .and(path_regex(r"/deployment/$"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;

        let file = form_file();
        let err = manager_for(&server)
            .create_and_deploy(file.path())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), FailureKind::JobFailed);
    }

    #[tokio::test]
    async fn failed_update_is_never_redeployed() {
        let server = MockServer::start().await;
        mount_import(
            &server,
            json!({"status": "error", "messages": {"error": "Invalid XLSForm"}}),
        )
        .await;
        Mock::given(method("PATCH"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/api/v2/assets/aOld/"))
            .respond_with(ResponseTemplate::new(200).set_body_json(deployed_asset("aOld")))
            .expect(0)
            .mount(&server)
            .await;

        let file = form_file();
        let err = manager_for(&server)
            .update_and_redeploy("aOld", file.path())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), FailureKind::JobFailed);
    }

    #[tokio::test]
    async fn deploy_returns_deployment_details() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/v2/assets/aDep/deployment/"))
            .and(body_partial_json(json!({"active": true})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "active": true,
                "version_id": "v2",
                "asset": deployed_asset("aDep")
            })))
            .expect(1)
            .mount(&server)
            .await;

        let summary = manager_for(&server).deploy_form("aDep").await.unwrap();
        assert_eq!(summary.deployment_status, DeploymentStatus::Deployed);
        assert_eq!(
            summary.collection_url.as_deref(),
            Some("https://ee.example.org/x/abc")
        );
        assert!(summary.active);
    }

    #[tokio::test]
    async fn deploy_of_deployed_asset_is_already_deployed() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/v2/assets/aDep/deployment/"))
            .respond_with(
                ResponseTemplate::new(400)
                    .set_body_json(json!({"detail": "This form is already deployed."})),
            )
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/api/v2/assets/aDep/"))
            .respond_with(ResponseTemplate::new(200).set_body_json(deployed_asset("aDep")))
            .expect(1)
            .mount(&server)
            .await;

        let err = manager_for(&server).deploy_form("aDep").await.unwrap_err();
        match err {
            BifrostError::Precondition(Precondition::AlreadyDeployed { asset_uid, detail }) => {
                assert_eq!(asset_uid, "aDep");
                assert_eq!(detail, "This form is already deployed.");
            }
            other => panic!("expected AlreadyDeployed, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn deploy_auth_failure_stays_transport_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(401).set_body_string("Invalid token."))
            .mount(&server)
            .await;

        let err = manager_for(&server).deploy_form("aDep").await.unwrap_err();
        assert_eq!(err.kind(), FailureKind::Transport);
    }

    #[tokio::test]
    async fn rejected_deploy_of_draft_keeps_server_reason() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/v2/assets/aDraft/deployment/"))
            .respond_with(ResponseTemplate::new(400).set_body_json(
                json!({"detail": "ODK Validate: survey sheet has errors"}),
            ))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/api/v2/assets/aDraft/"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "uid": "aDraft",
                "name": "Draft",
                "deployment_status": "draft",
                "version_id": "v1",
                "has_deployment": false
            })))
            .mount(&server)
            .await;

        let err = manager_for(&server).deploy_form("aDraft").await.unwrap_err();
        assert_eq!(err.kind(), FailureKind::Transport);
        assert!(!matches!(err, BifrostError::Precondition(_)));
        assert_eq!(
            err.to_string(),
            "server returned status 400: ODK Validate: survey sheet has errors"
        );
    }

    #[tokio::test]
    async fn deploy_of_unknown_asset_is_not_found() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/v2/assets/nope/deployment/"))
            .respond_with(ResponseTemplate::new(404).set_body_json(json!({"detail": "Not found."})))
            .mount(&server)
            .await;

        let err = manager_for(&server).deploy_form("nope").await.unwrap_err();
        match err {
            BifrostError::Precondition(Precondition::AssetNotFound { asset_uid }) => {
                assert_eq!(asset_uid, "nope");
            }
            other => panic!("expected AssetNotFound, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn redeploy_patches_current_version() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/v2/assets/aDep/"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "uid": "aDep",
                "name": "Household survey",
                "deployment_status": "deployed",
                "version_id": "v3",
                "deployed_version_id": "v2",
                "has_deployment": true
            })))
            .mount(&server)
            .await;
        Mock::given(method("PATCH"))
            .and(path("/api/v2/assets/aDep/deployment/"))
            .and(body_partial_json(json!({"version_id": "v3", "active": true})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "active": true,
                "version_id": "v3",
                "asset": deployed_asset("aDep")
            })))
            .expect(1)
            .mount(&server)
            .await;

        let summary = manager_for(&server).redeploy_form("aDep").await.unwrap();
        assert_eq!(summary.version_id.as_deref(), Some("v3"));
    }

    #[tokio::test]
    async fn redeploy_of_draft_is_not_yet_deployed() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/v2/assets/aDraft/"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "uid": "aDraft",
                "name": "Draft",
                "deployment_status": "draft",
                "version_id": "v1",
                "has_deployment": false
            })))
            .mount(&server)
            .await;
        Mock::given(method("PATCH"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;

        let err = manager_for(&server)
            .redeploy_form("aDraft")
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            BifrostError::Precondition(Precondition::NotYetDeployed { .. })
        ));
    }

    #[tokio::test]
    async fn rejected_redeploy_of_deployed_asset_keeps_server_reason() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/v2/assets/aDep/"))
            .respond_with(ResponseTemplate::new(200).set_body_json(deployed_asset("aDep")))
            .mount(&server)
            .await;
        Mock::given(method("PATCH"))
            .and(path("/api/v2/assets/aDep/deployment/"))
            .respond_with(ResponseTemplate::new(400).set_body_json(json!({"detail": "bad version"})))
            .expect(1)
            .mount(&server)
            .await;

        let err = manager_for(&server).redeploy_form("aDep").await.unwrap_err();
        assert_eq!(err.kind(), FailureKind::Transport);
        assert!(err.to_string().ends_with("bad version"));
    }

    #[tokio::test]
    async fn redeploy_without_server_deployment_is_not_yet_deployed() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/v2/assets/aDep/"))
            .respond_with(ResponseTemplate::new(200).set_body_json(deployed_asset("aDep")))
            .mount(&server)
            .await;
        Mock::given(method("PATCH"))
            .and(path("/api/v2/assets/aDep/deployment/"))
            .respond_with(ResponseTemplate::new(404).set_body_json(json!({"detail": "Not found."})))
            .mount(&server)
            .await;

        let err = manager_for(&server).redeploy_form("aDep").await.unwrap_err();
        assert!(matches!(
            err,
            BifrostError::Precondition(Precondition::NotYetDeployed { .. })
        ));
    }

    #[tokio::test]
    async fn redeploy_of_unknown_asset_is_not_found() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404).set_body_json(json!({"detail": "Not found."})))
            .mount(&server)
            .await;

        let err = manager_for(&server).redeploy_form("nope").await.unwrap_err();
        assert!(matches!(
            err,
            BifrostError::Precondition(Precondition::AssetNotFound { .. })
        ));
    }

    #[tokio::test]
    async fn delete_reports_missing_asset() {
        let server = MockServer::start().await;
        Mock::given(method("DELETE"))
            .and(path("/api/v2/assets/aHere/"))
            .respond_with(ResponseTemplate::new(204))
            .mount(&server)
            .await;
        Mock::given(method("DELETE"))
            .and(path("/api/v2/assets/aGone/"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let manager = manager_for(&server);
        assert!(manager.delete_form("aHere").await.unwrap().existed);
        assert!(!manager.delete_form("aGone").await.unwrap().existed);
    }

    async fn mount_export(server: &MockServer, download: ResponseTemplate) {
        Mock::given(method("POST"))
            .and(path("/api/v2/assets/aExp/exports/"))
            .and(body_partial_json(json!({"type": "xls", "multiple_select": "both"})))
            .respond_with(ResponseTemplate::new(201).set_body_json(json!({
                "url": api(server, "assets/aExp/exports/eOne/"),
                "status": "created"
            })))
            .expect(1)
            .mount(server)
            .await;
        Mock::given(method("GET"))
            .and(path("/api/v2/assets/aExp/exports/eOne/"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"status": "processing"})))
            .up_to_n_times(1)
            .mount(server)
            .await;
        Mock::given(method("GET"))
            .and(path("/api/v2/assets/aExp/exports/eOne/"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "status": "complete",
                "result": format!("{}/downloads/aExp.xlsx", server.uri())
            })))
            .mount(server)
            .await;
        Mock::given(method("GET"))
            .and(path("/downloads/aExp.xlsx"))
            .respond_with(download)
            .expect(1)
            .mount(server)
            .await;
    }

    fn xls_spec() -> ExportSpec {
        ExportSpec {
            format: ExportFormat::Xls,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn export_downloads_exact_bytes() {
        let content: Vec<u8> = b"PK\x03\x04\x14\x00\x00\x00\x08\x00\xff\xfe\r\n\x00binary"
            .to_vec();
        let server = MockServer::start().await;
        mount_export(
            &server,
            ResponseTemplate::new(200).set_body_bytes(content.clone()),
        )
        .await;

        let dir = tempfile::tempdir().unwrap();
        let destination = dir.path().join("aExp.xlsx");
        let summary = manager_for(&server)
            .export_data("aExp", &xls_spec(), &destination)
            .await
            .unwrap();

        assert_eq!(std::fs::read(&destination).unwrap(), content);
        assert_eq!(summary.bytes, content.len() as u64);
        assert_eq!(summary.polls, 2);
        assert_eq!(summary.path, destination);
    }

    #[tokio::test]
    async fn failed_download_keeps_previous_export() {
        let server = MockServer::start().await;
        mount_export(&server, ResponseTemplate::new(500)).await;

        let dir = tempfile::tempdir().unwrap();
        let destination = dir.path().join("aExp.xlsx");
        std::fs::write(&destination, b"last week's export").unwrap();
        let err = manager_for(&server)
            .export_data("aExp", &xls_spec(), &destination)
            .await
            .unwrap_err();

        assert_eq!(err.kind(), FailureKind::Transport);
        assert_eq!(std::fs::read(&destination).unwrap(), b"last week's export");
        let leftovers: Vec<_> = std::fs::read_dir(dir.path()).unwrap().collect();
        assert_eq!(leftovers.len(), 1);
    }

    #[tokio::test]
    async fn export_into_missing_directory_is_validation_error() {
        let server = MockServer::start().await;
        Mock::given(wiremock::matchers::any())
            .respond_with(ResponseTemplate::new(500))
            .expect(0)
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let err = manager_for(&server)
            .export_data("aExp", &xls_spec(), &dir.path().join("nope").join("x.csv"))
            .await
            .unwrap_err();
        assert!(matches!(err, BifrostError::Validation(_)));
    }

    #[tokio::test]
    async fn completed_export_without_result_is_job_failure() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/v2/assets/aExp/exports/"))
            .respond_with(ResponseTemplate::new(201).set_body_json(json!({
                "url": api(&server, "assets/aExp/exports/eTwo/")
            })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/api/v2/assets/aExp/exports/eTwo/"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!({"status": "complete", "result": null})),
            )
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let err = manager_for(&server)
            .export_data("aExp", &ExportSpec::default(), &dir.path().join("out.csv"))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), FailureKind::JobFailed);
    }

    #[test]
    fn state_conflict_excludes_auth_and_missing() {
        assert!(is_state_conflict(400));
        assert!(is_state_conflict(409));
        assert!(!is_state_conflict(401));
        assert!(!is_state_conflict(403));
        assert!(!is_state_conflict(404));
        assert!(!is_state_conflict(500));
    }
}
