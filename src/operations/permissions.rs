use reqwest::{Method, StatusCode};
use serde::Serialize;
use serde_json::json;
use tracing::info;

use super::{FormManager, require_uid, server_message};
use crate::error::BifrostError;
use crate::kobo::client::JSON_FORMAT;
use crate::kobo::types::PermissionAssignment;
use crate::kobo::{RequestBody, TransportError};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "change", rename_all = "snake_case")]
pub enum PermissionChange {
    AnonymousSubmissions,
    ClonedFrom { source_uid: String },
}

#[derive(Debug, Clone, Serialize)]
pub struct PermissionSummary {
    pub asset_uid: String,
    #[serde(flatten)]
    pub change: PermissionChange,
}

impl FormManager {
    /// Let anyone submit data to the asset without logging in.
    pub async fn allow_anonymous_submissions(
        &self,
        asset_uid: &str,
    ) -> Result<PermissionSummary, BifrostError> {
        let uid = require_uid(asset_uid)?;
        let user = self
            .permission_urls
            .anonymous_user
            .as_deref()
            .ok_or_else(|| missing_setting("anonymous-user-url"))?;
        let permission = self
            .permission_urls
            .add_submissions
            .as_deref()
            .ok_or_else(|| missing_setting("add-submissions-permission-url"))?;

        let url = self
            .client
            .endpoint(&format!("assets/{uid}/permission-assignments/"));
        let body = serde_json::to_value(PermissionAssignment { user, permission })?;
        info!(asset = uid, "granting anonymous submissions");

        let response = self
            .client
            .send(Method::POST, &url, RequestBody::Json(body), JSON_FORMAT)
            .await
            .map_err(|err| rejected(uid, err))?;
        expect_status(uid, response.status(), StatusCode::CREATED)?;

        Ok(PermissionSummary {
            asset_uid: uid.to_string(),
            change: PermissionChange::AnonymousSubmissions,
        })
    }

    /// Replace the permissions of `target_uid` with those of `source_uid`.
    pub async fn clone_permissions(
        &self,
        target_uid: &str,
        source_uid: &str,
    ) -> Result<PermissionSummary, BifrostError> {
        let target = require_uid(target_uid)?;
        let source = require_uid(source_uid)?;
        if target == source {
            return Err(BifrostError::Validation(format!(
                "cannot clone permissions of {target} onto itself"
            )));
        }

        let url = self
            .client
            .endpoint(&format!("assets/{target}/permission-assignments/clone/"));
        info!(asset = target, source, "cloning permissions");

        let response = self
            .client
            .send(
                Method::PATCH,
                &url,
                RequestBody::Json(json!({"clone_from": source})),
                JSON_FORMAT,
            )
            .await
            .map_err(|err| rejected(target, err))?;
        expect_status(target, response.status(), StatusCode::OK)?;

        Ok(PermissionSummary {
            asset_uid: target.to_string(),
            change: PermissionChange::ClonedFrom {
                source_uid: source.to_string(),
            },
        })
    }
}

fn missing_setting(key: &str) -> BifrostError {
    BifrostError::Validation(format!(
        "{key} is not configured for this server; run `bifrost config set {key} <url>`"
    ))
}

fn rejected(asset_uid: &str, err: TransportError) -> BifrostError {
    match err {
        TransportError::Status { status, body } => BifrostError::PermissionRejected {
            asset_uid: asset_uid.to_string(),
            status: Some(status),
            detail: server_message(&body),
        },
        other => other.into(),
    }
}

fn expect_status(
    asset_uid: &str,
    actual: StatusCode,
    expected: StatusCode,
) -> Result<(), BifrostError> {
    if actual == expected {
        return Ok(());
    }
    Err(BifrostError::PermissionRejected {
        asset_uid: asset_uid.to_string(),
        status: Some(actual.as_u16()),
        detail: format!("expected status {expected}, got {actual}"),
    })
}
