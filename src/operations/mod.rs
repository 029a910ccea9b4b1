//! Form lifecycle and permission operations.
//!
//! Each operation is a short pipeline over [`KoboClient`] and, for imports and
//! exports, [`JobPoller`]. Operations return typed summaries or a
//! [`BifrostError`]; rendering is left to the caller.

mod forms;
mod permissions;

pub use forms::{
    DeleteSummary, DeploymentSummary, ExportSummary, ImportAction, ImportSummary, PublishSummary,
};
pub use permissions::{PermissionChange, PermissionSummary};

use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::error::BifrostError;
use crate::job::{JobPoller, PollSettings};
use crate::kobo::KoboClient;

/// URLs the server expects in an anonymous-submission permission assignment.
/// They differ between deployments, so they come from configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PermissionUrls {
    pub anonymous_user: Option<String>,
    pub add_submissions: Option<String>,
}

/// Entry point for every server-side operation of one invocation.
pub struct FormManager {
    client: KoboClient,
    poll: PollSettings,
    cancel: CancellationToken,
    permission_urls: PermissionUrls,
}

impl FormManager {
    pub fn new(client: KoboClient, poll: PollSettings) -> Self {
        Self {
            client,
            poll,
            cancel: CancellationToken::new(),
            permission_urls: PermissionUrls::default(),
        }
    }

    /// Token that aborts any job wait in progress when cancelled.
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn with_permission_urls(mut self, urls: PermissionUrls) -> Self {
        self.permission_urls = urls;
        self
    }

    fn poller(&self) -> JobPoller<'_> {
        JobPoller::new(&self.client, self.poll).with_cancellation(self.cancel.clone())
    }
}

fn require_uid(asset_uid: &str) -> Result<&str, BifrostError> {
    let uid = asset_uid.trim();
    if uid.is_empty() || uid.contains('/') {
        return Err(BifrostError::Validation(format!(
            "invalid asset id {asset_uid:?}"
        )));
    }
    Ok(uid)
}

/// Short reason from an error body: the `detail` field of a JSON body when
/// present, the trimmed text otherwise.
fn server_message(body: &str) -> String {
    if let Ok(Value::Object(map)) = serde_json::from_str::<Value>(body) {
        if let Some(Value::String(detail)) = map.get("detail") {
            return detail.clone();
        }
    }
    let trimmed = body.trim();
    if trimmed.is_empty() {
        "no response body".to_string()
    } else {
        trimmed.to_string()
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn server_message_prefers_detail_field() {
        assert_eq!(
            server_message(r#"{"detail": "The form is already deployed."}"#),
            "The form is already deployed."
        );
        assert_eq!(server_message("  plain text \n"), "plain text");
        assert_eq!(server_message(""), "no response body");
        assert_eq!(server_message(r#"["x"]"#), r#"["x"]"#);
    }

    #[test]
    fn require_uid_rejects_blank_and_paths() {
        assert_eq!(require_uid(" aBc ").unwrap(), "aBc");
        assert!(matches!(require_uid(""), Err(BifrostError::Validation(_))));
        assert!(matches!(
            require_uid("a/../b"),
            Err(BifrostError::Validation(_))
        ));
    }
}
