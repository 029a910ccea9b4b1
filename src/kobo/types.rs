//! Schema-checked structures for the KoboToolbox v2 REST API.
//!
//! Responses are decoded into these types at the client boundary, so a
//! malformed server answer fails with a decode error instead of surfacing as a
//! missing key deep inside an operation.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Deployment state of an asset as reported by the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeploymentStatus {
    Draft,
    Deployed,
    Archived,
}

impl fmt::Display for DeploymentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeploymentStatus::Draft => write!(f, "draft"),
            DeploymentStatus::Deployed => write!(f, "deployed"),
            DeploymentStatus::Archived => write!(f, "archived"),
        }
    }
}

/// Links published for a deployed form.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeploymentLinks {
    /// Public Enketo URL for data collection.
    #[serde(default)]
    pub url: Option<String>,
}

/// A form definition plus its deployment metadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FormAsset {
    pub uid: String,
    #[serde(default)]
    pub name: String,
    pub deployment_status: DeploymentStatus,
    /// Latest saved version; `None` only for assets that never had content.
    #[serde(default)]
    pub version_id: Option<String>,
    /// Version currently live for data collection, if any.
    #[serde(default)]
    pub deployed_version_id: Option<String>,
    #[serde(default)]
    pub has_deployment: bool,
    #[serde(rename = "deployment__submission_count", default)]
    pub submission_count: u64,
    #[serde(rename = "deployment__links", default)]
    pub links: Option<DeploymentLinks>,
}

impl FormAsset {
    /// Whether the asset has ever been deployed.
    pub fn is_deployed(&self) -> bool {
        self.has_deployment || self.deployed_version_id.is_some()
    }

    /// Public collection link, if the server reported one.
    pub fn collection_url(&self) -> Option<&str> {
        self.links.as_ref().and_then(|l| l.url.as_deref())
    }
}

/// One page of `GET /assets/`.
#[derive(Debug, Clone, Deserialize)]
pub struct AssetPage {
    #[serde(default)]
    pub next: Option<String>,
    pub results: Vec<FormAsset>,
}

/// Body returned by the deployment endpoint on POST and PATCH.
#[derive(Debug, Clone, Deserialize)]
pub struct DeploymentResponse {
    #[serde(default)]
    pub active: bool,
    #[serde(default)]
    pub version_id: Option<String>,
    pub asset: FormAsset,
}

/// Answer to a job submission (import or export): where to poll.
#[derive(Debug, Clone, Deserialize)]
pub struct JobAccepted {
    pub url: String,
    #[serde(default)]
    pub status: Option<String>,
}

/// An asset entry inside an import's `messages` block.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImportedAsset {
    pub uid: String,
    #[serde(rename = "owner__username", default)]
    pub owner: Option<String>,
    #[serde(default)]
    pub kind: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ImportMessages {
    #[serde(default)]
    pub created: Vec<ImportedAsset>,
    #[serde(default)]
    pub updated: Vec<ImportedAsset>,
}

/// Completed import status payload.
#[derive(Debug, Clone, Deserialize)]
pub struct ImportResult {
    #[serde(default)]
    pub messages: ImportMessages,
}

/// Completed export status payload.
#[derive(Debug, Clone, Deserialize)]
pub struct ExportResult {
    /// Download URL of the materialised file.
    #[serde(default)]
    pub result: Option<String>,
}

/// Output file format of an export.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExportFormat {
    Csv,
    Xls,
}

impl ExportFormat {
    /// File extension of the downloaded file.
    pub fn extension(self) -> &'static str {
        match self {
            ExportFormat::Csv => "csv",
            ExportFormat::Xls => "xlsx",
        }
    }
}

/// How select-multiple questions are laid out in the export.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MultipleSelect {
    Both,
    Summary,
    Details,
}

/// Export settings posted to `/assets/{uid}/exports/`. The server interprets
/// them; the client only forwards them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExportSpec {
    #[serde(rename = "type")]
    pub format: ExportFormat,
    /// Restrict the export to these question names. Empty means all.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub fields: Vec<String>,
    pub fields_from_all_versions: bool,
    pub group_sep: String,
    pub hierarchy_in_labels: bool,
    pub lang: String,
    pub multiple_select: MultipleSelect,
    pub include_media_url: bool,
    pub xls_types_as_text: bool,
}

impl Default for ExportSpec {
    fn default() -> Self {
        Self {
            format: ExportFormat::Csv,
            fields: Vec::new(),
            fields_from_all_versions: true,
            group_sep: "/".to_string(),
            hierarchy_in_labels: false,
            lang: "_default".to_string(),
            multiple_select: MultipleSelect::Both,
            include_media_url: true,
            xls_types_as_text: false,
        }
    }
}

/// Body of `POST /assets/{uid}/permission-assignments/`.
#[derive(Debug, Clone, Serialize)]
pub struct PermissionAssignment<'a> {
    pub user: &'a str,
    pub permission: &'a str,
}
