//! Interface de terminal do Bifrost: spinner durante a operação e resumo
//! colorido ao final.
//!
//! Usa as crates `indicatif` para o spinner e `console` para estilização com
//! cores. Com `--json` cada [`Outcome`] vira uma linha JSON e o spinner fica
//! oculto.

use std::time::Duration;

use console::{Style, Term};
use indicatif::{ProgressBar, ProgressStyle};
use serde::Serialize;

use crate::error::{BifrostError, Outcome};
use crate::kobo::FormAsset;
use crate::operations::{
    DeleteSummary, DeploymentSummary, ExportSummary, ImportAction, ImportSummary,
    PermissionChange, PermissionSummary, PublishSummary,
};

/// Representação textual do resultado de uma operação.
pub trait Report: Serialize {
    fn headline(&self) -> String;

    fn details(&self) -> Vec<String> {
        Vec::new()
    }
}

/// Spinner exibido enquanto uma operação está em andamento.
pub struct Progress {
    pb: ProgressBar,
}

impl Progress {
    pub fn finish(&self) {
        self.pb.finish_and_clear();
    }
}

pub struct Printer {
    json: bool,
    green: Style,
    red: Style,
    yellow: Style,
}

impl Printer {
    pub fn new(json: bool) -> Self {
        Self {
            json,
            green: Style::new().green().bold(),
            red: Style::new().red().bold(),
            yellow: Style::new().yellow(),
        }
    }

    /// Inicia um spinner no stderr. Oculto no modo JSON e quando o stderr não é um terminal.
    pub fn progress(&self, message: &str) -> Progress {
        if self.json || !Term::stderr().is_term() {
            return Progress {
                pb: ProgressBar::hidden(),
            };
        }
        let pb = ProgressBar::new_spinner();
        if let Ok(style) = ProgressStyle::default_spinner().template("{spinner:.cyan} {msg} {elapsed:.dim}") {
            pb.set_style(style);
        }
        pb.set_message(message.to_string());
        pb.enable_steady_tick(Duration::from_millis(100));
        Progress { pb }
    }

    pub fn outcome<T: Report>(&self, outcome: &Outcome<T>) {
        if self.json {
            println!("{}", serde_json::to_string(outcome).unwrap_or_default());
            return;
        }
        match outcome {
            Outcome::Success { data } => {
                println!("  {} {}", self.green.apply_to("✓"), data.headline());
                for line in data.details() {
                    println!("    {line}");
                }
            }
            Outcome::Failed { kind, message } => {
                eprintln!("  {} {kind}: {message}", self.red.apply_to("✗"));
            }
        }
    }

    /// Reporta um erro ocorrido antes de qualquer operação começar.
    pub fn error(&self, err: &BifrostError) -> u8 {
        let outcome: Outcome<()> = Outcome::Failed {
            kind: err.kind(),
            message: err.to_string(),
        };
        if self.json {
            println!("{}", serde_json::to_string(&outcome).unwrap_or_default());
        } else {
            eprintln!("  {} {}: {err}", self.red.apply_to("✗"), err.kind());
        }
        outcome.exit_code()
    }

    pub fn note(&self, message: &str) {
        if !self.json {
            eprintln!("  {} {message}", self.yellow.apply_to("•"));
        }
    }
}

fn or_dash(value: Option<&str>) -> &str {
    value.unwrap_or("-")
}

impl Report for ImportSummary {
    fn headline(&self) -> String {
        let verb = match self.action {
            ImportAction::Created => "Created",
            ImportAction::Updated => "Updated",
        };
        format!("{verb} form {}", self.asset_uid)
    }

    fn details(&self) -> Vec<String> {
        vec![
            format!("owner: {}", or_dash(self.owner.as_deref())),
            format!("status checks: {} ({} ms)", self.polls, self.duration_ms),
        ]
    }
}

impl Report for DeploymentSummary {
    fn headline(&self) -> String {
        format!("Form {} is {}", self.asset_uid, self.deployment_status)
    }

    fn details(&self) -> Vec<String> {
        vec![
            format!("name: {}", self.name),
            format!(
                "version: {} (deployed: {})",
                or_dash(self.version_id.as_deref()),
                or_dash(self.deployed_version_id.as_deref())
            ),
            format!("link: {}", or_dash(self.collection_url.as_deref())),
            format!("submissions: {}", self.submission_count),
        ]
    }
}

impl Report for PublishSummary {
    fn headline(&self) -> String {
        format!("{}, {}", self.import.headline(), self.deployment.deployment_status)
    }

    fn details(&self) -> Vec<String> {
        let mut lines = self.import.details();
        lines.extend(self.deployment.details());
        lines
    }
}

impl Report for DeleteSummary {
    fn headline(&self) -> String {
        if self.existed {
            format!("Deleted form {}", self.asset_uid)
        } else {
            format!("Form {} did not exist; nothing deleted", self.asset_uid)
        }
    }
}

impl Report for ExportSummary {
    fn headline(&self) -> String {
        format!("Exported {} to {}", self.asset_uid, self.path.display())
    }

    fn details(&self) -> Vec<String> {
        vec![
            format!("{} bytes", self.bytes),
            format!("source: {}", self.download_url),
        ]
    }
}

impl Report for PermissionSummary {
    fn headline(&self) -> String {
        match &self.change {
            PermissionChange::AnonymousSubmissions => {
                format!("Form {} accepts submissions without login", self.asset_uid)
            }
            PermissionChange::ClonedFrom { source_uid } => {
                format!("Copied permissions of {source_uid} onto {}", self.asset_uid)
            }
        }
    }
}

impl Report for Vec<FormAsset> {
    fn headline(&self) -> String {
        format!("{} forms", self.len())
    }

    fn details(&self) -> Vec<String> {
        if self.is_empty() {
            return Vec::new();
        }
        let width = self
            .iter()
            .map(|a| a.uid.len())
            .chain(["ASSET ID".len()])
            .max()
            .unwrap_or(0);
        let header = format!(
            "{:>3}  {:<width$}  {:<9}  {:>6}  {}",
            "#", "ASSET ID", "STATUS", "SUBS", "NAME"
        );
        let rows = self.iter().enumerate().map(|(index, asset)| {
            format!(
                "{:>3}  {:<width$}  {:<9}  {:>6}  {}",
                index + 1,
                asset.uid,
                asset.deployment_status.to_string(),
                asset.submission_count,
                asset.name,
            )
        });
        std::iter::once(header).chain(rows).collect()
    }
}
