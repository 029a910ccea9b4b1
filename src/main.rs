mod cli;
mod config;
mod error;
mod job;
mod kobo;
mod operations;
mod ui;

use std::future::Future;
use std::path::Path;
use std::process::ExitCode;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use cli::{Cli, Command, ConfigAction};
use config::BifrostConfig;
use error::{BifrostError, Outcome};
use job::PollSettings;
use kobo::KoboClient;
use operations::{FormManager, PermissionUrls};
use tokio_util::sync::CancellationToken;
use tracing::warn;
use tracing_subscriber::EnvFilter;
use ui::{Printer, Report};

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match run(cli).await {
        Ok(code) => ExitCode::from(code),
        Err(err) => {
            eprintln!("error: {err:#}");
            ExitCode::from(2)
        }
    }
}

fn init_tracing(verbose: bool) {
    let default_filter = if verbose { "bifrost=debug" } else { "warn" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| default_filter.into()),
        )
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

async fn run(cli: Cli) -> Result<u8> {
    let config_path = match &cli.config {
        Some(path) => path.clone(),
        None => BifrostConfig::default_path()
            .context("could not determine the configuration directory; pass --config")?,
    };
    let printer = Printer::new(cli.json);

    if let Command::Config { action } = &cli.command {
        config_command(action, &config_path, &printer)?;
        return Ok(0);
    }

    let config = BifrostConfig::load(&config_path)?;
    let cancel = CancellationToken::new();
    let manager = match build_manager(&cli, &config, cancel.clone()) {
        Ok(manager) => manager,
        Err(err) => return Ok(printer.error(&err)),
    };
    watch_interrupt(cancel);

    let code = match cli.command {
        Command::List => {
            perform(&printer, "Listing forms", manager.list_assets())
                .await
                .exit_code()
        }
        Command::Create { file, deploy: true } => perform(
            &printer,
            "Importing and deploying form",
            manager.create_and_deploy(&file),
        )
        .await
        .exit_code(),
        Command::Create { file, deploy: false } => {
            perform(&printer, "Importing form", manager.create_form(&file))
                .await
                .exit_code()
        }
        Command::Update {
            asset_id,
            file,
            redeploy: true,
        } => perform(
            &printer,
            "Importing and redeploying form",
            manager.update_and_redeploy(&asset_id, &file),
        )
        .await
        .exit_code(),
        Command::Update {
            asset_id,
            file,
            redeploy: false,
        } => perform(
            &printer,
            "Importing form",
            manager.update_form(&asset_id, &file),
        )
        .await
        .exit_code(),
        Command::Deploy { asset_id } => {
            perform(&printer, "Deploying form", manager.deploy_form(&asset_id))
                .await
                .exit_code()
        }
        Command::Redeploy { asset_id } => {
            perform(&printer, "Redeploying form", manager.redeploy_form(&asset_id))
                .await
                .exit_code()
        }
        Command::Delete { asset_id } => {
            perform(&printer, "Deleting form", manager.delete_form(&asset_id))
                .await
                .exit_code()
        }
        Command::Export(args) => {
            let spec = args.spec();
            let destination = args.destination(&config.downloads_dir);
            perform(
                &printer,
                "Exporting data",
                manager.export_data(&args.asset_id, &spec, &destination),
            )
            .await
            .exit_code()
        }
        Command::SubmitWithoutAuth { asset_id } => perform(
            &printer,
            "Updating permissions",
            manager.allow_anonymous_submissions(&asset_id),
        )
        .await
        .exit_code(),
        Command::ClonePermissions {
            target_id,
            source_id,
        } => perform(
            &printer,
            "Cloning permissions",
            manager.clone_permissions(&target_id, &source_id),
        )
        .await
        .exit_code(),
        Command::Config { .. } => 0,
    };

    Ok(code)
}

fn build_manager(
    cli: &Cli,
    config: &BifrostConfig,
    cancel: CancellationToken,
) -> Result<FormManager, BifrostError> {
    let credentials = config.credentials()?;
    let client = KoboClient::new(&credentials)?;
    let poll = PollSettings {
        interval: Duration::from_secs(
            cli.poll_interval
                .unwrap_or(config.poll_interval_secs)
                .max(1),
        ),
        timeout: cli
            .timeout
            .or(config.poll_timeout_secs)
            .map(Duration::from_secs),
    };

    Ok(FormManager::new(client, poll)
        .with_cancellation(cancel)
        .with_permission_urls(PermissionUrls {
            anonymous_user: config.anonymous_user_url.clone(),
            add_submissions: config.add_submissions_permission_url.clone(),
        }))
}

/// First Ctrl-C cancels any job wait in progress; a second one exits at once.
fn watch_interrupt(cancel: CancellationToken) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_err() {
            return;
        }
        warn!("interrupt received, cancelling");
        cancel.cancel();
        if tokio::signal::ctrl_c().await.is_ok() {
            std::process::exit(130);
        }
    });
}

async fn perform<T, F>(printer: &Printer, message: &str, operation: F) -> Outcome<T>
where
    T: Report,
    F: Future<Output = Result<T, BifrostError>>,
{
    let progress = printer.progress(message);
    let outcome = Outcome::from(operation.await);
    progress.finish();
    printer.outcome(&outcome);
    outcome
}

fn config_command(action: &ConfigAction, path: &Path, printer: &Printer) -> Result<()> {
    match action {
        ConfigAction::Set { key, value } => {
            let mut config = BifrostConfig::read(path)?;
            config.set(*key, value)?;
            config.save(path)?;
            let name = key
                .to_possible_value()
                .map(|v| v.get_name().to_string())
                .unwrap_or_else(|| format!("{key:?}"));
            printer.note(&format!("saved {name} to {}", path.display()));
        }
        ConfigAction::Show => {
            let config = BifrostConfig::load(path)?.redacted();
            println!("{}", toml::to_string_pretty(&config)?);
        }
        ConfigAction::Path => println!("{}", path.display()),
    }
    Ok(())
}
