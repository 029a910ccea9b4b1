//! Configuração do Bifrost carregada a partir de `config.toml`.
//!
//! A struct [`BifrostConfig`] contém todos os parâmetros configuráveis.
//! Chaves ausentes no arquivo usam os defaults. As variáveis de ambiente
//! `KOBO_API_KEY` e `KOBO_API_BASE_URL` têm precedência sobre o arquivo.
//! As operações nunca leem o arquivo; recebem [`Credentials`] e valores
//! simples resolvidos aqui.

use std::fmt;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::ValueEnum;
use reqwest::Url;
use serde::{Deserialize, Serialize};

use crate::error::BifrostError;

pub const API_KEY_ENV: &str = "KOBO_API_KEY";
pub const API_URL_ENV: &str = "KOBO_API_BASE_URL";

/// Configuração de nível superior armazenada em `config.toml`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BifrostConfig {
    /// URL base da API, por exemplo `https://kf.kobotoolbox.org/api/v2/`.
    #[serde(default)]
    pub api_url: String,

    /// Token de API da conta.
    #[serde(default)]
    pub api_key: String,

    /// Diretório onde as exportações são gravadas quando não há caminho de saída.
    #[serde(default = "default_downloads_dir")]
    pub downloads_dir: PathBuf,

    /// Segundos entre duas consultas de status de uma importação ou exportação.
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,

    /// Desiste de esperar um job após esta quantidade de segundos. Sem limite quando ausente.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub poll_timeout_secs: Option<u64>,

    /// URL do usuário que recebe permissão de envio anônimo, por exemplo
    /// `https://kf.example.org/api/v2/users/AnonymousUser/`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub anonymous_user_url: Option<String>,

    /// URL da permissão de adicionar envios, por exemplo
    /// `https://kf.example.org/api/v2/permissions/add_submissions/`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub add_submissions_permission_url: Option<String>,
}

fn default_downloads_dir() -> PathBuf {
    PathBuf::from(".")
}

fn default_poll_interval_secs() -> u64 {
    10
}

impl Default for BifrostConfig {
    fn default() -> Self {
        Self {
            api_url: String::new(),
            api_key: String::new(),
            downloads_dir: default_downloads_dir(),
            poll_interval_secs: default_poll_interval_secs(),
            poll_timeout_secs: None,
            anonymous_user_url: None,
            add_submissions_permission_url: None,
        }
    }
}

/// Chaves aceitas por `bifrost config set`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ConfigKey {
    ApiUrl,
    ApiKey,
    DownloadsDir,
    PollIntervalSecs,
    PollTimeoutSecs,
    AnonymousUserUrl,
    AddSubmissionsPermissionUrl,
}

impl BifrostConfig {
    /// Local padrão: `<diretório de config>/bifrost/config.toml`.
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("bifrost").join("config.toml"))
    }

    /// Carrega o arquivo em `path`, usando os defaults quando ele não existe,
    /// e aplica as variáveis de ambiente.
    pub fn load(path: &Path) -> Result<Self> {
        let mut config = Self::read(path)?;
        config.apply_env(|name| std::env::var(name).ok());
        Ok(config)
    }

    /// Carrega o arquivo em `path` sem consultar o ambiente.
    pub fn read(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file {}", path.display()))?;
        toml::from_str(&contents)
            .with_context(|| format!("invalid config TOML at {}", path.display()))
    }

    /// Substitui valores do arquivo por variáveis de ambiente não vazias.
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(key) = lookup(API_KEY_ENV).filter(|v| !v.is_empty()) {
            self.api_key = key;
        }
        if let Some(url) = lookup(API_URL_ENV).filter(|v| !v.is_empty()) {
            self.api_url = url;
        }
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }
        let contents = toml::to_string_pretty(self).context("failed to encode config")?;
        std::fs::write(path, contents)
            .with_context(|| format!("failed to write config file {}", path.display()))
    }

    pub fn set(&mut self, key: ConfigKey, value: &str) -> Result<()> {
        match key {
            ConfigKey::ApiUrl => self.api_url = value.to_string(),
            ConfigKey::ApiKey => self.api_key = value.to_string(),
            ConfigKey::DownloadsDir => self.downloads_dir = PathBuf::from(value),
            ConfigKey::PollIntervalSecs => {
                self.poll_interval_secs = value
                    .parse()
                    .with_context(|| format!("poll interval must be a number, got {value:?}"))?;
            }
            ConfigKey::PollTimeoutSecs => {
                self.poll_timeout_secs = if value.is_empty() {
                    None
                } else {
                    Some(value.parse().with_context(|| {
                        format!("poll timeout must be a number, got {value:?}")
                    })?)
                };
            }
            ConfigKey::AnonymousUserUrl => self.anonymous_user_url = non_empty(value),
            ConfigKey::AddSubmissionsPermissionUrl => {
                self.add_submissions_permission_url = non_empty(value);
            }
        }
        Ok(())
    }

    /// Cópia segura para exibição: o token fica mascarado.
    pub fn redacted(&self) -> Self {
        let mut copy = self.clone();
        if !copy.api_key.is_empty() {
            copy.api_key = mask(&copy.api_key);
        }
        copy
    }

    pub fn credentials(&self) -> Result<Credentials, BifrostError> {
        Credentials::new(&self.api_url, &self.api_key)
    }
}

fn non_empty(value: &str) -> Option<String> {
    (!value.is_empty()).then(|| value.to_string())
}

fn mask(secret: &str) -> String {
    let tail: String = secret
        .chars()
        .rev()
        .take(4)
        .collect::<Vec<_>>()
        .into_iter()
        .rev()
        .collect();
    format!("****{tail}")
}

/// Endpoint e token do processo atual. Imutável depois de construído.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    base_url: String,
    api_token: String,
}

impl Credentials {
    /// Valida o par. A URL base é normalizada para terminar com `/`.
    pub fn new(base_url: &str, api_token: &str) -> Result<Self, BifrostError> {
        let base_url = base_url.trim();
        if base_url.is_empty() {
            return Err(BifrostError::Config(format!(
                "API URL is not set; run `bifrost config set api-url <url>` or export {API_URL_ENV}"
            )));
        }
        if api_token.trim().is_empty() {
            return Err(BifrostError::Config(format!(
                "API key is not set; run `bifrost config set api-key <token>` or export {API_KEY_ENV}"
            )));
        }

        let parsed = Url::parse(base_url)
            .map_err(|err| BifrostError::Config(format!("invalid API URL {base_url:?}: {err}")))?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(BifrostError::Config(format!(
                "API URL must use http or https, got {base_url:?}"
            )));
        }

        let base_url = if base_url.ends_with('/') {
            base_url.to_string()
        } else {
            format!("{base_url}/")
        };

        Ok(Self {
            base_url,
            api_token: api_token.trim().to_string(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn api_token(&self) -> &str {
        &self.api_token
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("base_url", &self.base_url)
            .field("api_token", &"<redacted>")
            .finish()
    }
}
