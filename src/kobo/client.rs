use std::path::{Path, PathBuf};
use std::time::Duration;

use reqwest::header::{ACCEPT, AUTHORIZATION};
use reqwest::multipart::Form;
use reqwest::{Client, Method, Response};
use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::fs::File;
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};

use super::error::TransportError;
use crate::config::Credentials;
use crate::error::BifrostError;

/// Query string the API needs to answer with JSON instead of the browsable HTML view.
pub const JSON_FORMAT: &[(&str, &str)] = &[("format", "json")];

/// Payload attached to a request.
pub enum RequestBody {
    Empty,
    Json(Value),
    Multipart(Form),
}

/// Authenticated adapter over the KoboToolbox REST API.
///
/// Every request carries the token header. Non-2xx answers are returned as
/// [`TransportError::Status`]; retries are left to callers.
pub struct KoboClient {
    client: Client,
    base_url: String,
    api_token: String,
}

impl KoboClient {
    pub fn new(credentials: &Credentials) -> Result<Self, TransportError> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .timeout(Duration::from_secs(120))
            .build()?;
        Ok(Self {
            client,
            base_url: credentials.base_url().to_string(),
            api_token: credentials.api_token().to_string(),
        })
    }

    /// Absolute URL for a path relative to the API root, e.g. `assets/abc/`.
    pub fn endpoint(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path.trim_start_matches('/'))
    }

    pub async fn send(
        &self,
        method: Method,
        url: &str,
        body: RequestBody,
        query: &[(&str, &str)],
    ) -> Result<Response, TransportError> {
        debug!(%method, url, "sending request");
        let mut request = self
            .client
            .request(method.clone(), url)
            .header(AUTHORIZATION, format!("Token {}", self.api_token))
            .header(ACCEPT, "application/json");

        if !query.is_empty() {
            request = request.query(query);
        }

        request = match body {
            RequestBody::Empty => request,
            RequestBody::Json(value) => request.json(&value),
            RequestBody::Multipart(form) => request.multipart(form),
        };

        let response = request.send().await?;
        let status = response.status();
        debug!(%method, url, status = status.as_u16(), "response received");

        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(TransportError::Status {
                status: status.as_u16(),
                body,
            });
        }

        Ok(response)
    }

    /// Send a request with `format=json` and decode the answer into `T`.
    pub async fn send_json<T: DeserializeOwned>(
        &self,
        method: Method,
        url: &str,
        body: RequestBody,
    ) -> Result<T, TransportError> {
        let response = self.send(method, url, body, JSON_FORMAT).await?;
        read_json(url, response).await
    }

    pub async fn get_json<T: DeserializeOwned>(&self, url: &str) -> Result<T, TransportError> {
        self.send_json(Method::GET, url, RequestBody::Empty).await
    }

    /// Stream the body at `url` into `destination` as raw bytes.
    ///
    /// Chunks go to a hidden sibling file that replaces `destination` only once
    /// the transfer is complete, so an earlier file at that path survives a
    /// failed download.
    pub async fn download(&self, url: &str, destination: &Path) -> Result<u64, BifrostError> {
        let mut response = self.send(Method::GET, url, RequestBody::Empty, &[]).await?;
        let partial = partial_path(destination);

        let finished = match write_chunks(&mut response, &partial).await {
            Ok(bytes) => tokio::fs::rename(&partial, destination)
                .await
                .map(|()| bytes)
                .map_err(|err| BifrostError::io(destination, err)),
            Err(err) => Err(err),
        };

        if let Err(err) = &finished {
            warn!(url, error = %err, "download failed");
            let _ = tokio::fs::remove_file(&partial).await;
        }
        finished
    }
}

fn partial_path(destination: &Path) -> PathBuf {
    let name = destination
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| "download".to_string());
    destination.with_file_name(format!(".{name}.part"))
}

async fn write_chunks(response: &mut Response, path: &Path) -> Result<u64, BifrostError> {
    let mut file = File::create(path)
        .await
        .map_err(|err| BifrostError::io(path, err))?;
    let mut written = 0u64;
    while let Some(chunk) = response.chunk().await.map_err(TransportError::from)? {
        file.write_all(&chunk)
            .await
            .map_err(|err| BifrostError::io(path, err))?;
        written += chunk.len() as u64;
    }
    file.flush()
        .await
        .map_err(|err| BifrostError::io(path, err))?;
    file.sync_all()
        .await
        .map_err(|err| BifrostError::io(path, err))?;
    Ok(written)
}

/// Decode a response body into `T`, reporting schema mismatches as
/// [`TransportError::Decode`].
pub async fn read_json<T: DeserializeOwned>(
    url: &str,
    response: Response,
) -> Result<T, TransportError> {
    let bytes = response.bytes().await?;
    serde_json::from_slice(&bytes).map_err(|err| TransportError::Decode {
        url: url.to_string(),
        message: err.to_string(),
    })
}
