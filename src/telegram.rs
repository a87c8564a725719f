//! Telegram Bot API transport behind [`ChatClient`].
//!
//! Every call is `POST {base}/bot{token}/{method}`. Text calls send JSON; file calls stream the
//! file as multipart form data and advance the upload's progress bar as chunks leave.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::TryStreamExt;
use reqwest::multipart::{Form, Part};
use reqwest::{Body, StatusCode};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::json;
use tokio::sync::Semaphore;
use tokio_util::io::ReaderStream;
use tracing::{debug, info};
use zip_sender_core::contract::{
    ChatClient, ChatId, ChatInfo, ClientError, FileUpload, Identity, MediaKind,
};

/// Used when a 429 carries neither `parameters.retry_after` nor a `Retry-After` header.
const FALLBACK_RETRY_AFTER: Duration = Duration::from_secs(1);

pub struct BotApiClient {
    http: reqwest::Client,
    base_url: String,
    token: String,
    permits: Arc<Semaphore>,
}

impl std::fmt::Debug for BotApiClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BotApiClient")
            .field("base_url", &self.base_url)
            .field("permits", &self.permits.available_permits())
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Deserialize)]
struct ApiResponse<T> {
    ok: bool,
    result: Option<T>,
    error_code: Option<i64>,
    description: Option<String>,
    parameters: Option<ResponseParameters>,
}

#[derive(Debug, Deserialize)]
struct ResponseParameters {
    retry_after: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct User {
    id: i64,
    first_name: String,
    username: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Chat {
    id: i64,
    #[serde(rename = "type")]
    kind: String,
    title: Option<String>,
    username: Option<String>,
}

impl BotApiClient {
    /// `max_concurrent` caps in-flight file transmissions; values below 1 are treated as 1.
    pub fn new(base_url: &str, token: &str, max_concurrent: usize) -> Result<Self, ClientError> {
        let http = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| ClientError::Transport(e.without_url().to_string()))?;
        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            token: token.to_string(),
            permits: Arc::new(Semaphore::new(max_concurrent.max(1))),
        })
    }

    fn method_url(&self, method: &str) -> String {
        format!("{}/bot{}/{}", self.base_url, self.token, method)
    }

    async fn call<T: DeserializeOwned>(
        &self,
        method: &str,
        body: serde_json::Value,
    ) -> Result<T, ClientError> {
        debug!(method, "Calling Bot API");
        let response = self
            .http
            .post(self.method_url(method))
            .json(&body)
            .send()
            .await
            .map_err(transport)?;
        decode(response).await
    }

    async fn call_multipart<T: DeserializeOwned>(
        &self,
        method: &str,
        form: Form,
    ) -> Result<T, ClientError> {
        debug!(method, "Calling Bot API with multipart body");
        let response = self
            .http
            .post(self.method_url(method))
            .multipart(form)
            .send()
            .await
            .map_err(transport)?;
        decode(response).await
    }
}

// The request URL embeds the token, so it is stripped before the error is surfaced.
fn transport(e: reqwest::Error) -> ClientError {
    ClientError::Transport(e.without_url().to_string())
}

async fn decode<T: DeserializeOwned>(response: reqwest::Response) -> Result<T, ClientError> {
    let status = response.status();
    let header_retry = response
        .headers()
        .get(reqwest::header::RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<u64>().ok());
    let bytes = response.bytes().await.map_err(transport)?;

    let envelope: ApiResponse<T> = match serde_json::from_slice(&bytes) {
        Ok(envelope) => envelope,
        Err(_) if status == StatusCode::TOO_MANY_REQUESTS => {
            return Err(ClientError::RateLimited {
                retry_after: header_retry
                    .map(Duration::from_secs)
                    .unwrap_or(FALLBACK_RETRY_AFTER),
            });
        }
        Err(e) => {
            let text = String::from_utf8_lossy(&bytes);
            return Err(ClientError::Api {
                code: i64::from(status.as_u16()),
                description: if text.trim().is_empty() {
                    e.to_string()
                } else {
                    text.into_owned()
                },
            });
        }
    };

    if envelope.ok {
        return envelope.result.ok_or_else(|| ClientError::Api {
            code: i64::from(status.as_u16()),
            description: "response marked ok but carried no result".to_string(),
        });
    }

    Err(map_api_error(
        status,
        envelope.error_code,
        envelope.description.unwrap_or_default(),
        envelope
            .parameters
            .and_then(|p| p.retry_after)
            .or(header_retry),
    ))
}

fn map_api_error(
    status: StatusCode,
    error_code: Option<i64>,
    description: String,
    retry_after: Option<u64>,
) -> ClientError {
    let code = error_code.unwrap_or_else(|| i64::from(status.as_u16()));
    if code == 429 || retry_after.is_some() {
        return ClientError::RateLimited {
            retry_after: retry_after
                .map(Duration::from_secs)
                .unwrap_or(FALLBACK_RETRY_AFTER),
        };
    }
    match code {
        401 => ClientError::Unauthorized(description),
        400 if description.to_ascii_lowercase().contains("chat not found") => {
            ClientError::ChatNotFound(description)
        }
        _ => ClientError::Api { code, description },
    }
}

async fn file_part(upload: &FileUpload) -> Result<Part, ClientError> {
    let io_error = |source| ClientError::Io {
        path: upload.path.clone(),
        source,
    };
    let file = tokio::fs::File::open(&upload.path).await.map_err(io_error)?;
    let len = file.metadata().await.map_err(io_error)?.len();

    let bar = upload.progress.clone();
    let stream = ReaderStream::new(file).inspect_ok(move |chunk| bar.inc(chunk.len() as u64));
    Ok(Part::stream_with_length(Body::wrap_stream(stream), len).file_name(upload.file_name.clone()))
}

#[async_trait]
impl ChatClient for BotApiClient {
    async fn get_me(&self) -> Result<Identity, ClientError> {
        let user: User = self.call("getMe", json!({})).await?;
        Ok(Identity {
            id: user.id,
            first_name: user.first_name,
            username: user.username,
        })
    }

    async fn get_chat(&self, chat_ref: &str) -> Result<ChatInfo, ClientError> {
        let chat: Chat = self.call("getChat", json!({ "chat_id": chat_ref })).await?;
        Ok(ChatInfo {
            id: chat.id,
            title: chat.title,
            username: chat.username,
            kind: chat.kind,
        })
    }

    async fn send_message(&self, chat: &ChatId, text: &str) -> Result<(), ClientError> {
        let _: serde_json::Value = self
            .call(
                "sendMessage",
                json!({ "chat_id": chat.as_str(), "text": text, "parse_mode": "HTML" }),
            )
            .await?;
        Ok(())
    }

    async fn send_file(&self, chat: &ChatId, upload: FileUpload) -> Result<(), ClientError> {
        let _permit = self
            .permits
            .acquire()
            .await
            .map_err(|e| ClientError::Transport(e.to_string()))?;

        let part = file_part(&upload).await?;
        let form = Form::new().text("chat_id", chat.as_str().to_string());
        let (method, form) = match upload.kind {
            MediaKind::Photo => {
                let form = form.part("photo", part);
                let form = match upload.caption {
                    Some(caption) => form.text("caption", caption),
                    None => form,
                };
                ("sendPhoto", form)
            }
            MediaKind::Sticker => ("sendSticker", form.part("sticker", part)),
            MediaKind::Document => (
                "sendDocument",
                form.part("document", part)
                    .text("disable_content_type_detection", "true"),
            ),
        };

        info!(method, file = %upload.file_name, "Uploading file");
        let _: serde_json::Value = self.call_multipart(method, form).await?;
        Ok(())
    }
}
