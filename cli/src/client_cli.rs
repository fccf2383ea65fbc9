use base64::{engine::general_purpose::STANDARD, Engine};
use reqwest::{Method, RequestBuilder, Response};
use serde_json::{json, Map, Value};
use std::{io, path::PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("server answered {status}: {body}")]
    Api { status: u16, body: String },
    #[error("could not read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

pub struct ClientCli {
    inner: reqwest::Client,
    base_url: String,
}

/// Connection fields for `start`; unset ones are left to the server.
#[derive(Debug, Default)]
pub struct StartOptions {
    pub livekit_url: Option<String>,
    pub api_key: Option<String>,
    pub api_secret: Option<String>,
    pub room_name: Option<String>,
}

impl StartOptions {
    fn to_body(&self) -> Value {
        let fields = [
            ("livekit_url", &self.livekit_url),
            ("api_key", &self.api_key),
            ("api_secret", &self.api_secret),
            ("room_name", &self.room_name),
        ];
        let body: Map<String, Value> = fields
            .into_iter()
            .filter_map(|(name, value)| value.as_ref().map(|v| (name.to_string(), json!(v))))
            .collect();
        Value::Object(body)
    }
}

impl ClientCli {
    pub fn connect(server: &str) -> Self {
        Self {
            inner: reqwest::Client::new(),
            base_url: server.trim_end_matches('/').to_string(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        self.inner.request(method, self.url(path))
    }

    async fn check(response: Response) -> Result<Response, ClientError> {
        let status = response.status();
        if status.is_success() {
            Ok(response)
        } else {
            let body = response.text().await.unwrap_or_default();
            Err(ClientError::Api {
                status: status.as_u16(),
                body,
            })
        }
    }

    async fn send_json(&self, request: RequestBuilder) -> Result<Value, ClientError> {
        let response = Self::check(request.send().await?).await?;
        Ok(response.json().await?)
    }

    pub async fn health(&self) -> Result<Value, ClientError> {
        self.send_json(self.request(Method::GET, "/health")).await
    }

    pub async fn datasets(&self) -> Result<Value, ClientError> {
        self.send_json(self.request(Method::GET, "/datasets")).await
    }

    pub async fn dataset(&self, dataset_id: &str) -> Result<Value, ClientError> {
        self.send_json(self.request(Method::GET, &format!("/dataset/{dataset_id}")))
            .await
    }

    /// Upload `images` as a new dataset; blocks until preprocessing is done.
    pub async fn upload(
        &self,
        description: &str,
        images: &[PathBuf],
    ) -> Result<Value, ClientError> {
        let mut encoded = Vec::with_capacity(images.len());
        for (index, path) in images.iter().enumerate() {
            let data = tokio::fs::read(path).await.map_err(|source| ClientError::Read {
                path: path.clone(),
                source,
            })?;
            encoded.push(json!({"index": index, "data": STANDARD.encode(data)}));
        }
        let body = json!({"description": description, "images": encoded});
        self.send_json(self.request(Method::POST, "/preprocess").json(&body))
            .await
    }

    pub async fn delete(&self, dataset_id: &str) -> Result<Value, ClientError> {
        self.send_json(self.request(Method::DELETE, &format!("/dataset/{dataset_id}")))
            .await
    }

    pub async fn text_prompt(&self, dataset_id: &str) -> Result<Value, ClientError> {
        self.send_json(self.request(Method::GET, &format!("/dataset/{dataset_id}/text_prompt")))
            .await
    }

    pub async fn set_text_prompt(
        &self,
        dataset_id: &str,
        text_prompt: &str,
    ) -> Result<Value, ClientError> {
        let request = self
            .request(Method::PUT, &format!("/dataset/{dataset_id}/text_prompt"))
            .json(&json!({ "text_prompt": text_prompt }));
        self.send_json(request).await
    }

    pub async fn images(&self, dataset_id: &str) -> Result<Value, ClientError> {
        self.send_json(self.request(Method::GET, &format!("/dataset/{dataset_id}/images")))
            .await
    }

    pub async fn start(
        &self,
        dataset_id: &str,
        options: &StartOptions,
    ) -> Result<Value, ClientError> {
        let request = self
            .request(Method::POST, &format!("/inference/{dataset_id}/start"))
            .json(&options.to_body());
        self.send_json(request).await
    }

    pub async fn stop(&self, dataset_id: &str) -> Result<Value, ClientError> {
        self.send_json(self.request(Method::POST, &format!("/inference/{dataset_id}/stop")))
            .await
    }

    pub async fn status(&self, dataset_id: &str) -> Result<Value, ClientError> {
        self.send_json(self.request(Method::GET, &format!("/inference/{dataset_id}/status")))
            .await
    }

    pub async fn list(&self) -> Result<Value, ClientError> {
        self.send_json(self.request(Method::GET, "/inference/list")).await
    }

    pub async fn log(&self, dataset_id: &str) -> Result<String, ClientError> {
        let response = self
            .request(Method::GET, &format!("/inference/{dataset_id}/log"))
            .send()
            .await?;
        Ok(Self::check(response).await?.text().await?)
    }
}
