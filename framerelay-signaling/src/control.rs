/*
 * Copyright 2025 Security Union LLC
 *
 * Licensed under either of
 *
 * * Apache License, Version 2.0
 *   (http://www.apache.org/licenses/LICENSE-2.0)
 * * MIT license
 *   (http://opensource.org/licenses/MIT)
 *
 * at your option.
 */

//! Control-plane client for the transformation service: create a stream,
//! retune its parameters while it runs, tear it down.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use url::Url;

use crate::{Result, SignalingError};

#[derive(Debug, Serialize)]
struct CreateStreamRequest<'a> {
    pipeline_id: &'a str,
    params: &'a Value,
}

#[derive(Debug, Serialize)]
struct UpdateParamsRequest<'a> {
    params: &'a Value,
}

/// A stream created on the service, with the endpoints to push to and
/// pull from.
#[derive(Debug, Clone, Deserialize)]
pub struct StreamHandle {
    pub id: String,
    pub whip_url: String,
    pub whep_url: String,
}

/// HTTP client for the service control plane.
#[derive(Debug)]
pub struct ControlClient {
    http: reqwest::Client,
    base_url: Url,
    auth_token: Option<String>,
}

impl ControlClient {
    pub fn new(base_url: &str, auth_token: Option<String>) -> Result<Self> {
        // A trailing slash keeps Url::join from eating the last path
        // segment of the base.
        let normalized = if base_url.ends_with('/') {
            base_url.to_string()
        } else {
            format!("{base_url}/")
        };
        Ok(Self {
            http: reqwest::Client::new(),
            base_url: Url::parse(&normalized)?,
            auth_token,
        })
    }

    /// Create a stream running `pipeline_id` with the given free-form
    /// transformation parameters.
    pub async fn create_stream(&self, pipeline_id: &str, params: &Value) -> Result<StreamHandle> {
        let url = self.base_url.join("streams")?;
        let body = CreateStreamRequest {
            pipeline_id,
            params,
        };

        let response = self
            .authorized(self.http.post(url))
            .json(&body)
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(SignalingError::UnexpectedStatus {
                context: "control plane (create stream)",
                status: status.as_u16(),
                body,
            });
        }

        let handle: StreamHandle = response
            .json()
            .await
            .map_err(|_| SignalingError::MalformedResponse("control plane (create stream)"))?;
        log::info!("created stream {} on pipeline {pipeline_id}", handle.id);
        Ok(handle)
    }

    /// PATCH the live parameters of a running stream.
    pub async fn update_params(&self, stream_id: &str, params: &Value) -> Result<()> {
        let url = self.base_url.join(&format!("streams/{stream_id}"))?;
        let body = UpdateParamsRequest { params };

        let response = self
            .authorized(self.http.patch(url))
            .json(&body)
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(SignalingError::UnexpectedStatus {
                context: "control plane (update params)",
                status: status.as_u16(),
                body,
            });
        }
        log::debug!("updated params for stream {stream_id}");
        Ok(())
    }

    /// Delete a stream.
    pub async fn delete_stream(&self, stream_id: &str) -> Result<()> {
        let url = self.base_url.join(&format!("streams/{stream_id}"))?;

        let response = self.authorized(self.http.delete(url)).send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(SignalingError::UnexpectedStatus {
                context: "control plane (delete stream)",
                status: status.as_u16(),
                body,
            });
        }
        log::info!("deleted stream {stream_id}");
        Ok(())
    }

    fn authorized(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.auth_token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }
}
