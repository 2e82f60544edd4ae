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

//! OAuth 2.0 device-authorization flow (RFC 8628).
//!
//! The relay runs inside a host application with no browser of its own:
//! it shows the user a code and a verification URL, then polls the token
//! endpoint until the user approves the device.

use serde::Deserialize;
use tokio::time::{sleep, Duration, Instant};

use crate::config::DeviceAuthConfig;
use crate::{Result, SignalingError};

const DEVICE_GRANT_TYPE: &str = "urn:ietf:params:oauth:grant-type:device_code";
const DEFAULT_POLL_INTERVAL_SECS: u64 = 5;
/// Added to the poll interval on a `slow_down` response, per the RFC.
const SLOW_DOWN_BACKOFF_SECS: u64 = 5;

fn default_interval() -> u64 {
    DEFAULT_POLL_INTERVAL_SECS
}

/// Response from the device-authorization endpoint.
#[derive(Debug, Clone, Deserialize)]
pub struct DeviceCode {
    pub device_code: String,
    /// Short code the user types at the verification URL.
    pub user_code: String,
    pub verification_uri: String,
    #[serde(default)]
    pub verification_uri_complete: Option<String>,
    /// Lifetime of the codes in seconds.
    pub expires_in: u64,
    /// Minimum polling interval in seconds.
    #[serde(default = "default_interval")]
    pub interval: u64,
}

/// Tokens returned once the user approves the device.
#[derive(Debug, Clone, Deserialize)]
pub struct TokenSet {
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub expires_in: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct OAuthErrorBody {
    error: String,
    #[serde(default)]
    error_description: Option<String>,
}

/// Client for the device-authorization grant.
#[derive(Debug)]
pub struct DeviceAuth {
    http: reqwest::Client,
    config: DeviceAuthConfig,
}

impl DeviceAuth {
    pub fn new(config: DeviceAuthConfig) -> Self {
        Self {
            http: reqwest::Client::new(),
            config,
        }
    }

    /// Start the flow: ask the authorization server for a device code and
    /// the user-facing verification code.
    pub async fn request_code(&self) -> Result<DeviceCode> {
        let params = [
            ("client_id", self.config.client_id.as_str()),
            ("scope", self.config.scope.as_str()),
        ];
        let response = self
            .http
            .post(&self.config.device_auth_url)
            .form(&params)
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(SignalingError::UnexpectedStatus {
                context: "device authorization endpoint",
                status: status.as_u16(),
                body,
            });
        }

        let code: DeviceCode = response
            .json()
            .await
            .map_err(|_| SignalingError::MalformedResponse("device authorization endpoint"))?;
        log::info!(
            "device login: visit {} and enter code {}",
            code.verification_uri,
            code.user_code
        );
        Ok(code)
    }

    /// Poll the token endpoint until the user approves, the codes expire,
    /// or the user denies the request.
    pub async fn poll_token(&self, code: &DeviceCode) -> Result<TokenSet> {
        let deadline = Instant::now() + Duration::from_secs(code.expires_in);
        let mut interval = Duration::from_secs(code.interval.max(1));

        loop {
            sleep(interval).await;
            if Instant::now() >= deadline {
                return Err(SignalingError::AuthorizationExpired);
            }

            let params = [
                ("grant_type", DEVICE_GRANT_TYPE),
                ("device_code", code.device_code.as_str()),
                ("client_id", self.config.client_id.as_str()),
            ];
            let response = self
                .http
                .post(&self.config.token_url)
                .form(&params)
                .send()
                .await?;
            let status = response.status();
            let body = response.text().await?;

            if status.is_success() {
                return serde_json::from_str(&body)
                    .map_err(|_| SignalingError::MalformedResponse("token endpoint"));
            }

            let error: OAuthErrorBody = serde_json::from_str(&body)
                .map_err(|_| SignalingError::MalformedResponse("token endpoint"))?;
            match error.error.as_str() {
                "authorization_pending" => continue,
                "slow_down" => {
                    interval += Duration::from_secs(SLOW_DOWN_BACKOFF_SECS);
                    log::debug!("token endpoint asked to slow down, interval now {interval:?}");
                }
                "expired_token" => return Err(SignalingError::AuthorizationExpired),
                "access_denied" => return Err(SignalingError::AuthorizationDenied),
                _ => {
                    log::error!(
                        "token endpoint error: {} ({})",
                        error.error,
                        error.error_description.as_deref().unwrap_or("no description")
                    );
                    return Err(SignalingError::UnexpectedStatus {
                        context: "token endpoint",
                        status: status.as_u16(),
                        body,
                    });
                }
            }
        }
    }

    /// Exchange a refresh token for a fresh access token.
    pub async fn refresh(&self, refresh_token: &str) -> Result<TokenSet> {
        let params = [
            ("grant_type", "refresh_token"),
            ("refresh_token", refresh_token),
            ("client_id", self.config.client_id.as_str()),
        ];
        let response = self
            .http
            .post(&self.config.token_url)
            .form(&params)
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(SignalingError::UnexpectedStatus {
                context: "token endpoint",
                status: status.as_u16(),
                body,
            });
        }
        response
            .json()
            .await
            .map_err(|_| SignalingError::MalformedResponse("token endpoint"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn device_code_defaults_the_poll_interval() {
        let code: DeviceCode = serde_json::from_value(json!({
            "device_code": "dc_abc",
            "user_code": "WDJB-MJHT",
            "verification_uri": "https://auth.example.com/activate",
            "expires_in": 900,
        }))
        .unwrap();
        assert_eq!(code.interval, 5);
        assert!(code.verification_uri_complete.is_none());
    }

    #[test]
    fn token_set_tolerates_missing_optional_fields() {
        let tokens: TokenSet = serde_json::from_value(json!({
            "access_token": "at_xyz",
        }))
        .unwrap();
        assert!(tokens.refresh_token.is_none());
        assert!(tokens.expires_in.is_none());
    }

    #[test]
    fn error_body_parses_pending_state() {
        let error: OAuthErrorBody = serde_json::from_value(json!({
            "error": "authorization_pending",
        }))
        .unwrap();
        assert_eq!(error.error, "authorization_pending");
        assert!(error.error_description.is_none());
    }
}
