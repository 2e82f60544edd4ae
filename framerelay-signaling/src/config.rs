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

//! Signalling configuration loaded from environment variables.

use std::env;

/// Configuration for the relay's signalling side.
#[derive(Debug, Clone)]
pub struct SignalingConfig {
    /// Base URL of the transformation service control plane
    /// (e.g. "https://api.example.com/v1/").
    pub control_api_url: String,
    /// Pipeline to instantiate when creating a stream.
    pub pipeline_id: String,
    /// Device-login configuration. `None` if `OAUTH_CLIENT_ID` is unset or
    /// empty, in which case a static `RELAY_API_TOKEN` is used instead.
    pub oauth: Option<DeviceAuthConfig>,
    /// Static bearer token, used when no OAuth client is configured.
    pub api_token: Option<String>,
}

/// OAuth 2.0 device-authorization-grant configuration.
#[derive(Debug, Clone)]
pub struct DeviceAuthConfig {
    pub client_id: String,
    pub device_auth_url: String,
    pub token_url: String,
    pub scope: String,
}

impl SignalingConfig {
    /// Load configuration from environment variables.
    ///
    /// # Required
    /// - `RELAY_CONTROL_API_URL`
    ///
    /// # Optional
    /// - `RELAY_PIPELINE_ID` (default: `"default"`)
    /// - `RELAY_API_TOKEN`
    /// - OAuth: `OAUTH_CLIENT_ID`, `OAUTH_DEVICE_AUTH_URL`,
    ///   `OAUTH_TOKEN_URL`, `OAUTH_SCOPE`
    pub fn from_env() -> Result<Self, String> {
        let control_api_url = env::var("RELAY_CONTROL_API_URL")
            .map_err(|_| "RELAY_CONTROL_API_URL environment variable is required")?;
        let pipeline_id =
            env::var("RELAY_PIPELINE_ID").unwrap_or_else(|_| "default".to_string());
        let api_token = env::var("RELAY_API_TOKEN").ok().filter(|s| !s.is_empty());

        let oauth = env::var("OAUTH_CLIENT_ID")
            .ok()
            .filter(|s| !s.is_empty())
            .map(|client_id| {
                Ok::<_, String>(DeviceAuthConfig {
                    client_id,
                    device_auth_url: env::var("OAUTH_DEVICE_AUTH_URL")
                        .map_err(|_| "OAUTH_DEVICE_AUTH_URL required when OAUTH_CLIENT_ID is set")?,
                    token_url: env::var("OAUTH_TOKEN_URL")
                        .map_err(|_| "OAUTH_TOKEN_URL required when OAUTH_CLIENT_ID is set")?,
                    scope: env::var("OAUTH_SCOPE")
                        .unwrap_or_else(|_| "openid offline_access".to_string()),
                })
            })
            .transpose()?;

        Ok(Self {
            control_api_url,
            pipeline_id,
            oauth,
            api_token,
        })
    }
}
