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

use thiserror::Error;

/// Result type for signalling operations
pub type Result<T> = std::result::Result<T, SignalingError>;

/// Errors that can occur while talking to the WHIP/WHEP endpoints, the
/// control plane or the authorization server.
#[derive(Error, Debug)]
pub enum SignalingError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Unexpected status {status} from {context}: {body}")]
    UnexpectedStatus {
        context: &'static str,
        status: u16,
        body: String,
    },

    #[error("Response is missing the Location header")]
    MissingLocation,

    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    #[error("Session has no active resource to operate on")]
    NoActiveSession,

    #[error("Device authorization expired before it was approved")]
    AuthorizationExpired,

    #[error("Device authorization was denied")]
    AuthorizationDenied,

    #[error("Malformed response from {0}")]
    MalformedResponse(&'static str),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}
