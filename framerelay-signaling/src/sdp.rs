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

//! Shared HTTP machinery for the WHIP and WHEP endpoints.
//!
//! Both protocols are the same single round trip: POST an SDP offer,
//! receive an SDP answer plus a Location header naming the session
//! resource, and DELETE that resource to hang up.

use reqwest::header::{CONTENT_TYPE, LOCATION};
use url::Url;

use crate::{Result, SignalingError};

const SDP_CONTENT_TYPE: &str = "application/sdp";

/// Resolve a Location header against the endpoint it came from; servers
/// may return an absolute URL or a path relative to the endpoint.
pub(crate) fn resolve_location(endpoint: &Url, location: &str) -> Result<Url> {
    Ok(endpoint.join(location)?)
}

/// One WHIP- or WHEP-style endpoint with at most one live session.
#[derive(Debug)]
pub(crate) struct SdpEndpoint {
    http: reqwest::Client,
    endpoint: Url,
    auth_token: Option<String>,
    resource_url: Option<Url>,
    context: &'static str,
}

impl SdpEndpoint {
    pub fn new(context: &'static str, endpoint: &str, auth_token: Option<String>) -> Result<Self> {
        Ok(Self {
            http: reqwest::Client::new(),
            endpoint: Url::parse(endpoint)?,
            auth_token,
            resource_url: None,
            context,
        })
    }

    /// POST the offer and return the answer. The session resource from the
    /// Location header is retained for [`teardown`](Self::teardown).
    pub async fn exchange(&mut self, offer_sdp: &str) -> Result<String> {
        let mut request = self
            .http
            .post(self.endpoint.clone())
            .header(CONTENT_TYPE, SDP_CONTENT_TYPE)
            .body(offer_sdp.to_string());
        if let Some(token) = &self.auth_token {
            request = request.bearer_auth(token);
        }

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(SignalingError::UnexpectedStatus {
                context: self.context,
                status: status.as_u16(),
                body,
            });
        }

        let location = response
            .headers()
            .get(LOCATION)
            .and_then(|value| value.to_str().ok())
            .ok_or(SignalingError::MissingLocation)?;
        let resource = resolve_location(&self.endpoint, location)?;
        log::info!("{} session created at {resource}", self.context);
        self.resource_url = Some(resource);

        Ok(response.text().await?)
    }

    /// DELETE the session resource.
    pub async fn teardown(&mut self) -> Result<()> {
        let resource = self
            .resource_url
            .take()
            .ok_or(SignalingError::NoActiveSession)?;

        let mut request = self.http.delete(resource.clone());
        if let Some(token) = &self.auth_token {
            request = request.bearer_auth(token);
        }

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(SignalingError::UnexpectedStatus {
                context: self.context,
                status: status.as_u16(),
                body,
            });
        }
        log::info!("{} session at {resource} closed", self.context);
        Ok(())
    }

    pub fn resource_url(&self) -> Option<&str> {
        self.resource_url.as_ref().map(|url| url.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn relative_locations_resolve_against_the_endpoint() {
        let endpoint = Url::parse("https://svc.example.com/whip/abc").unwrap();
        let resolved = resolve_location(&endpoint, "/sessions/42").unwrap();
        assert_eq!(resolved.as_str(), "https://svc.example.com/sessions/42");

        let resolved = resolve_location(&endpoint, "sessions/42").unwrap();
        assert_eq!(resolved.as_str(), "https://svc.example.com/whip/sessions/42");
    }

    #[test]
    fn absolute_locations_pass_through() {
        let endpoint = Url::parse("https://svc.example.com/whip").unwrap();
        let resolved =
            resolve_location(&endpoint, "https://other.example.com/sessions/9").unwrap();
        assert_eq!(resolved.as_str(), "https://other.example.com/sessions/9");
    }

    #[tokio::test]
    async fn teardown_without_a_session_is_rejected() {
        let mut endpoint = SdpEndpoint::new("whip", "https://svc.example.com/whip", None).unwrap();
        let err = endpoint.teardown().await;
        assert!(matches!(err, Err(SignalingError::NoActiveSession)));
    }

    #[test]
    fn invalid_endpoint_url_is_rejected() {
        assert!(SdpEndpoint::new("whip", "not a url", None).is_err());
    }
}
