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

//! WHIP client: push the encoded stream to the transformation service.

use crate::sdp::SdpEndpoint;
use crate::Result;

/// WebRTC-HTTP Ingestion Protocol client for one outgoing stream.
#[derive(Debug)]
pub struct WhipClient {
    endpoint: SdpEndpoint,
}

impl WhipClient {
    pub fn new(endpoint_url: &str, auth_token: Option<String>) -> Result<Self> {
        Ok(Self {
            endpoint: SdpEndpoint::new("WHIP endpoint", endpoint_url, auth_token)?,
        })
    }

    /// Send the local SDP offer; returns the service's answer.
    pub async fn publish(&mut self, offer_sdp: &str) -> Result<String> {
        log::debug!("publishing WHIP offer ({} bytes)", offer_sdp.len());
        self.endpoint.exchange(offer_sdp).await
    }

    /// Close the ingest session.
    pub async fn teardown(&mut self) -> Result<()> {
        self.endpoint.teardown().await
    }

    /// URL of the live session resource, if one exists.
    pub fn resource_url(&self) -> Option<&str> {
        self.endpoint.resource_url()
    }
}
