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

//! Signalling and control-plane collaborators for the frame relay.
//!
//! Everything here is a single HTTP round trip away from the remote
//! transformation service: WHIP to push the outgoing stream, WHEP to pull
//! the transformed one back, a small control plane to create streams and
//! retune them live, and an OAuth device-login flow for hosts without a
//! browser.

pub mod auth;
pub mod config;
pub mod control;
pub mod error;
mod sdp;
pub mod whep;
pub mod whip;

pub use auth::{DeviceAuth, DeviceCode, TokenSet};
pub use config::{DeviceAuthConfig, SignalingConfig};
pub use control::{ControlClient, StreamHandle};
pub use error::{Result, SignalingError};
pub use whep::WhepClient;
pub use whip::WhipClient;
