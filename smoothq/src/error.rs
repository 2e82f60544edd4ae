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
 *
 * Unless you explicitly state otherwise, any contribution intentionally
 * submitted for inclusion in the work by you, as defined in the Apache-2.0
 * license, shall be dual licensed as above, without any additional terms or
 * conditions.
 */

use thiserror::Error;

/// Result type for smoother operations
pub type Result<T> = std::result::Result<T, SmoothError>;

/// Errors that can occur when setting up a smoothing session.
///
/// Frame-level problems (duplicates, reordering, oversized arrival gaps)
/// are recovered in place and surfaced through the statistics counters
/// instead of an error channel.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SmoothError {
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}
