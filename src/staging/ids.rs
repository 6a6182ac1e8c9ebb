//! Batch and session identifiers.

use std::sync::LazyLock;

use chrono::{DateTime, Utc};
use regex::Regex;

use crate::error::{GazetteerError, Result};

static IDENTIFIER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9_.:-]{1,64}$").unwrap());

fn generate(prefix: char, at: DateTime<Utc>) -> String {
    let random = uuid::Uuid::new_v4().simple().to_string();
    format!("{}{}-{}", prefix, at.format("%Y%m%d%H%M%S"), &random[..8])
}

/// `B<yyyymmddHHMMSS>-<8 hex>`.
pub fn new_batch_id(at: DateTime<Utc>) -> String {
    generate('B', at)
}

/// `S<yyyymmddHHMMSS>-<8 hex>`.
pub fn new_session_id(at: DateTime<Utc>) -> String {
    generate('S', at)
}

/// Accept an operator-supplied id, or reject it with `InvalidIdentifier`.
pub fn validate_identifier(id: &str) -> Result<&str> {
    if IDENTIFIER.is_match(id) {
        Ok(id)
    } else {
        Err(GazetteerError::InvalidIdentifier(id.to_string()))
    }
}
