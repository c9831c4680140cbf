//! Structural checks on inbound JSON frames.
//!
//! Runs before a frame is parsed into a `ClientMessage`, so oversized or
//! hostile payloads never reach a room.

use super::SecurityError;
use crate::config::SecurityConfig;
use serde_json::Value;

/// Substrings that are never legitimate in a display name or answer.
const SCRIPT_PATTERNS: &[&str] = &[
    "<script",
    "javascript:",
    "data:text/html",
    "vbscript:",
    "onload=",
    "onerror=",
    "onclick=",
    "document.cookie",
];

/// Validates a text frame against the configured limits.
pub fn validate_json_message(message: &[u8], config: &SecurityConfig) -> Result<(), SecurityError> {
    if message.len() > config.max_message_size {
        return Err(SecurityError::MessageTooLarge(message.len()));
    }

    let json: Value = serde_json::from_slice(message)
        .map_err(|e| SecurityError::InvalidMessageFormat(e.to_string()))?;
    validate_json_value(&json, 0, config)
}

fn validate_json_value(value: &Value, depth: usize, config: &SecurityConfig) -> Result<(), SecurityError> {
    if depth > config.max_json_depth {
        return Err(SecurityError::InvalidMessageFormat("JSON nesting too deep".to_string()));
    }

    match value {
        Value::String(s) => validate_string(s, config),
        Value::Array(items) => {
            if items.len() > config.max_collection_size {
                return Err(SecurityError::InvalidMessageFormat(format!(
                    "Array too large: {} elements",
                    items.len()
                )));
            }
            items
                .iter()
                .try_for_each(|item| validate_json_value(item, depth + 1, config))
        }
        Value::Object(fields) => {
            if fields.len() > config.max_collection_size {
                return Err(SecurityError::InvalidMessageFormat(format!(
                    "Object too large: {} keys",
                    fields.len()
                )));
            }
            for (key, field) in fields {
                validate_string(key, config)?;
                validate_json_value(field, depth + 1, config)?;
            }
            Ok(())
        }
        Value::Number(_) | Value::Bool(_) | Value::Null => Ok(()),
    }
}

fn validate_string(s: &str, config: &SecurityConfig) -> Result<(), SecurityError> {
    let len = s.chars().count();
    if len > config.max_string_length {
        return Err(SecurityError::InvalidMessageFormat(format!(
            "String too long: {len} characters"
        )));
    }
    if s.contains('\0') {
        return Err(SecurityError::MaliciousContent);
    }

    let lower = s.to_lowercase();
    if SCRIPT_PATTERNS.iter().any(|pattern| lower.contains(pattern)) {
        return Err(SecurityError::MaliciousContent);
    }
    Ok(())
}
