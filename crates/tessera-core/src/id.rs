//! Block ID helpers
//!
//! Block IDs look like `20240101120000-abcdefg`: a 14 digit local timestamp,
//! a dash and seven random lowercase alphanumerics.

use chrono::Local;
use uuid::Uuid;

/// Length of the timestamp prefix
pub const TIMESTAMP_LEN: usize = 14;

/// Generate a fresh block ID
pub fn new_node_id() -> String {
    let suffix: String = Uuid::new_v4().simple().to_string().chars().take(7).collect();
    format!("{}-{}", Local::now().format("%Y%m%d%H%M%S"), suffix)
}

/// Creation timestamp encoded in an ID, empty when the ID has no timestamp
pub fn created_from_id(id: &str) -> String {
    match id.get(..TIMESTAMP_LEN) {
        Some(prefix) if prefix.bytes().all(|b| b.is_ascii_digit()) => prefix.to_string(),
        _ => String::new(),
    }
}

/// Whether a string has the shape of a block ID
pub fn is_node_id(id: &str) -> bool {
    let Some((stamp, suffix)) = id.split_once('-') else {
        return false;
    };
    stamp.len() == TIMESTAMP_LEN
        && stamp.bytes().all(|b| b.is_ascii_digit())
        && suffix.len() == 7
        && suffix
            .bytes()
            .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit())
}
