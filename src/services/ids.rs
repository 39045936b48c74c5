use std::time::{SystemTime, UNIX_EPOCH};

use uuid::Uuid;

/// Collision-resistant identifier for messages and sessions (UUID v4).
pub fn generate_id() -> String {
    Uuid::new_v4().to_string()
}

pub fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
