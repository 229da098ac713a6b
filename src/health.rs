use crate::types::{Health, HeartbeatLeaf};

/// Lowest status counted as healthy.
pub const HEALTHY_MIN: i64 = 200;
/// First status past the healthy range.
pub const HEALTHY_END: i64 = 400;

/// The only place a heartbeat status is turned into a health verdict.
pub fn classify(leaf: &HeartbeatLeaf) -> Health {
    classify_status(leaf.status)
}

pub fn classify_status(status: i64) -> Health {
    if (HEALTHY_MIN..HEALTHY_END).contains(&status) {
        Health::Healthy
    } else {
        Health::Unhealthy
    }
}
