//! Persisted entity model
//!
//! Every entity serializes to JSON with camelCase field names, matching the
//! documents the platform services exchange. All metadata entities carry an
//! immutable opaque id (UUID), a `created` timestamp set once, and a
//! `modified` timestamp refreshed on every write.

pub mod device;
pub mod event;
pub mod kv;
pub mod notify;
pub mod reading;
pub mod registration;
pub mod schedule;

pub use device::{AdminState, Device, DeviceProfile, DeviceService, OperatingState, ProvisionWatcher};
pub use event::Event;
pub use kv::{Kv, KvItem, StoredData};
pub use notify::{
    Notification, NotificationSeverity, NotificationStatus, Subscription, Transmission,
    TransmissionStatus,
};
pub use reading::{BaseReading, BinaryReading, ObjectReading, Reading, SimpleReading};
pub use registration::{HealthCheck, Registration};
pub use schedule::{Interval, IntervalAction};

use chrono::Utc;

/// Current wall-clock time in Unix milliseconds, the resolution used for
/// `created`/`modified` stamps and index scores
pub fn make_timestamp() -> i64 {
    Utc::now().timestamp_millis()
}

/// Current wall-clock time in Unix nanoseconds, the resolution used for
/// event and reading origins
pub fn make_origin_timestamp() -> i64 {
    Utc::now()
        .timestamp_nanos_opt()
        .unwrap_or_else(|| Utc::now().timestamp_millis() * 1_000_000)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timestamp_resolutions() {
        let ms = make_timestamp();
        let ns = make_origin_timestamp();
        // Nanosecond stamps are ~1e6 larger than millisecond stamps
        assert!(ns / 1_000_000 >= ms - 1_000);
    }
}
