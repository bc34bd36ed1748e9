//! End-to-end tests against a running Redis
//!
//! These tests need a live server and are ignored by default. Point
//! `EDGESTORE_TEST_REDIS_URL` at a disposable instance and run:
//!
//! ```text
//! cargo test -- --ignored
//! ```
//!
//! Every test namespaces its entity names with a fresh UUID so reruns
//! against a dirty instance stay independent.

use std::collections::HashMap;

use edgestore::config::StoreConfig;
use edgestore::error::StoreError;
use edgestore::model::{
    AdminState, BaseReading, Device, DeviceProfile, DeviceService, Event, KvItem, Notification,
    NotificationSeverity, NotificationStatus, OperatingState, Reading, SimpleReading, Subscription,
    Transmission, TransmissionStatus,
};
use edgestore::store::Store;
use uuid::Uuid;

fn redis_url() -> String {
    std::env::var("EDGESTORE_TEST_REDIS_URL")
        .unwrap_or_else(|_| "redis://127.0.0.1:6379".to_string())
}

async fn open_store() -> Store {
    Store::connect(StoreConfig::with_url(redis_url()))
        .await
        .expect("connect to test Redis")
}

fn unique(name: &str) -> String {
    format!("{}-{}", name, Uuid::new_v4())
}

fn sample_profile(name: &str) -> DeviceProfile {
    DeviceProfile {
        id: String::new(),
        name: name.to_string(),
        description: String::new(),
        manufacturer: "Acme".into(),
        model: "T-1000".into(),
        labels: Vec::new(),
        created: 0,
        modified: 0,
    }
}

fn sample_service(name: &str) -> DeviceService {
    DeviceService {
        id: String::new(),
        name: name.to_string(),
        description: String::new(),
        labels: Vec::new(),
        base_address: "http://localhost:59900".into(),
        admin_state: AdminState::Unlocked,
        created: 0,
        modified: 0,
    }
}

fn sample_device(name: &str, profile: &str, service: &str, labels: Vec<String>) -> Device {
    Device {
        id: String::new(),
        name: name.to_string(),
        description: String::new(),
        admin_state: AdminState::Unlocked,
        operating_state: OperatingState::Up,
        labels,
        service_name: service.to_string(),
        profile_name: profile.to_string(),
        protocols: HashMap::new(),
        created: 0,
        modified: 0,
    }
}

#[tokio::test]
#[ignore = "requires a running Redis"]
async fn device_round_trip_and_uniqueness() {
    let store = open_store().await;

    let profile_name = unique("profile");
    let service_name = unique("service");
    let device_name = unique("device");

    store
        .add_device_profile(sample_profile(&profile_name))
        .await
        .unwrap();
    store
        .add_device_service(sample_service(&service_name))
        .await
        .unwrap();

    let added = store
        .add_device(sample_device(&device_name, &profile_name, &service_name, vec![]))
        .await
        .unwrap();
    assert!(!added.id.is_empty());
    assert!(added.created > 0);
    assert_eq!(added.created, added.modified);

    // Round-trip: fetched equals added except for server-assigned fields,
    // which we already captured on `added`
    let fetched = store.device_by_id(&added.id).await.unwrap();
    assert_eq!(fetched, added);
    let by_name = store.device_by_name(&device_name).await.unwrap();
    assert_eq!(by_name, added);

    // Same name again → DuplicateName
    let dup = store
        .add_device(sample_device(&device_name, &profile_name, &service_name, vec![]))
        .await;
    assert!(matches!(dup, Err(StoreError::DuplicateName(_))));

    // Same id again → DuplicateName
    let mut with_same_id = sample_device(&unique("device"), &profile_name, &service_name, vec![]);
    with_same_id.id = added.id.clone();
    let dup = store.add_device(with_same_id).await;
    assert!(matches!(dup, Err(StoreError::DuplicateName(_))));

    store.delete_device_by_name(&device_name).await.unwrap();
    store
        .delete_device_profile_by_name(&profile_name)
        .await
        .unwrap();
    store
        .delete_device_service_by_name(&service_name)
        .await
        .unwrap();
    store.close_session();
}

#[tokio::test]
#[ignore = "requires a running Redis"]
async fn referential_integrity_checks() {
    let store = open_store().await;

    let profile_name = unique("profile");
    let service_name = unique("service");
    let device_name = unique("device");

    // Device referencing a nonexistent profile fails up front
    let missing_ref = store
        .add_device(sample_device(&device_name, &profile_name, &service_name, vec![]))
        .await;
    assert!(matches!(missing_ref, Err(StoreError::EntityDoesNotExist(_))));

    store
        .add_device_profile(sample_profile(&profile_name))
        .await
        .unwrap();
    store
        .add_device_service(sample_service(&service_name))
        .await
        .unwrap();
    store
        .add_device(sample_device(&device_name, &profile_name, &service_name, vec![]))
        .await
        .unwrap();

    // Deleting a referenced profile is blocked
    let blocked = store.delete_device_profile_by_name(&profile_name).await;
    assert!(matches!(blocked, Err(StoreError::StatusConflict(_))));

    // Device first, then the profile, succeeds
    store.delete_device_by_name(&device_name).await.unwrap();
    store
        .delete_device_profile_by_name(&profile_name)
        .await
        .unwrap();
    store
        .delete_device_service_by_name(&service_name)
        .await
        .unwrap();
    store.close_session();
}

#[tokio::test]
#[ignore = "requires a running Redis"]
async fn label_and_semantics_and_pagination() {
    let store = open_store().await;

    let profile_name = unique("profile");
    let service_name = unique("service");
    let label_a = unique("label-a");
    let label_b = unique("label-b");

    store
        .add_device_profile(sample_profile(&profile_name))
        .await
        .unwrap();
    store
        .add_device_service(sample_service(&service_name))
        .await
        .unwrap();

    let only_a = store
        .add_device(sample_device(
            &unique("device-a"),
            &profile_name,
            &service_name,
            vec![label_a.clone()],
        ))
        .await
        .unwrap();
    let both = store
        .add_device(sample_device(
            &unique("device-ab"),
            &profile_name,
            &service_name,
            vec![label_a.clone(), label_b.clone()],
        ))
        .await
        .unwrap();
    let only_b = store
        .add_device(sample_device(
            &unique("device-b"),
            &profile_name,
            &service_name,
            vec![label_b.clone()],
        ))
        .await
        .unwrap();

    // AND-semantics: only the device tagged with both labels matches
    let filter = vec![label_a.clone(), label_b.clone()];
    let matched = store.all_devices(0, -1, &filter).await.unwrap();
    assert_eq!(matched.len(), 1);
    assert_eq!(matched[0].id, both.id);
    assert_eq!(store.device_count_by_labels(&filter).await.unwrap(), 1);

    // Pagination idempotence over the single-label set
    let single = vec![label_a.clone()];
    let full = store.all_devices(0, -1, &single).await.unwrap();
    assert_eq!(full.len(), 2);
    for k in 0..=full.len() {
        let head = store.all_devices(0, k as i64, &single).await.unwrap();
        let tail = store.all_devices(k, -1, &single).await.unwrap();
        let combined: Vec<String> = head.into_iter().chain(tail).map(|d| d.id).collect();
        let expected: Vec<String> = full.iter().map(|d| d.id.clone()).collect();
        assert_eq!(combined, expected);
    }

    // Offset beyond the result size fails with RangeNotSatisfiable
    let out_of_range = store.all_devices(10, -1, &single).await;
    assert!(matches!(
        out_of_range,
        Err(StoreError::RangeNotSatisfiable { .. })
    ));

    for device in [&only_a, &both, &only_b] {
        store.delete_device_by_id(&device.id).await.unwrap();
    }
    store
        .delete_device_profile_by_name(&profile_name)
        .await
        .unwrap();
    store
        .delete_device_service_by_name(&service_name)
        .await
        .unwrap();
    store.close_session();
}

#[tokio::test]
#[ignore = "requires a running Redis"]
async fn event_readings_preserve_ingestion_order() {
    let store = open_store().await;
    let device_name = unique("device");

    let readings: Vec<Reading> = (0..5)
        .map(|i| {
            Reading::Simple(SimpleReading {
                base: BaseReading {
                    id: String::new(),
                    origin: 1_000 + i,
                    device_name: device_name.clone(),
                    resource_name: "temperature".into(),
                    profile_name: "thermostat".into(),
                    value_type: "Int64".into(),
                    units: None,
                },
                value: format!("{}", 20 + i),
            })
        })
        .collect();

    let event = Event {
        id: String::new(),
        device_name: device_name.clone(),
        profile_name: "thermostat".into(),
        source_name: "temperature".into(),
        origin: 0,
        tags: HashMap::new(),
        readings,
    };

    let added = store.add_event(event).await.unwrap();
    assert_eq!(added.readings.len(), 5);

    let fetched = store.event_by_id(&added.id).await.unwrap();
    let values: Vec<String> = fetched
        .readings
        .iter()
        .map(|r| match r {
            Reading::Simple(s) => s.value.clone(),
            other => panic!("unexpected reading kind {:?}", other),
        })
        .collect();
    assert_eq!(values, vec!["20", "21", "22", "23", "24"]);

    assert_eq!(
        store.event_count_by_device_name(&device_name).await.unwrap(),
        1
    );

    store.delete_event_by_id(&added.id).await.unwrap();
    assert_eq!(
        store.event_count_by_device_name(&device_name).await.unwrap(),
        0
    );
    assert!(matches!(
        store.event_by_id(&added.id).await,
        Err(StoreError::NotFound(_))
    ));
    store.close_session();
}

#[tokio::test]
#[ignore = "requires a running Redis"]
async fn cascading_event_cleanup_by_device() {
    let store = open_store().await;
    let device_name = unique("device");

    for i in 0..3 {
        let event = Event {
            id: String::new(),
            device_name: device_name.clone(),
            profile_name: "thermostat".into(),
            source_name: "temperature".into(),
            origin: 0,
            tags: HashMap::new(),
            readings: vec![Reading::Simple(SimpleReading {
                base: BaseReading {
                    id: String::new(),
                    origin: 1_000 + i,
                    device_name: device_name.clone(),
                    resource_name: "temperature".into(),
                    profile_name: "thermostat".into(),
                    value_type: "Int64".into(),
                    units: None,
                },
                value: "21".into(),
            })],
        };
        store.add_event(event).await.unwrap();
    }
    assert_eq!(
        store.event_count_by_device_name(&device_name).await.unwrap(),
        3
    );

    // The caller gets handles; joining them makes the cleanup observable
    let cleanup = store
        .delete_events_by_device_name(&device_name)
        .await
        .unwrap();
    cleanup.join().await;

    assert_eq!(
        store.event_count_by_device_name(&device_name).await.unwrap(),
        0
    );
    store.close_session();
}

#[tokio::test]
#[ignore = "requires a running Redis"]
async fn notification_cascade_delete_to_transmissions() {
    let store = open_store().await;

    let subscription_name = unique("subscription");
    store
        .add_subscription(Subscription {
            id: String::new(),
            name: subscription_name.clone(),
            categories: vec!["health".into()],
            labels: Vec::new(),
            receiver: "ops".into(),
            description: String::new(),
            created: 0,
            modified: 0,
        })
        .await
        .unwrap();

    let notification = store
        .add_notification(Notification {
            id: String::new(),
            category: "health".into(),
            labels: Vec::new(),
            content: "disk usage above 90%".into(),
            content_type: "text/plain".into(),
            description: String::new(),
            sender: "sys-agent".into(),
            severity: NotificationSeverity::Critical,
            status: NotificationStatus::New,
            created: 0,
            modified: 0,
        })
        .await
        .unwrap();

    for _ in 0..2 {
        store
            .add_transmission(Transmission {
                id: String::new(),
                created: 0,
                notification_id: notification.id.clone(),
                subscription_name: subscription_name.clone(),
                status: TransmissionStatus::Sent,
                resend_count: 0,
            })
            .await
            .unwrap();
    }
    assert_eq!(
        store
            .transmission_count_by_notification_id(&notification.id)
            .await
            .unwrap(),
        2
    );

    store
        .delete_notification_by_id(&notification.id)
        .await
        .unwrap();

    assert!(matches!(
        store.notification_by_id(&notification.id).await,
        Err(StoreError::NotFound(_))
    ));
    assert_eq!(
        store
            .transmission_count_by_notification_id(&notification.id)
            .await
            .unwrap(),
        0
    );

    store
        .delete_subscription_by_name(&subscription_name)
        .await
        .unwrap();
    store.close_session();
}

#[tokio::test]
#[ignore = "requires a running Redis"]
async fn keeper_hierarchy_create_read_prune() {
    let store = open_store().await;
    let svc = unique("svc");
    let path = format!("{}/group/key", svc);

    let written = store
        .add_kv_keys(&path, serde_json::json!("v"), false)
        .await
        .unwrap();
    assert_eq!(written, vec![path.clone()]);

    // Reading the root in non-key-only mode returns the single leaf
    let items = store.get_kv_keys(&svc, false, true).await.unwrap();
    assert_eq!(items.len(), 1);
    match &items[0] {
        KvItem::Pair(kv) => {
            assert_eq!(kv.key, path);
            assert_eq!(kv.value, "v");
            assert!(kv.created > 0);
        }
        other => panic!("expected a pair, got {:?}", other),
    }

    // Key-only mode returns just the key names
    let keys = store.get_kv_keys(&svc, true, false).await.unwrap();
    assert_eq!(keys.len(), 1);
    assert_eq!(keys[0].key(), path);

    // A non-object write over the interior node is rejected
    let clobber = store
        .add_kv_keys(&format!("{}/group", svc), serde_json::json!("scalar"), false)
        .await;
    assert!(matches!(clobber, Err(StoreError::ContractInvalid(_))));

    // Deleting the leaf prunes the now-empty ancestors up to the root
    let deleted = store.delete_kv_keys(&path, false).await.unwrap();
    assert_eq!(deleted, vec![path]);
    assert!(matches!(
        store.get_kv_keys(&svc, false, false).await,
        Err(StoreError::NotFound(_))
    ));
    store.close_session();
}

#[tokio::test]
#[ignore = "requires a running Redis"]
async fn keeper_flatten_expands_nested_objects() {
    let store = open_store().await;
    let svc = unique("svc");

    let value = serde_json::json!({
        "Writable": { "LogLevel": "INFO" },
        "Port": 59880
    });
    let mut written = store.add_kv_keys(&svc, value, true).await.unwrap();
    written.sort();
    assert_eq!(
        written,
        vec![format!("{}/Port", svc), format!("{}/Writable/LogLevel", svc)]
    );

    let items = store.get_kv_keys(&svc, false, true).await.unwrap();
    let mut resolved: Vec<(String, String)> = items
        .into_iter()
        .map(|item| match item {
            KvItem::Pair(kv) => (kv.key, kv.value),
            other => panic!("expected a pair, got {:?}", other),
        })
        .collect();
    resolved.sort();
    assert_eq!(
        resolved,
        vec![
            (format!("{}/Port", svc), "59880".to_string()),
            (format!("{}/Writable/LogLevel", svc), "INFO".to_string()),
        ]
    );

    // Deleting an interior node requires prefix_match
    let refused = store.delete_kv_keys(&svc, false).await;
    assert!(matches!(refused, Err(StoreError::StatusConflict(_))));

    let mut deleted = store.delete_kv_keys(&svc, true).await.unwrap();
    deleted.sort();
    assert_eq!(
        deleted,
        vec![format!("{}/Port", svc), format!("{}/Writable/LogLevel", svc)]
    );
    store.close_session();
}

#[tokio::test]
#[ignore = "requires a running Redis"]
async fn age_based_notification_cleanup() {
    let store = open_store().await;

    let old = store
        .add_notification(Notification {
            id: String::new(),
            category: String::new(),
            labels: Vec::new(),
            content: "old".into(),
            content_type: "text/plain".into(),
            description: String::new(),
            sender: "sys-agent".into(),
            severity: NotificationSeverity::Normal,
            status: NotificationStatus::Processed,
            // Created a minute ago
            created: edgestore::model::make_timestamp() - 60_000,
            modified: 0,
        })
        .await
        .unwrap();

    let fresh = store
        .add_notification(Notification {
            id: String::new(),
            category: String::new(),
            labels: Vec::new(),
            content: "fresh".into(),
            content_type: "text/plain".into(),
            description: String::new(),
            sender: "sys-agent".into(),
            severity: NotificationSeverity::Normal,
            status: NotificationStatus::New,
            created: 0,
            modified: 0,
        })
        .await
        .unwrap();

    // Age of 10s: the minute-old row goes, the fresh one stays
    let cleanup = store.cleanup_notifications_by_age(10_000).await.unwrap();
    cleanup.join().await;

    assert!(matches!(
        store.notification_by_id(&old.id).await,
        Err(StoreError::NotFound(_))
    ));
    assert!(store.notification_by_id(&fresh.id).await.is_ok());

    store.delete_notification_by_id(&fresh.id).await.unwrap();
    store.close_session();
}
