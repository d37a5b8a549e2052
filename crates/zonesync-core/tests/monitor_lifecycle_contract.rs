//! Architectural Contract Test: Monitor, Data Feed & Notify List Lifecycle
//!
//! This test verifies that health-check jobs, their data feeds and their
//! notify lists are created once and shared by fingerprint. They are
//! corrected in place and removed when the last record lets go of them.
//!
//! Constraints verified:
//! - One job per fingerprint, however many records or pools use the value
//! - Jobs and dedicated lists are deleted only after their last reference,
//!   including references from zones outside the pass
//! - A feed is deleted before its job, and a lost feed is recreated
//! - The shared notify list is reused and never deleted
//! - A lost create race reuses the winner instead of creating a duplicate
//! - Out-of-band edits are reverted with an update, not a new job
//! - Jobs this system did not create are left alone
//!
//! If this test fails, monitors leak or records lose their health checks.

mod common;

use common::*;
use zonesync_core::model::{
    DynamicRecord, DynamicSpec, Healthcheck, HealthcheckProtocol, Pool, PoolValue, RecordType,
    Rule,
};
use zonesync_core::native::MonitorJob;
use zonesync_core::{Operation, Record, ResourceKind};

/// Single-pool record health-checked over plain TCP, so the job does not depend on
/// the record name
fn tcp_record(name: &str, value: &str) -> Record {
    let spec = DynamicSpec::default()
        .with_pool("main", Pool::new(vec![PoolValue::new(value)]))
        .with_rule(Rule::new("main"));
    Record::dynamic(
        name,
        60,
        DynamicRecord::new(RecordType::A, spec).with_healthcheck(Healthcheck {
            protocol: HealthcheckProtocol::Tcp,
            port: 80,
            ..Default::default()
        }),
    )
}

/// Jobs a record's answers follow, resolved through their data feeds
fn obeyed_monitor(api: &FakeApi, zone: &str, domain: &str) -> Vec<String> {
    let record = api.record(zone, domain, "A").unwrap();
    let mut ids: Vec<String> = record
        .answers
        .iter()
        .filter_map(|answer| api.job_of_feed(answer.meta.up.as_ref()?.feed_id()?))
        .collect();
    ids.sort();
    ids.dedup();
    ids
}

#[tokio::test]
async fn same_value_in_two_pools_gets_one_monitor() {
    let api = FakeApi::new();
    api.seed_zone("example.com");
    let (reconciler, _events) = reconciler(&api);

    let spec = DynamicSpec::default()
        .with_pool("a", Pool::new(vec![PoolValue::new("1.1.1.1")]))
        .with_pool(
            "b",
            Pool::new(vec![PoolValue::new("1.1.1.1"), PoolValue::new("2.2.2.2")]),
        )
        .with_rule(Rule::new("a").with_geos(["EU"]))
        .with_rule(Rule::new("b"));
    let record = Record::dynamic("www", 60, DynamicRecord::new(RecordType::A, spec));

    reconciler
        .reconcile(vec![zone("example.com", vec![record])])
        .await
        .unwrap();

    let targets: Vec<String> = api
        .monitors()
        .iter()
        .filter_map(|job| job.config.get("host")?.as_str().map(String::from))
        .collect();
    assert_eq!(targets.len(), 2);
    assert!(targets.contains(&"1.1.1.1".to_string()));
    assert!(targets.contains(&"2.2.2.2".to_string()));
}

#[tokio::test]
async fn records_sharing_a_fingerprint_share_the_monitor() {
    let api = FakeApi::new();
    api.seed_zone("example.com");
    let (reconciler, _events) = reconciler(&api);
    let desired = zone(
        "example.com",
        vec![tcp_record("www", "1.1.1.1"), tcp_record("api", "1.1.1.1")],
    );

    reconciler.monitors().load().await.unwrap();
    let set = reconciler.plan_zone(&desired).await.unwrap();
    assert_eq!(set.count(ResourceKind::Monitor, Operation::Create), 1);
    assert_eq!(set.count(ResourceKind::NotifyList, Operation::Create), 1);
    assert_eq!(set.count(ResourceKind::FilterChain, Operation::Create), 2);

    reconciler.apply(&set).await.unwrap();
    assert_eq!(api.monitors().len(), 1);
    assert_eq!(api.notify_lists().len(), 1);
    assert_eq!(
        obeyed_monitor(&api, "example.com", "www.example.com"),
        obeyed_monitor(&api, "example.com", "api.example.com")
    );
}

#[tokio::test]
async fn dynamic_to_simple_keeps_monitors_other_records_use() {
    let api = FakeApi::new();
    api.seed_zone("example.com");
    let (reconciler, _events) = reconciler(&api);

    reconciler
        .reconcile(vec![zone(
            "example.com",
            vec![tcp_record("www", "1.1.1.1"), tcp_record("api", "1.1.1.1")],
        )])
        .await
        .unwrap();
    let job_id = api.monitors()[0].id.clone().unwrap();
    let list_id = api.notify_lists()[0].id.clone().unwrap();
    let feed_id = api.feed_of_job(&job_id).unwrap();

    // api goes simple; www still obeys the job
    api.clear_calls();
    let outcomes = reconciler
        .reconcile(vec![zone(
            "example.com",
            vec![tcp_record("www", "1.1.1.1"), a_record("api", &["3.3.3.3"])],
        )])
        .await
        .unwrap();
    assert!(outcomes[0].result.is_ok());
    assert_eq!(api.mutations(), vec!["update_record api.example.com A"]);
    assert_eq!(api.monitors().len(), 1);

    // www goes simple too; the job and its list go with it
    api.clear_calls();
    let outcomes = reconciler
        .reconcile(vec![zone(
            "example.com",
            vec![a_record("www", &["1.1.1.1"]), a_record("api", &["3.3.3.3"])],
        )])
        .await
        .unwrap();
    assert!(outcomes[0].result.is_ok());
    assert_eq!(
        api.mutations(),
        vec![
            "update_record www.example.com A".to_string(),
            format!("delete_data_feed {}", feed_id),
            format!("delete_monitor {}", job_id),
            format!("delete_notify_list {}", list_id),
        ]
    );
    assert!(api.monitors().is_empty());
    assert!(api.data_feeds().is_empty());
    assert!(api.notify_lists().is_empty());
    assert_eq!(api.data_sources().len(), 1);
}

#[tokio::test]
async fn deleted_dynamic_record_releases_after_the_record() {
    let api = FakeApi::new();
    api.seed_zone("example.com");
    let (reconciler, _events) = reconciler(&api);

    reconciler
        .reconcile(vec![zone(
            "example.com",
            vec![geo_a_record("www", "1.1.1.1", "2.2.2.2")],
        )])
        .await
        .unwrap();
    assert_eq!(api.monitors().len(), 2);

    api.clear_calls();
    reconciler
        .reconcile(vec![zone("example.com", vec![])])
        .await
        .unwrap();

    let mutations = api.mutations();
    assert_eq!(mutations[0], "delete_record www.example.com A");
    assert_eq!(
        mutations
            .iter()
            .filter(|m| m.starts_with("delete_data_feed "))
            .count(),
        2
    );
    assert_eq!(
        mutations
            .iter()
            .filter(|m| m.starts_with("delete_monitor "))
            .count(),
        2
    );
    assert_eq!(
        mutations
            .iter()
            .filter(|m| m.starts_with("delete_notify_list "))
            .count(),
        2
    );
    assert!(api.monitors().is_empty());
    assert!(api.notify_lists().is_empty());
}

#[tokio::test]
async fn monitor_shared_across_zones_survives_one_zone_letting_go() {
    let api = FakeApi::new();
    api.seed_zone("example.com");
    api.seed_zone("example.org");
    let (reconciler, _events) = reconciler(&api);

    reconciler
        .reconcile(vec![
            zone("example.com", vec![tcp_record("www", "1.1.1.1")]),
            zone("example.org", vec![tcp_record("www", "1.1.1.1")]),
        ])
        .await
        .unwrap();
    assert_eq!(api.monitors().len(), 1);

    api.clear_calls();
    let outcomes = reconciler
        .reconcile(vec![
            zone("example.com", vec![a_record("www", &["1.1.1.1"])]),
            zone("example.org", vec![tcp_record("www", "1.1.1.1")]),
        ])
        .await
        .unwrap();
    assert!(outcomes.iter().all(|o| o.result.is_ok()));
    assert_eq!(api.mutations(), vec!["update_record www.example.com A"]);
    assert_eq!(api.monitors().len(), 1);
}

#[tokio::test]
async fn monitor_used_by_a_zone_outside_the_pass_is_kept() {
    let api = FakeApi::new();
    api.seed_zone("example.com");
    api.seed_zone("example.org");
    let (reconciler, _events) = reconciler(&api);

    reconciler
        .reconcile(vec![
            zone("example.com", vec![tcp_record("www", "1.1.1.1")]),
            zone("example.org", vec![tcp_record("www", "1.1.1.1")]),
        ])
        .await
        .unwrap();
    let job_id = api.monitors()[0].id.clone().unwrap();

    // Only example.com is reconciled; example.org still follows the job
    api.clear_calls();
    let outcomes = reconciler
        .reconcile(vec![zone("example.com", vec![a_record("www", &["1.1.1.1"])])])
        .await
        .unwrap();
    assert!(outcomes[0].result.is_ok());
    assert_eq!(api.mutations(), vec!["update_record www.example.com A"]);
    assert_eq!(api.monitors().len(), 1);
    assert_eq!(
        obeyed_monitor(&api, "example.org", "www.example.org"),
        vec![job_id.clone()]
    );

    // Once example.org lets go too, the job goes
    api.clear_calls();
    reconciler
        .reconcile(vec![zone("example.org", vec![a_record("www", &["1.1.1.1"])])])
        .await
        .unwrap();
    assert!(
        api.mutations()
            .contains(&format!("delete_monitor {}", job_id))
    );
    assert!(api.monitors().is_empty());
}

#[tokio::test]
async fn applying_one_zone_checks_other_zones_before_release() {
    let api = FakeApi::new();
    api.seed_zone("example.com");
    api.seed_zone("example.org");
    let (reconciler, _events) = reconciler(&api);

    reconciler
        .reconcile(vec![
            zone("example.com", vec![tcp_record("www", "1.1.1.1")]),
            zone("example.org", vec![tcp_record("www", "1.1.1.1")]),
        ])
        .await
        .unwrap();

    // A fresh process plans and applies example.com on its own
    let (fresh, _events) = reconciler_with(&api, sync_config());
    fresh.monitors().load().await.unwrap();
    let set = fresh
        .plan_zone(&zone("example.com", vec![a_record("www", &["1.1.1.1"])]))
        .await
        .unwrap();
    assert_eq!(set.count(ResourceKind::Monitor, Operation::Delete), 1);

    api.clear_calls();
    fresh.apply(&set).await.unwrap();
    assert_eq!(api.mutations(), vec!["update_record www.example.com A"]);
    assert_eq!(api.monitors().len(), 1);
}

#[tokio::test]
async fn unreadable_zone_outside_the_pass_holds_releases_back() {
    let api = FakeApi::new();
    api.seed_zone("example.com");
    api.seed_zone("example.org");
    let (reconciler, _events) = reconciler(&api);

    reconciler
        .reconcile(vec![
            zone("example.com", vec![tcp_record("www", "1.1.1.1")]),
            zone("example.org", vec![tcp_record("www", "1.1.1.1")]),
        ])
        .await
        .unwrap();

    api.fail_on("get_zone", "example.org", 500);
    api.clear_calls();
    let outcomes = reconciler
        .reconcile(vec![zone("example.com", vec![a_record("www", &["1.1.1.1"])])])
        .await
        .unwrap();
    assert!(outcomes[0].result.is_ok());
    assert_eq!(api.mutations(), vec!["update_record www.example.com A"]);
    assert_eq!(api.monitors().len(), 1);
}

#[tokio::test]
async fn shared_notify_list_is_reused_and_kept() {
    let api = FakeApi::new();
    api.seed_zone("example.com");
    let mut config = sync_config();
    config.monitors.shared_notifylist = true;
    let (reconciler, _events) = reconciler_with(&api, config);

    reconciler
        .reconcile(vec![zone(
            "example.com",
            vec![
                pooled_a_record("www", &["1.1.1.1", "2.2.2.2"]),
                pooled_a_record("api", &["3.3.3.3"]),
            ],
        )])
        .await
        .unwrap();

    let lists = api.notify_lists();
    assert_eq!(lists.len(), 1);
    assert_eq!(lists[0].name, "zonesync shared notify list");
    let monitors = api.monitors();
    assert_eq!(monitors.len(), 3);
    assert!(monitors.iter().all(|job| job.notify_list == lists[0].id));

    api.clear_calls();
    reconciler
        .reconcile(vec![zone(
            "example.com",
            vec![
                a_record("www", &["1.1.1.1"]),
                a_record("api", &["3.3.3.3"]),
            ],
        )])
        .await
        .unwrap();
    assert!(api.monitors().is_empty());
    assert_eq!(api.notify_lists().len(), 1);
    assert!(
        !api.mutations()
            .iter()
            .any(|m| m.starts_with("delete_notify_list "))
    );
}

#[tokio::test]
async fn lost_create_race_reuses_the_winner() {
    let api = FakeApi::new();
    api.seed_zone("example.com");
    let (reconciler, _events) = reconciler(&api);
    let record = pooled_a_record("www", &["1.1.1.1"]);

    // Another writer creates the same job between our plan and our create
    let required = reconciler
        .translator()
        .compiler()
        .required_monitors("www.example.com.", record.as_dynamic().unwrap());
    assert_eq!(required.len(), 1);
    api.race_next_monitor_create(required[0].job.clone());

    let outcomes = reconciler
        .reconcile(vec![zone("example.com", vec![record])])
        .await
        .unwrap();
    assert!(outcomes[0].result.is_ok());

    let monitors = api.monitors();
    assert_eq!(monitors.len(), 1);
    let winner = monitors[0].id.clone().unwrap();
    assert_eq!(monitors[0].notify_list, api.notify_lists()[0].id);
    assert!(api.mutations().contains(&format!("update_monitor {}", winner)));
    assert_eq!(obeyed_monitor(&api, "example.com", "www.example.com"), vec![winner]);
}

#[tokio::test]
async fn edited_monitor_is_updated_in_place() {
    let api = FakeApi::new();
    api.seed_zone("example.com");
    let (reconciler, _events) = reconciler(&api);
    let desired = zone("example.com", vec![pooled_a_record("www", &["1.1.1.1"])]);

    reconciler.reconcile(vec![desired.clone()]).await.unwrap();
    let job = api.monitors()[0].clone();
    let id = job.id.clone().unwrap();

    api.edit_monitor(&id, |job| {
        job.name = "renamed by hand".into();
        job.frequency = Some(300);
    });

    api.clear_calls();
    reconciler.reconcile(vec![desired.clone()]).await.unwrap();
    assert_eq!(api.mutations(), vec![format!("update_monitor {}", id)]);
    let restored = &api.monitors()[0];
    assert_eq!(restored.name, job.name);
    assert_eq!(restored.frequency, job.frequency);

    api.clear_calls();
    reconciler.reconcile(vec![desired]).await.unwrap();
    assert!(api.mutations().is_empty());
}

#[tokio::test]
async fn deleted_monitor_is_recreated_and_record_rebound() {
    let api = FakeApi::new();
    api.seed_zone("example.com");
    let (reconciler, _events) = reconciler(&api);
    let desired = zone("example.com", vec![pooled_a_record("www", &["1.1.1.1"])]);

    reconciler.reconcile(vec![desired.clone()]).await.unwrap();
    let old = api.monitors()[0].id.clone().unwrap();
    api.remove_monitor(&old);

    api.clear_calls();
    let outcomes = reconciler.reconcile(vec![desired]).await.unwrap();
    assert!(outcomes[0].result.is_ok());

    let mutations = api.mutations();
    assert_eq!(mutations.len(), 3, "{:?}", mutations);
    assert!(mutations[0].starts_with("create_monitor "));
    assert!(mutations[1].starts_with("create_data_feed "));
    assert_eq!(mutations[2], "update_record www.example.com A");

    let bound = obeyed_monitor(&api, "example.com", "www.example.com");
    assert_eq!(bound.len(), 1);
    assert_ne!(bound[0], old);
}

#[tokio::test]
async fn deleted_feed_is_recreated_and_record_rebound() {
    let api = FakeApi::new();
    api.seed_zone("example.com");
    let (reconciler, _events) = reconciler(&api);
    let desired = zone("example.com", vec![pooled_a_record("www", &["1.1.1.1"])]);

    reconciler.reconcile(vec![desired.clone()]).await.unwrap();
    let id = api.monitors()[0].id.clone().unwrap();
    let old = api.feed_of_job(&id).unwrap();
    api.remove_data_feed(&old);

    api.clear_calls();
    let outcomes = reconciler.reconcile(vec![desired.clone()]).await.unwrap();
    assert!(outcomes[0].result.is_ok());
    assert_eq!(
        api.mutations(),
        vec![
            format!("create_data_feed {}", id),
            "update_record www.example.com A".to_string(),
        ]
    );

    let renewed = api.feed_of_job(&id).unwrap();
    assert_ne!(renewed, old);
    assert_eq!(obeyed_monitor(&api, "example.com", "www.example.com"), vec![id]);

    api.clear_calls();
    reconciler.reconcile(vec![desired]).await.unwrap();
    assert!(api.mutations().is_empty());
}

#[tokio::test]
async fn unmanaged_monitors_are_never_touched() {
    let api = FakeApi::new();
    api.seed_zone("example.com");
    let unmanaged = api.seed_monitor(MonitorJob {
        name: "hand made check".into(),
        job_type: "tcp".into(),
        ..Default::default()
    });
    let (reconciler, _events) = reconciler(&api);

    reconciler
        .reconcile(vec![zone(
            "example.com",
            vec![pooled_a_record("www", &["1.1.1.1"])],
        )])
        .await
        .unwrap();
    reconciler
        .reconcile(vec![zone("example.com", vec![])])
        .await
        .unwrap();

    let remaining: Vec<String> = api.monitors().iter().filter_map(|j| j.id.clone()).collect();
    assert_eq!(remaining, vec![unmanaged.clone()]);
    assert!(
        !api.mutations()
            .iter()
            .any(|m| m.ends_with(&format!(" {}", unmanaged)))
    );
}
