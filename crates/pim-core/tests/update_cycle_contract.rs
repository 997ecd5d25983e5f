//! Contract Test: Update Cycle
//!
//! Constraints verified:
//! - Enabled providers are merged in registration order, without duplicates
//! - Disabled providers are neither fetched nor touched
//! - An unchanged result set never rewrites the host configuration
//! - A fault aborts the cycle but the run time is still recorded
//! - With fault isolation, a faulty or unresolvable provider is skipped alone
//! - Console output follows the attached verbosity
//!
//! If this test fails, the updater no longer keeps the trusted proxy list in
//! sync with its providers.

mod common;

use common::*;
use pim_core::config::{LAST_RUN_KEY, PROVIDERS_KEY, TRUSTED_PROXIES_KEY, UpdaterConfig};
use pim_core::error::Error;
use pim_core::registry::ProviderRegistry;
use pim_core::schedule::UpdateSchedule;
use pim_core::state::MemoryConfigStore;
use pim_core::traits::{ConfigStore, Provider};
use pim_core::updater::{BufferedConsole, Updater, Verbosity};
use serde_json::json;
use std::sync::Arc;

async fn trusted(store: &MemoryConfigStore) -> serde_json::Value {
    store
        .get(TRUSTED_PROXIES_KEY)
        .await
        .unwrap()
        .unwrap_or(serde_json::Value::Null)
}

async fn last_run_recorded(store: &MemoryConfigStore) -> bool {
    UpdateSchedule::new(Arc::new(store.clone()))
        .last_run()
        .await
        .unwrap()
        .is_some()
}

/// Assert that the recorded run time lies within `before..=after`
async fn assert_run_recorded_between(store: &dyn ConfigStore, before: i64, after: i64) {
    let recorded = store
        .get(LAST_RUN_KEY)
        .await
        .unwrap()
        .and_then(|value| value.as_i64())
        .expect("run time recorded");
    assert!(
        (before..=after).contains(&recorded),
        "run time {} outside {}..={}",
        recorded,
        before,
        after
    );
}

#[tokio::test]
async fn enabled_providers_are_merged_in_order() {
    let (store, registry, updater) = setup(test_catalog());
    registry.register("a", "static-a", true).await.unwrap();
    registry.register("b", "static-b", true).await.unwrap();

    updater.process_enabled_providers().await;

    assert_eq!(
        trusted(&store).await,
        json!(["1.1.1.1", "2.2.2.2", "3.3.3.3"])
    );
    assert_eq!(
        registry.get_last_ips("a").await.unwrap(),
        ["1.1.1.1", "2.2.2.2"]
    );
    assert_eq!(
        registry.get_last_ips("b").await.unwrap(),
        ["2.2.2.2", "3.3.3.3"]
    );
    assert!(last_run_recorded(&store).await);
}

#[tokio::test]
async fn disabled_provider_is_skipped() {
    let counted = StaticProvider::new("Counted", &["9.9.9.9"]);
    let mut catalog = test_catalog();
    let shared = StaticProvider::sharing_counters_with(&counted);
    let shared = Arc::new(std::sync::Mutex::new(Some(shared)));
    catalog.register_fn("counted", move || {
        let provider = shared
            .lock()
            .unwrap()
            .take()
            .expect("counted provider is resolved once");
        Ok(Provider::plain(provider))
    });

    let (store, registry, updater) = setup(catalog);
    registry.register("a", "static-a", true).await.unwrap();
    registry.register("off", "counted", false).await.unwrap();
    registry
        .set_last_ips("off", &strings(&["8.8.8.8"]))
        .await
        .unwrap();

    updater.process_enabled_providers().await;

    assert_eq!(counted.fetch_count(), 0);
    assert_eq!(registry.get_last_ips("off").await.unwrap(), ["8.8.8.8"]);
    assert_eq!(trusted(&store).await, json!(["1.1.1.1", "2.2.2.2"]));
}

#[tokio::test]
async fn unchanged_result_is_not_rewritten() {
    let (store, registry, updater) = setup(test_catalog());
    registry.register("a", "static-a", true).await.unwrap();

    updater.process_enabled_providers().await;
    updater.process_enabled_providers().await;

    assert_eq!(store.write_count(TRUSTED_PROXIES_KEY).await, 1);
    // The run time is recorded on every cycle
    assert_eq!(store.write_count(LAST_RUN_KEY).await, 2);
}

#[tokio::test]
async fn comparison_ignores_order() {
    let store = MemoryConfigStore::with_values([(
        TRUSTED_PROXIES_KEY,
        json!(["2.2.2.2", "1.1.1.1"]),
    )]);
    let shared: Arc<dyn ConfigStore> = Arc::new(store.clone());
    let registry = Arc::new(ProviderRegistry::new(Arc::clone(&shared), test_catalog()));
    let updater = Updater::new(Arc::clone(&registry), shared);
    registry.register("a", "static-a", true).await.unwrap();

    updater.process_enabled_providers().await;

    assert_eq!(store.write_count(TRUSTED_PROXIES_KEY).await, 0);
    assert_eq!(trusted(&store).await, json!(["2.2.2.2", "1.1.1.1"]));
}

#[tokio::test]
async fn no_enabled_providers_clears_the_list() {
    let store = MemoryConfigStore::with_values([(TRUSTED_PROXIES_KEY, json!(["9.9.9.9"]))]);
    let shared: Arc<dyn ConfigStore> = Arc::new(store.clone());
    let registry = Arc::new(ProviderRegistry::new(Arc::clone(&shared), test_catalog()));
    let updater = Updater::new(Arc::clone(&registry), shared);
    registry.register("a", "static-a", false).await.unwrap();

    updater.process_enabled_providers().await;

    assert_eq!(trusted(&store).await, json!([]));
    assert!(last_run_recorded(&store).await);
}

#[tokio::test]
async fn provider_fault_aborts_cycle_but_records_run() {
    let store = MemoryConfigStore::with_values([
        (TRUSTED_PROXIES_KEY, json!(["9.9.9.9"])),
        (LAST_RUN_KEY, json!(1)),
    ]);
    let shared: Arc<dyn ConfigStore> = Arc::new(store.clone());
    let registry = Arc::new(ProviderRegistry::new(Arc::clone(&shared), test_catalog()));
    let console = Arc::new(BufferedConsole::new(Verbosity::Normal));
    let updater = Updater::new(Arc::clone(&registry), shared).attach_console(console.clone());
    registry.register("boom", "failing", true).await.unwrap();
    registry.register("a", "static-a", true).await.unwrap();

    let before = chrono::Utc::now().timestamp();
    updater.process_enabled_providers().await;
    let after = chrono::Utc::now().timestamp();

    assert_eq!(trusted(&store).await, json!(["9.9.9.9"]));
    assert!(registry.get_last_ips("a").await.unwrap().is_empty());
    assert_run_recorded_between(&store, before, after).await;

    let lines = console.lines();
    assert!(
        lines.iter().any(|l| l.contains("upstream exploded")),
        "fault should reach the console: {:?}",
        lines
    );
    assert!(!lines.iter().any(|l| l.contains("\"a\"")));
}

#[tokio::test]
async fn isolated_fault_skips_only_that_provider() {
    let (store, registry, updater) = setup(test_catalog());
    let updater = updater.with_config(UpdaterConfig::default().with_isolate_provider_faults(true));
    registry.register("boom", "failing", true).await.unwrap();
    registry.register("a", "static-a", true).await.unwrap();

    updater.process_enabled_providers().await;

    assert_eq!(trusted(&store).await, json!(["1.1.1.1", "2.2.2.2"]));
    assert_eq!(
        registry.get_last_ips("a").await.unwrap(),
        ["1.1.1.1", "2.2.2.2"]
    );
    assert!(last_run_recorded(&store).await);
}

#[tokio::test]
async fn isolated_fault_skips_unresolvable_provider() {
    let store = MemoryConfigStore::with_values([
        (
            PROVIDERS_KEY,
            json!({
                "gone": {"abstract": "removed-plugin", "enabled": true},
                "a": {"abstract": "static-a", "enabled": true}
            }),
        ),
        (LAST_RUN_KEY, json!(1)),
    ]);
    let shared: Arc<dyn ConfigStore> = Arc::new(store.clone());
    let registry = Arc::new(ProviderRegistry::new(Arc::clone(&shared), test_catalog()));
    let updater = Updater::new(Arc::clone(&registry), shared)
        .with_config(UpdaterConfig::default().with_isolate_provider_faults(true));

    let before = chrono::Utc::now().timestamp();
    updater.process_enabled_providers().await;
    let after = chrono::Utc::now().timestamp();

    assert_eq!(trusted(&store).await, json!(["1.1.1.1", "2.2.2.2"]));
    assert_eq!(
        registry.get_last_ips("a").await.unwrap(),
        ["1.1.1.1", "2.2.2.2"]
    );
    assert_run_recorded_between(&store, before, after).await;
}

#[tokio::test]
async fn unresolvable_provider_aborts_cycle_by_default() {
    let store = MemoryConfigStore::with_values([(
        PROVIDERS_KEY,
        json!({
            "gone": {"abstract": "removed-plugin", "enabled": true},
            "a": {"abstract": "static-a", "enabled": true}
        }),
    )]);
    let shared: Arc<dyn ConfigStore> = Arc::new(store.clone());
    let registry = Arc::new(ProviderRegistry::new(Arc::clone(&shared), test_catalog()));
    let updater = Updater::new(Arc::clone(&registry), shared);

    updater.process_enabled_providers().await;

    assert_eq!(trusted(&store).await, serde_json::Value::Null);
    assert!(registry.get_last_ips("a").await.unwrap().is_empty());
    assert!(last_run_recorded(&store).await);
}

#[tokio::test]
async fn store_fault_still_records_run() {
    let flaky = Arc::new(FlakyStore::new(MemoryConfigStore::with_values([(
        LAST_RUN_KEY,
        json!(1),
    )])));
    flaky.fail_writes_to(TRUSTED_PROXIES_KEY);
    let shared: Arc<dyn ConfigStore> = flaky.clone();
    let registry = Arc::new(ProviderRegistry::new(Arc::clone(&shared), test_catalog()));
    let updater = Updater::new(Arc::clone(&registry), Arc::clone(&shared));
    registry.register("a", "static-a", true).await.unwrap();

    let before = chrono::Utc::now().timestamp();
    updater.process_enabled_providers().await;
    let after = chrono::Utc::now().timestamp();

    assert_eq!(shared.get(TRUSTED_PROXIES_KEY).await.unwrap(), None);
    assert_run_recorded_between(shared.as_ref(), before, after).await;
}

#[tokio::test]
async fn soft_errors_do_not_stop_the_cycle() {
    let mut catalog = test_catalog();
    catalog.register_fn("partial", || {
        Ok(Provider::plain(
            StaticProvider::new("Partial", &["4.4.4.4"]).with_errors(&["feed truncated"]),
        ))
    });
    let (store, registry, updater) = setup(catalog);
    let console = Arc::new(BufferedConsole::new(Verbosity::Normal));
    let updater = updater.attach_console(console.clone());
    registry.register("p", "partial", true).await.unwrap();
    registry.register("a", "static-a", true).await.unwrap();

    updater.process_enabled_providers().await;

    assert_eq!(
        trusted(&store).await,
        json!(["4.4.4.4", "1.1.1.1", "2.2.2.2"])
    );
    assert!(console.lines().contains(&"feed truncated".to_string()));
}

#[tokio::test]
async fn configured_entries_are_normalized() {
    let (store, registry, updater) = setup(test_catalog());
    registry.register("l", "list", true).await.unwrap();
    registry
        .configure(
            "l",
            &object(json!({"ips": ["10.1.2.3/8", " 10.0.0.0/8 ", "2001:DB8::1", "nope", "*"]})),
        )
        .await
        .unwrap();

    updater.process_enabled_providers().await;

    assert_eq!(trusted(&store).await, json!(["10.0.0.0/8", "2001:db8::1"]));
    assert_eq!(
        registry.get_last_ips("l").await.unwrap(),
        ["10.0.0.0/8", "2001:db8::1"]
    );
}

#[tokio::test]
async fn console_follows_verbosity() {
    let (_store, registry, updater) = setup(test_catalog());
    registry.register("a", "static-a", true).await.unwrap();

    let normal = Arc::new(BufferedConsole::new(Verbosity::Normal));
    let updater = updater.attach_console(normal.clone());
    updater.process_enabled_providers().await;

    let lines = normal.take();
    assert!(lines.contains(&"> Invoking provider \"a\"".to_string()));
    assert!(lines.contains(&"New IPs from proxy IP provider \"a\": 1.1.1.1 2.2.2.2".to_string()));
    assert!(lines.contains(&"Changes to the final proxy IP list have been persisted.".to_string()));
    assert!(!lines.iter().any(|l| l.starts_with('#')));

    // Second run: nothing changed
    updater.process_enabled_providers().await;
    let lines = normal.take();
    assert!(lines.contains(&"No changes in the final proxy IP list.".to_string()));
    assert!(!lines.iter().any(|l| l.starts_with("New IPs")));
}

#[tokio::test]
async fn verbose_console_shows_narration() {
    let (_store, registry, updater) = setup(test_catalog());
    registry.register("a", "static-a", true).await.unwrap();
    registry.set_last_ips("a", &strings(&["1.1.1.1", "5.5.5.5"])).await.unwrap();

    let verbose = Arc::new(BufferedConsole::new(Verbosity::Verbose));
    let updater = updater.attach_console(verbose.clone());
    updater.process_enabled_providers().await;

    let lines = verbose.lines();
    assert_eq!(lines.first().map(String::as_str), Some("# Listing enabled providers"));
    assert!(lines.contains(&"IPs no longer provided by proxy IP provider \"a\": 5.5.5.5".to_string()));
    assert_eq!(
        lines.last().map(String::as_str),
        Some("# Saving date/time of current execution")
    );
}

#[tokio::test]
async fn quiet_console_receives_nothing() {
    let (_store, registry, updater) = setup(test_catalog());
    registry.register("boom", "failing", true).await.unwrap();

    let quiet = Arc::new(BufferedConsole::new(Verbosity::Quiet));
    let updater = updater.attach_console(quiet.clone());
    updater.process_enabled_providers().await;

    assert!(quiet.lines().is_empty());
}

#[tokio::test]
async fn probe_does_not_persist() {
    let (store, registry, updater) = setup(test_catalog());
    registry.register("l", "list", true).await.unwrap();
    registry
        .configure("l", &object(json!({"ips": ["10.0.0.1", "10.0.0.1", "bogus"]})))
        .await
        .unwrap();
    let writes = store.total_writes().await;

    let probe = updater.probe_provider("l").await.unwrap();

    assert_eq!(probe.addresses, ["10.0.0.1"]);
    assert_eq!(probe.errors, ["Invalid IP address: bogus"]);
    assert_eq!(store.total_writes().await, writes);
    assert_eq!(store.write_count(PROVIDERS_KEY).await, 2);

    assert!(matches!(
        updater.probe_provider("ghost").await,
        Err(Error::UnregisteredHandle(_))
    ));

    registry.register("boom", "failing", true).await.unwrap();
    assert!(matches!(
        updater.probe_provider("boom").await,
        Err(Error::Provider { .. })
    ));
}

#[tokio::test]
async fn overlapping_providers_are_deduplicated() {
    let (store, registry, updater) = setup(test_catalog());
    registry.register("first", "list", true).await.unwrap();
    registry.register("second", "list", true).await.unwrap();
    registry
        .configure("first", &object(json!({"ips": ["1.1.1.1"]})))
        .await
        .unwrap();
    registry
        .configure("second", &object(json!({"ips": ["1.1.1.1", "2.2.2.2"]})))
        .await
        .unwrap();

    updater.process_enabled_providers().await;

    assert_eq!(trusted(&store).await, json!(["1.1.1.1", "2.2.2.2"]));
    assert_eq!(registry.get_last_ips("first").await.unwrap(), ["1.1.1.1"]);
    assert_eq!(
        registry.get_last_ips("second").await.unwrap(),
        ["1.1.1.1", "2.2.2.2"]
    );
}
