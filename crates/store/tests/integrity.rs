mod common;

use async_trait::async_trait;
use common::manager;
use quotevault_core::{ComponentCatalog, RecordId, StoreName};
use quotevault_store::backend::MemoryProvider;
use quotevault_store::integrity::{SnapshotRecord, PRE_REPAIR_TAG};
use quotevault_store::{
    BackupManager, CheckTarget, DataIntegrityManager, LiveStore, QueryFilter, RepairCommit,
    RepairedRecord, Result, Snapshot, StorageManager, StoreError,
};
use futures::future::{BoxFuture, FutureExt};
use serde_json::json;

/// Runs `between` after the check has read the store and before it writes
struct WriteAfterExport {
    manager: StorageManager,
    between: Box<dyn Fn() -> BoxFuture<'static, ()> + Send + Sync>,
}

#[async_trait]
impl LiveStore for WriteAfterExport {
    async fn export_snapshot(&self) -> Result<Snapshot> {
        let snapshot = self.manager.export_snapshot().await?;
        (self.between)().await;
        Ok(snapshot)
    }

    async fn commit_repairs(&self, repairs: &[RepairedRecord]) -> Result<RepairCommit> {
        self.manager.commit_repairs(repairs).await
    }

    async fn commit_snapshot(&self, snapshot: &Snapshot) -> Result<()> {
        self.manager.commit_snapshot(snapshot).await
    }
}

const DAMAGED_COMPONENT: &str =
    r#"{"componentType":"sensors","enabled":true,"params":{"sensors":NaN},"timestamp":5}"#;

#[tokio::test]
async fn damaged_rows_are_repaired_in_place() {
    let provider = MemoryProvider::new();
    let manager = manager(&provider);
    manager.initialize().await;

    let saved = manager
        .save_component(json!({ "componentType": "sensors", "enabled": true, "params": { "sensors": 2 } }))
        .await
        .unwrap();
    let id = saved.record.id.clone();
    provider
        .write_raw(
            StoreName::Components,
            id.clone(),
            r#"{"componentType":"sensors","enabled":true,"params":{"sensors":NaN,"locations":undefined},"timestamp":5}"#,
        )
        .unwrap();

    let report = manager.run_integrity_check().await.unwrap();
    assert!(!report.is_clean());
    assert!(report.committed);
    assert!(report.backup_id.is_some());

    let repaired = manager
        .get_record(StoreName::Components, &id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(repaired.payload["params"], json!({}));
    assert_eq!(repaired.payload["componentType"], json!("sensors"));

    let again = manager.run_integrity_check().await.unwrap();
    assert!(again.is_clean());
    assert!(manager.backups().latest_backup(PRE_REPAIR_TAG).is_some());
}

#[tokio::test]
async fn pre_repair_backup_holds_the_damaged_data() {
    let provider = MemoryProvider::new();
    let manager = manager(&provider);
    manager.initialize().await;

    let saved = manager.save_quote(json!({})).await.unwrap();
    provider
        .write_raw(StoreName::Quotes, saved.record.id.clone(), r#"{"project":"oops"}"#)
        .unwrap();

    let report = manager.run_integrity_check().await.unwrap();
    let backup = manager
        .backups()
        .restore_backup(report.backup_id.unwrap())
        .unwrap();
    let original = backup
        .snapshot
        .find(StoreName::Quotes, &saved.record.id)
        .unwrap();
    assert_eq!(original.to_value().unwrap(), json!({ "project": "oops" }));

    let fixed = manager
        .get_record(StoreName::Quotes, &saved.record.id)
        .await
        .unwrap()
        .unwrap();
    assert!(fixed.payload["project"].is_object());
}

#[tokio::test]
async fn reading_an_unparsable_row_triggers_repair() {
    let provider = MemoryProvider::new();
    let manager = manager(&provider);
    manager.initialize().await;

    let saved = manager
        .save_component(json!({ "componentType": "locations" }))
        .await
        .unwrap();
    provider
        .write_raw(
            StoreName::Components,
            saved.record.id.clone(),
            r#"{"componentType":"locations","enabled":false,"params":{"locations":Infinity}}"#,
        )
        .unwrap();

    // The damaged row is skipped by the scan and repaired by the audit it triggers
    let first = manager.get_components(QueryFilter::default()).await.unwrap();
    assert!(first.is_empty());
    assert_eq!(manager.backups().len(), 1);

    let second = manager.get_components(QueryFilter::default()).await.unwrap();
    assert_eq!(second.len(), 1);
    assert_eq!(second[0].payload["params"], json!({}));
}

#[tokio::test]
async fn detached_snapshots_are_never_committed() {
    let provider = MemoryProvider::new();
    let manager = manager(&provider);
    manager.initialize().await;

    let mut snapshot = Snapshot::new();
    snapshot.push(
        StoreName::Quotes,
        SnapshotRecord::from_raw(RecordId::Seq(7), r#"{"timestamps":{"created":"soon"}}"#, 0, 3),
    );

    let report = manager.check_snapshot(snapshot).await.unwrap();
    assert!(!report.committed);
    assert!(!report.repair.unwrap().applied_repairs.is_empty());
    assert!(manager
        .get_quotes(QueryFilter::default())
        .await
        .unwrap()
        .is_empty());
}

#[tokio::test]
async fn unrecoverable_text_is_reported() {
    let provider = MemoryProvider::new();
    let manager = manager(&provider);
    manager.initialize().await;

    let mut snapshot = Snapshot::new();
    snapshot.push(
        StoreName::Components,
        SnapshotRecord::from_raw(RecordId::Seq(1), "{{{{", 0, 3),
    );

    let err = manager.check_snapshot(snapshot).await.unwrap_err();
    assert!(matches!(err, StoreError::UnrepairableCorruption { .. }));
    assert_eq!(manager.backups().len(), 1);
}

#[test]
fn backups_are_bounded_to_the_newest() {
    let backups = BackupManager::in_memory(10);
    let mut ids = Vec::new();
    for i in 0..15 {
        let mut snapshot = Snapshot::new();
        snapshot.push(
            StoreName::Settings,
            SnapshotRecord::from_value(RecordId::from("n"), &json!({ "key": "n", "value": i }), i),
        );
        ids.push(backups.create_backup(&snapshot, "manual").unwrap().id);
    }

    assert_eq!(backups.len(), 10);
    let kept: Vec<_> = backups.list_backups().into_iter().map(|b| b.id).collect();
    for id in &ids[5..] {
        assert!(kept.contains(id));
    }
    assert!(matches!(
        backups.restore_backup(ids[0]),
        Err(StoreError::NotFound { .. })
    ));
}

#[tokio::test]
async fn writes_made_during_a_check_survive_its_repairs() {
    let provider = MemoryProvider::new();
    let manager = manager(&provider);
    manager.initialize().await;

    let quote = manager
        .save_quote(json!({ "project": { "customerName": "OLD", "projectName": "HQ" } }))
        .await
        .unwrap()
        .record
        .id;
    let mut damaged = Vec::new();
    for _ in 0..3 {
        let id = manager
            .save_component(json!({ "componentType": "sensors" }))
            .await
            .unwrap()
            .record
            .id;
        provider
            .write_raw(StoreName::Components, id.clone(), DAMAGED_COMPONENT)
            .unwrap();
        damaged.push(id);
    }
    let (rewritten, deleted, left) = (damaged[0].clone(), damaged[1].clone(), damaged[2].clone());

    let live = WriteAfterExport {
        manager: manager.clone(),
        between: Box::new({
            let (manager, provider) = (manager.clone(), provider.clone());
            let (quote, rewritten, deleted) = (quote.clone(), rewritten.clone(), deleted.clone());
            move || {
                let (manager, provider) = (manager.clone(), provider.clone());
                let (quote, rewritten, deleted) = (quote.clone(), rewritten.clone(), deleted.clone());
                async move {
                    manager
                        .update_quote(quote, json!({ "project": { "customerName": "NEW", "projectName": "HQ" } }))
                        .await
                        .unwrap();
                    provider
                        .write_raw(
                            StoreName::Components,
                            rewritten,
                            r#"{"componentType":"locations","enabled":false,"params":{"locations":4}}"#,
                        )
                        .unwrap();
                    manager.delete_record(StoreName::Components, &deleted).await.unwrap();
                }
                .boxed()
            }
        }),
    };
    let checker = DataIntegrityManager::new(manager.backups().clone(), ComponentCatalog::default());
    let report = checker.perform_integrity_check(CheckTarget::Live(&live)).await.unwrap();

    assert!(report.committed);
    assert_eq!(report.stale_records, 2);

    let quote = manager.get_record(StoreName::Quotes, &quote).await.unwrap().unwrap();
    assert_eq!(quote.payload["project"]["customerName"], json!("NEW"));

    let rewritten = manager
        .get_record(StoreName::Components, &rewritten)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(rewritten.payload["componentType"], json!("locations"));
    assert_eq!(rewritten.payload["params"]["locations"], json!(4));

    assert!(manager
        .get_record(StoreName::Components, &deleted)
        .await
        .unwrap()
        .is_none());

    let repaired = manager.get_record(StoreName::Components, &left).await.unwrap().unwrap();
    assert_eq!(repaired.payload["params"], json!({}));
}

#[tokio::test]
async fn repairs_keep_numbers_exact() {
    let provider = MemoryProvider::new();
    let manager = manager(&provider);
    manager.initialize().await;

    let clean = manager
        .save_component(json!({
            "componentType": "support",
            "enabled": false,
            "params": { "serial": 9007199254740993u64, "ratio": 0.1 }
        }))
        .await
        .unwrap()
        .record
        .id;
    let damaged = manager
        .save_component(json!({ "componentType": "sensors" }))
        .await
        .unwrap()
        .record
        .id;
    provider
        .write_raw(
            StoreName::Components,
            damaged.clone(),
            r#"{"componentType":"sensors","enabled":true,"params":{"sensors":NaN},"serial":9007199254740993,"max":18446744073709551615,"ratio":2.0}"#,
        )
        .unwrap();

    let report = manager.run_integrity_check().await.unwrap();
    assert!(report.committed);

    let clean = manager.get_record(StoreName::Components, &clean).await.unwrap().unwrap();
    assert_eq!(clean.payload["params"]["serial"].as_u64(), Some(9007199254740993));
    assert_eq!(clean.payload["params"]["ratio"], json!(0.1));

    let repaired = manager.get_record(StoreName::Components, &damaged).await.unwrap().unwrap();
    assert_eq!(repaired.payload["params"], json!({}));
    assert_eq!(repaired.payload["serial"].as_u64(), Some(9007199254740993));
    assert_eq!(repaired.payload["max"].as_u64(), Some(u64::MAX));
    assert!(repaired.payload["ratio"].is_f64());
    assert_eq!(repaired.payload["ratio"].as_f64(), Some(2.0));
}
