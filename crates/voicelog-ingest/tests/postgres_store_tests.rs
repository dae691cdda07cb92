//! `PgAggregateStore` against a real Postgres
//!
//! Requires Docker. Run with `cargo test -p voicelog-ingest -- --ignored`.

use anyhow::{Context, Result};
use std::sync::Arc;
use testcontainers::{core::IntoContainerPort, runners::AsyncRunner, ContainerAsync};
use testcontainers_modules::postgres::Postgres;
use tokio_util::sync::CancellationToken;
use voicelog_common::types::{HistoryEntry, RecordKind, StoredAggregate};
use voicelog_ingest::config::{PipelineConfig, StoreConfig};
use voicelog_ingest::driver::IngestionDriver;
use voicelog_ingest::source::MemorySource;
use voicelog_ingest::store::{AggregateStore, AppendOutcome, PgAggregateStore, PutOutcome};

struct TestStore {
    _container: ContainerAsync<Postgres>,
    store: PgAggregateStore,
}

async fn start() -> Result<TestStore> {
    let container = Postgres::default()
        .start()
        .await
        .context("Failed to start PostgreSQL container")?;
    let host = container.get_host().await?;
    let port = container.get_host_port_ipv4(5432.tcp()).await?;

    let config = StoreConfig {
        database_url: format!("postgresql://postgres:postgres@{}:{}/postgres", host, port),
        ..StoreConfig::default()
    };
    let store = PgAggregateStore::connect(&config)
        .await
        .context("Failed to connect to PostgreSQL")?;
    store.migrate().await.context("Failed to run migrations")?;

    Ok(TestStore {
        _container: container,
        store,
    })
}

fn entry(timestamp: &str, content: Option<&str>) -> HistoryEntry {
    HistoryEntry {
        timestamp: timestamp.to_string(),
        kind: if content.is_some() {
            RecordKind::Text
        } else {
            RecordKind::MissedCall
        },
        content: content.map(str::to_string),
        duration: content.is_none().then(|| "Unknown".to_string()),
        source_key: Some("export.html".to_string()),
    }
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn test_conditional_writes() -> Result<()> {
    let pg = start().await?;
    let store = &pg.store;

    let mut aggregate = StoredAggregate::new("+15551234567");
    aggregate.entries.push(entry("2023-03-01T10:15:00Z", Some("hello")));

    assert_eq!(store.put_if_absent(&aggregate).await?, PutOutcome::Inserted);
    assert_eq!(store.put_if_absent(&aggregate).await?, PutOutcome::AlreadyExists);

    let mut renamed = entry("2023-03-01T10:15:00Z", Some("hello"));
    renamed.source_key = Some("elsewhere.html".to_string());
    assert_eq!(
        store.append_entry("+15551234567", &renamed).await?,
        AppendOutcome::Duplicate
    );

    let missed = entry("2023-03-02T08:00:00Z", None);
    assert_eq!(
        store.append_entry("+15551234567", &missed).await?,
        AppendOutcome::Appended
    );
    assert_eq!(
        store.append_entry("+15551234567", &missed).await?,
        AppendOutcome::Duplicate
    );

    let stored = store.get_item("+15551234567").await?.context("aggregate missing")?;
    assert_eq!(stored.len(), 2);
    assert_eq!(stored.entries[1], missed);

    assert!(store.get_item("+15550000000").await?.is_none());
    Ok(())
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn test_append_creates_missing_aggregate() -> Result<()> {
    let pg = start().await?;

    let first = entry("2023-03-01T10:15:00Z", Some("hello"));
    assert_eq!(
        pg.store.append_entry("+15557654321", &first).await?,
        AppendOutcome::Appended
    );

    let stored = pg.store.get_item("+15557654321").await?.context("aggregate missing")?;
    assert_eq!(stored.entries, vec![first]);
    Ok(())
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn test_concurrent_appends_keep_every_event() -> Result<()> {
    let pg = start().await?;
    let store = Arc::new(pg.store);

    let tasks: Vec<_> = (0..16)
        .map(|second| {
            let store = Arc::clone(&store);
            tokio::spawn(async move {
                let timestamp = format!("2023-03-01T10:15:{second:02}Z");
                store
                    .append_entry("+15551234567", &entry(&timestamp, Some("burst")))
                    .await
            })
        })
        .collect();

    for task in tasks {
        assert_eq!(task.await??, AppendOutcome::Appended);
    }

    let stored = store.get_item("+15551234567").await?.context("aggregate missing")?;
    assert_eq!(stored.len(), 16);
    Ok(())
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn test_driver_over_postgres() -> Result<()> {
    let pg = start().await?;
    let store: Arc<dyn AggregateStore> = Arc::new(pg.store);

    let document = r#"<!DOCTYPE html><html><body><div class="hChatLog hfeed">
<div class="message"><abbr class="dt" title="2023-03-01T10:15:00.000-05:00">Mar 1</abbr>:
<cite class="sender vcard"><a class="tel" href="tel:+15551234567"><span class="fn">Alex</span></a></cite>:
<q>hello</q></div></div></body></html>"#;
    let source = MemorySource::new()
        .with_object("+15551234567 - Text - 2023-03-01T15_15_00Z.html", document);

    let driver = IngestionDriver::new(Arc::new(source), Arc::clone(&store), PipelineConfig::default())?;
    let first = driver.run_prefix("", CancellationToken::new()).await?;
    let second = driver.run_prefix("", CancellationToken::new()).await?;

    assert_eq!(first.records_inserted, 1);
    assert_eq!(second.records_duplicate, 1);

    let stored = store.get_item("+15551234567").await?.context("aggregate missing")?;
    assert_eq!(stored.entries[0].timestamp, "2023-03-01T15:15:00Z");
    Ok(())
}
