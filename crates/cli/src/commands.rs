use std::collections::{BTreeSet, HashSet};
use std::path::Path;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use releve_core::FeedbackRecord;
use releve_engine::{BatchItem, Engine};
use rust_decimal::Decimal;
use serde::Serialize;

fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T> {
    let content = std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    serde_json::from_str(&content).with_context(|| format!("parsing {}", path.display()))
}

pub fn import(engine: &Engine, file: &Path, ledger_path: Option<&Path>, classify: bool) -> Result<()> {
    let content = std::fs::read(file).with_context(|| format!("reading {}", file.display()))?;
    let filename = file
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or_default();

    let mut ledger: BTreeSet<String> = match ledger_path {
        Some(path) if path.exists() => read_json(path)?,
        _ => BTreeSet::new(),
    };
    let lookup: HashSet<String> = ledger.iter().cloned().collect();
    let outcome = engine.ingest(filename, &content, &lookup)?;

    if classify {
        #[derive(Serialize)]
        struct Report<'a> {
            batch: &'a releve_core::ImportBatch,
            transactions: Vec<releve_engine::ClassifiedTransaction>,
        }
        print_json(&Report {
            batch: &outcome.batch,
            transactions: engine.classify_imported(&outcome),
        })?;
    } else {
        print_json(&outcome.batch)?;
    }

    if let Some(path) = ledger_path {
        ledger.extend(outcome.duplicate_keys());
        std::fs::write(path, serde_json::to_string_pretty(&ledger)?)
            .with_context(|| format!("writing {}", path.display()))?;
    }
    Ok(())
}

pub fn classify(engine: &Engine, label: &str, amount: Decimal, description: Option<&str>) -> Result<()> {
    print_json(&engine.classify(label, amount, description))
}

pub fn learn(engine: &Engine, feedback: &Path, out: Option<&Path>) -> Result<()> {
    let records: Vec<FeedbackRecord> = read_json(feedback)?;
    let count = records.len();
    for record in records {
        engine.submit_feedback(record);
    }
    let updated = engine.apply_learning();
    tracing::info!(records = count, updated = updated.len(), "feedback applied");

    let target = out.or(engine.settings().knowledge_base.as_deref());
    match target {
        Some(path) => engine.save_knowledge_base(path)?,
        None => tracing::warn!("no knowledge_base path configured; learned patterns are not saved"),
    }
    print_json(&engine.export_knowledge_base())
}

pub async fn reclassify(engine: &Engine, items: &Path) -> Result<()> {
    let items: Vec<BatchItem> = read_json(items)?;
    let pool = engine.start_jobs();
    let id = pool.submit_reclassification(items);

    let snapshot = loop {
        let Some(snapshot) = pool.job_status(id) else {
            bail!("job {id} disappeared");
        };
        if snapshot.status.is_finished() {
            break snapshot;
        }
        tracing::debug!(done = snapshot.done, total = snapshot.total, "reclassifying");
        tokio::time::sleep(Duration::from_millis(50)).await;
    };

    #[derive(Serialize)]
    struct Report {
        job: releve_engine::JobSnapshot,
        results: Option<releve_engine::JobResults>,
    }
    print_json(&Report {
        results: pool.job_results(id),
        job: snapshot,
    })?;
    pool.forget(id);
    pool.shutdown().await;
    Ok(())
}
