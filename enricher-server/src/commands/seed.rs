use std::path::Path;

use anyhow::Context;
use enricher_core::{
    producer::{SeedReport, seed_identifiers},
    store::RecordStore,
};
use enricher_model::BatchId;
use tracing::warn;

/// Insert one record per identifier line of `path` under `batch`.
pub async fn seed_file(
    store: &dyn RecordStore,
    batch: &str,
    path: &Path,
) -> anyhow::Result<SeedReport> {
    let batch = BatchId::new(batch)
        .with_context(|| format!("invalid batch id `{batch}`"))?;
    let contents = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("failed to read {}", path.display()))?;

    let report = seed_identifiers(store, &batch, contents.lines())
        .await
        .with_context(|| format!("failed to seed batch {batch}"))?;
    for (line, reason) in &report.skipped {
        warn!(path = %path.display(), line, %reason, "identifier skipped");
    }
    Ok(report)
}
