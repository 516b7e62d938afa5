//! `courier replay`: push recorded webhook payloads through the pipeline.

use std::{path::PathBuf, sync::Arc};

use {
    courier_config::CourierConfig,
    courier_gateway::Stores,
    courier_ingest::{FanoutBus, IngestPipeline, IngestReport},
    tracing::warn,
};

pub async fn replay(config: &CourierConfig, files: &[PathBuf]) -> anyhow::Result<()> {
    let stores = Stores::open(&config.storage).await?;
    // Nobody subscribes during a replay; the bus only satisfies the pipeline.
    let pipeline = IngestPipeline::new(
        Arc::clone(&stores.messages),
        FanoutBus::new(config.fanout.queue_capacity),
    );

    let mut total = IngestReport::default();
    for path in files {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("failed to read {}: {e}", path.display()))?;
        let payload: serde_json::Value = match serde_json::from_str(&raw) {
            Ok(v) => v,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "skipping file that is not JSON");
                continue;
            },
        };
        let report = pipeline.ingest_payload(&payload).await?;
        println!("{}: {}", path.display(), describe(&report));
        accumulate(&mut total, &report);
    }

    if files.len() > 1 {
        println!("total: {}", describe(&total));
    }
    Ok(())
}

fn accumulate(total: &mut IngestReport, report: &IngestReport) {
    total.accepted += report.accepted;
    total.duplicates += report.duplicates;
    total.status_applied += report.status_applied;
    total.status_stale += report.status_stale;
    total.unmatched += report.unmatched;
    total.malformed += report.malformed;
    total.unsupported += report.unsupported;
    total.unrecognized += report.unrecognized;
}

fn describe(report: &IngestReport) -> String {
    format!(
        "{} accepted, {} duplicate, {} status applied, {} stale, {} unmatched, {} malformed, {} unsupported, {} unrecognized",
        report.accepted,
        report.duplicates,
        report.status_applied,
        report.status_stale,
        report.unmatched,
        report.malformed,
        report.unsupported,
        report.unrecognized,
    )
}
