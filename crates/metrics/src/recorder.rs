//! Metrics recorder initialization.

use {anyhow::Result, tracing::info};

/// Handle to the installed recorder, used by the `/metrics` endpoint.
#[derive(Clone)]
pub struct MetricsHandle {
    #[cfg(feature = "prometheus")]
    prometheus_handle: metrics_exporter_prometheus::PrometheusHandle,
}

impl MetricsHandle {
    /// Render metrics in Prometheus text format (empty without the feature).
    #[must_use]
    pub fn render(&self) -> String {
        #[cfg(feature = "prometheus")]
        {
            self.prometheus_handle.render()
        }
        #[cfg(not(feature = "prometheus"))]
        {
            String::new()
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct MetricsRecorderConfig {
    pub enabled: bool,
    /// Labels attached to every metric (e.g. `instance`).
    pub global_labels: Vec<(String, String)>,
}

/// Install the global recorder. Call at most once per process.
///
/// Returns `None` when metrics are disabled, leaving the facade a no-op.
pub fn init_metrics(config: MetricsRecorderConfig) -> Result<Option<MetricsHandle>> {
    if !config.enabled {
        info!("metrics collection is disabled");
        return Ok(None);
    }

    #[cfg(feature = "prometheus")]
    {
        use metrics_exporter_prometheus::{Matcher, PrometheusBuilder};

        let mut builder = PrometheusBuilder::new().set_buckets_for_metric(
            Matcher::Suffix("_duration_seconds".to_string()),
            &crate::buckets::ENVELOPE_DURATION,
        )?;
        for (key, value) in config.global_labels {
            builder = builder.add_global_label(key, value);
        }
        let handle = builder.install_recorder()?;
        info!("prometheus metrics recorder installed");
        Ok(Some(MetricsHandle {
            prometheus_handle: handle,
        }))
    }

    #[cfg(not(feature = "prometheus"))]
    {
        info!("metrics requested but no exporter compiled in");
        Ok(Some(MetricsHandle {}))
    }
}
