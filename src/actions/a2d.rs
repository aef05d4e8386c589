//! `a2d`: acquire one block from a digitizer per run and append it to a CSV file.
//!
//! | keyword    | meaning                                   | default   |
//! |------------|-------------------------------------------|-----------|
//! | `channels` | input channel indices, in column order     | `0`       |
//! | `rate`     | sample rate in Hz (required)              |           |
//! | `range`    | input range in volts                      | `10.0`    |
//! | `samples`  | samples per channel per run               | `1000`    |
//! | `device`   | digitizer channel identity                | `dev0`    |
//! | `file`     | output file stem                          | `<filebase>_a2d` |
//!
//! The file has one row per sample: `run,sample,ch<i>...`, where `run` counts this
//! node's runs from 1. A second `a2d` without `file` writes `<filebase>_a2d2.csv`, and
//! so on. Several nodes may share one board; each reapplies its own settings before
//! every block.

use super::{abandon, release};
use crate::action::{Action, ActionContext, Children};
use crate::error::{ActionError, ScanResult};
use crate::hardware::{AcquisitionConfig, DeviceKind, Digitizer};
use crate::output::csv_writer;
use crate::parameters::ParameterStore;
use async_trait::async_trait;
use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};

/// Digitizer acquisition leaf.
#[derive(Default)]
pub struct Acquire {
    config: Option<AcquisitionConfig>,
    channel: Option<String>,
    device: Option<Arc<dyn Digitizer>>,
    writer: Option<csv::Writer<File>>,
    path: Option<PathBuf>,
    runs: usize,
}

impl Acquire {
    pub fn new() -> Self {
        Self::default()
    }

    /// Acquisition settings derived at setup.
    pub fn config(&self) -> Option<&AcquisitionConfig> {
        self.config.as_ref()
    }

    /// Output file, once setup has opened it.
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    fn config_from(params: &ParameterStore) -> Result<AcquisitionConfig, ActionError> {
        let channels = params.parse_list::<usize>("channels")?.unwrap_or_else(|| vec![0]);
        if channels.is_empty() {
            return Err(ActionError::Parameter(
                "'channels' requires at least one channel".to_string(),
            ));
        }
        let rate_hz = params
            .parse::<u32>("rate")?
            .ok_or_else(|| ActionError::Parameter("'rate' is required".to_string()))?;
        if rate_hz == 0 {
            return Err(ActionError::Parameter("'rate' must be positive".to_string()));
        }
        let range_volts: f64 = params.parse_or("range", 10.0)?;
        if !(range_volts.is_finite() && range_volts > 0.0) {
            return Err(ActionError::Parameter(format!(
                "'range' must be a positive voltage, got {range_volts}"
            )));
        }
        let samples: usize = params.parse_or("samples", 1000)?;
        if samples == 0 {
            return Err(ActionError::Parameter("'samples' must be positive".to_string()));
        }
        Ok(AcquisitionConfig {
            channels,
            rate_hz,
            range_volts,
            samples,
        })
    }

    async fn arm(
        device: &dyn Digitizer,
        config: &AcquisitionConfig,
        path: &Path,
    ) -> Result<csv::Writer<File>, ActionError> {
        let available = device.channel_count();
        if let Some(bad) = config.channels.iter().find(|&&c| c >= available) {
            return Err(ActionError::Parameter(format!(
                "channel {bad} out of range (device has {available} channels)"
            )));
        }
        device
            .configure(config)
            .await
            .map_err(ActionError::resource)?;

        let mut writer = csv_writer(path)?;
        let mut header = vec!["run".to_string(), "sample".to_string()];
        header.extend(config.channels.iter().map(|c| format!("ch{c}")));
        writer.write_record(&header)?;
        Ok(writer)
    }
}

#[async_trait]
impl Action for Acquire {
    async fn setup(
        &mut self,
        params: &ParameterStore,
        ctx: &ActionContext,
    ) -> Result<(), ActionError> {
        let config = Self::config_from(params)?;
        let channel = params.first("device").unwrap_or("dev0").to_string();
        let stem = ctx.output.claim(params.first("file"), "a2d").await?;
        let path = ctx.output.stem_file(&stem);

        let device = ctx
            .connections
            .acquire_digitizer(&channel)
            .await
            .map_err(ActionError::resource)?;
        let writer = match Self::arm(device.as_ref(), &config, &path).await {
            Ok(writer) => writer,
            Err(err) => return Err(abandon(ctx, DeviceKind::Digitizer, &channel, err).await),
        };

        info!(
            device = %channel,
            channels = ?config.channels,
            rate_hz = config.rate_hz,
            samples = config.samples,
            path = %path.display(),
            "A2D configured"
        );
        self.config = Some(config);
        self.channel = Some(channel);
        self.device = Some(device);
        self.writer = Some(writer);
        self.path = Some(path);
        self.runs = 0;
        Ok(())
    }

    async fn run(&mut self, children: &mut Children<'_>, ctx: &ActionContext) -> ScanResult<()> {
        let (Some(device), Some(writer), Some(config)) =
            (self.device.as_ref(), self.writer.as_mut(), self.config.as_ref())
        else {
            return Err(ActionError::Runtime("digitizer is not armed".to_string()).into());
        };

        // The board may be shared with another a2d node that configured it since.
        device
            .configure(config)
            .await
            .map_err(ActionError::runtime)?;
        let block = device.acquire().await.map_err(ActionError::runtime)?;
        self.runs += 1;
        let samples = block.first().map_or(0, Vec::len);
        for sample in 0..samples {
            let mut row = vec![self.runs.to_string(), sample.to_string()];
            row.extend(
                block
                    .iter()
                    .map(|data| data.get(sample).map(f64::to_string).unwrap_or_default()),
            );
            writer.write_record(&row).map_err(ActionError::from)?;
        }
        writer.flush().map_err(ActionError::from)?;
        debug!(run = self.runs, samples, "Acquired block");

        children.run_all(ctx).await
    }

    async fn cleanup(
        &mut self,
        _params: &ParameterStore,
        ctx: &ActionContext,
    ) -> Result<(), ActionError> {
        let mut outcome = Ok(());
        if let Some(mut writer) = self.writer.take() {
            outcome = writer.flush().map_err(ActionError::from);
        }
        self.device = None;
        if let Some(channel) = self.channel.take() {
            outcome = outcome.and(release(ctx, DeviceKind::Digitizer, &channel).await);
        }
        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store(lines: &[&str]) -> ParameterStore {
        let mut store = ParameterStore::new();
        for line in lines {
            let tokens: Vec<String> = line.split_whitespace().map(String::from).collect();
            store.record(&tokens);
        }
        store
    }

    #[test]
    fn test_config_defaults() {
        let config = Acquire::config_from(&store(&["rate 10000"])).unwrap();
        assert_eq!(config.channels, vec![0]);
        assert_eq!(config.rate_hz, 10000);
        assert_eq!(config.range_volts, 10.0);
        assert_eq!(config.samples, 1000);
    }

    #[test]
    fn test_rate_is_required() {
        let err = Acquire::config_from(&store(&["channels 0 1"])).unwrap_err();
        assert!(err.to_string().contains("'rate' is required"));
    }

    #[test]
    fn test_invalid_values_rejected() {
        let cases: [&[&str]; 5] = [
            &["rate 0"],
            &["rate 100", "samples 0"],
            &["rate 100", "range -5"],
            &["rate 100", "channels"],
            &["rate 100", "channels a"],
        ];
        for lines in cases {
            assert!(
                matches!(Acquire::config_from(&store(lines)), Err(ActionError::Parameter(_))),
                "{lines:?}"
            );
        }
    }
}
