//! `stage` and `piezo`: step a motion axis over a grid, running the enclosed actions
//! at every point.
//!
//! ```text
//! action stage
//!     axis_name X
//!     scan 0 2 6
//!     scan_mode absolute
//!     restore
//!     action a2d
//!         rate 10000
//!     end
//! end
//! ```
//!
//! `scan` takes `<start> <step> <end>`. `scan_mode` is `relative` (the default) or
//! `absolute`. `restore` moves the axis back to where it was found once the scan is
//! cleaned up.
//!
//! Each run moves to the next grid point (wrapping back to the first after the
//! last), waits for the axis to settle, then runs every child once. An enclosing
//! `count` therefore decides how many points are visited.
//!
//! Grid points are `reference + start + i * step` for
//! `i = 0..=floor((end - start) / step)`. The reference is 0 in absolute mode and the
//! position found at setup in relative mode. A range of more than
//! [`MAX_GRID_POINTS`] points is rejected at setup.
//!
//! Instead of `scan`, the range may be given as separate `start`, `step` and `stop`
//! lines (`end` closes the block, so it cannot name the last point).
//!
//! `piezo` is the same composite with the channel named by a controller serial
//! number (`serial_number`), auto-detected when exactly one controller is attached.

use super::{abandon, release};
use crate::action::{Action, ActionContext, Children};
use crate::error::{ActionError, ScanResult};
use crate::hardware::{DeviceKind, MotionController};
use crate::parameters::ParameterStore;
use async_trait::async_trait;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Slack applied before flooring the point count, so `0..=1` in steps of `0.1`
/// includes 1.
const GRID_EPSILON: f64 = 1e-9;

/// Largest grid a single scan may visit.
pub const MAX_GRID_POINTS: usize = 10_000_000;

/// How grid points relate to the stage position found at setup.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum ScanMode {
    /// Points are offsets from the starting position.
    #[default]
    Relative,
    /// Points are absolute positions.
    Absolute,
}

impl FromStr for ScanMode {
    type Err = ActionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "relative" => Ok(ScanMode::Relative),
            "absolute" => Ok(ScanMode::Absolute),
            other => Err(ActionError::Parameter(format!(
                "unknown scan mode '{other}' (expected 'relative' or 'absolute')"
            ))),
        }
    }
}

impl fmt::Display for ScanMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScanMode::Relative => f.write_str("relative"),
            ScanMode::Absolute => f.write_str("absolute"),
        }
    }
}

/// `start step end` of a scan.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ScanRange {
    pub start: f64,
    pub step: f64,
    pub end: f64,
}

impl ScanRange {
    fn validate(&self) -> Result<(), ActionError> {
        if ![self.start, self.step, self.end].iter().all(|v| v.is_finite()) {
            return Err(ActionError::Parameter(format!(
                "scan range {} {} {} must be finite",
                self.start, self.step, self.end
            )));
        }
        if self.step == 0.0 {
            return Err(ActionError::Parameter("scan step must not be 0".to_string()));
        }
        self.point_count().map(drop)
    }

    /// Number of grid points; 0 when `end` lies behind `start` in the direction of
    /// `step`.
    pub fn point_count(&self) -> Result<usize, ActionError> {
        let span = (self.end - self.start) / self.step;
        if span.is_nan() || span + GRID_EPSILON < 0.0 {
            return Ok(0);
        }
        let count = (span + GRID_EPSILON).floor() + 1.0;
        if count > MAX_GRID_POINTS as f64 {
            return Err(ActionError::Parameter(format!(
                "scan range {} {} {} has {count:e} points (at most {MAX_GRID_POINTS})",
                self.start, self.step, self.end
            )));
        }
        // Integral and within 1..=MAX_GRID_POINTS here.
        Ok(count as usize)
    }

    /// Grid points relative to `reference`.
    pub fn points(&self, reference: f64) -> Result<Vec<f64>, ActionError> {
        let count = self.point_count()?;
        Ok((0..count)
            .map(|i| reference + self.start + i as f64 * self.step)
            .collect())
    }
}

/// Grid points plus a cursor that wraps around.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ScanGrid {
    points: Vec<f64>,
    cursor: usize,
}

impl ScanGrid {
    pub fn new(points: Vec<f64>) -> Self {
        Self { points, cursor: 0 }
    }

    pub fn points(&self) -> &[f64] {
        &self.points
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// The point under the cursor; advances the cursor cyclically.
    pub fn advance(&mut self) -> Result<f64, ActionError> {
        let point = *self.points.get(self.cursor).ok_or(ActionError::EmptyGrid)?;
        self.cursor = (self.cursor + 1) % self.points.len();
        Ok(point)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum ChannelSource {
    /// `channel` keyword, default `stage0`.
    Named,
    /// `serial_number` keyword or discovery.
    PiezoSerial,
}

/// Scan-over-grid composite.
pub struct StageScan {
    source: ChannelSource,
    range: Option<ScanRange>,
    axis: String,
    mode: ScanMode,
    restore: bool,
    home: Option<f64>,
    grid: ScanGrid,
    channel: Option<String>,
    device: Option<Arc<dyn MotionController>>,
}

impl StageScan {
    /// Stage on the channel given by `channel`.
    pub fn new() -> Self {
        Self::with_source(ChannelSource::Named)
    }

    /// Piezo controller selected by `serial_number`.
    pub fn piezo() -> Self {
        Self::with_source(ChannelSource::PiezoSerial)
    }

    fn with_source(source: ChannelSource) -> Self {
        Self {
            source,
            range: None,
            axis: "X".to_string(),
            mode: ScanMode::default(),
            restore: false,
            home: None,
            grid: ScanGrid::default(),
            channel: None,
            device: None,
        }
    }

    pub fn grid(&self) -> &ScanGrid {
        &self.grid
    }

    pub fn mode(&self) -> ScanMode {
        self.mode
    }

    /// Channel held since setup.
    pub fn channel(&self) -> Option<&str> {
        self.channel.as_deref()
    }

    fn range_from(&self, params: &ParameterStore) -> Result<ScanRange, ActionError> {
        if let Some(range) = self.range {
            return Ok(range);
        }
        let start = params.parse::<f64>("start")?;
        let step = params.parse::<f64>("step")?;
        let end = params.parse::<f64>("stop")?;
        match (start, step, end) {
            (Some(start), Some(step), Some(end)) => Ok(ScanRange { start, step, end }),
            _ => Err(ActionError::Parameter(format!(
                "no scan range for {}-axis: give 'scan <start> <step> <end>' or 'start', 'step' and 'stop'",
                self.axis
            ))),
        }
    }

    async fn resolve_channel(
        &self,
        params: &ParameterStore,
        ctx: &ActionContext,
    ) -> Result<String, ActionError> {
        match self.source {
            ChannelSource::Named => Ok(params.first("channel").unwrap_or("stage0").to_string()),
            ChannelSource::PiezoSerial => {
                let attached = ctx
                    .connections
                    .discover(DeviceKind::Motion)
                    .await
                    .map_err(ActionError::resource)?;
                if attached.is_empty() {
                    return Err(ActionError::Resource("no piezo devices found".to_string()));
                }
                match params.first("serial_number") {
                    Some(serial) if attached.iter().any(|s| s == serial) => Ok(serial.to_string()),
                    Some(serial) => Err(ActionError::Parameter(format!(
                        "serial number {serial} not found (attached: {})",
                        attached.join(", ")
                    ))),
                    None if attached.len() == 1 => {
                        info!(serial = %attached[0], "Auto-detected piezo controller");
                        Ok(attached[0].clone())
                    }
                    None => Err(ActionError::Parameter(format!(
                        "several piezo controllers attached ({}); set 'serial_number'",
                        attached.join(", ")
                    ))),
                }
            }
        }
    }
}

impl Default for StageScan {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Action for StageScan {
    fn parse_line(
        &mut self,
        tokens: &[String],
        params: &mut ParameterStore,
    ) -> Result<(), ActionError> {
        if let Some(("scan", values)) = tokens.split_first().map(|(k, v)| (k.as_str(), v)) {
            let values = values
                .iter()
                .map(|t| t.parse::<f64>())
                .collect::<Result<Vec<_>, _>>()
                .map_err(|e| ActionError::Parameter(format!("invalid scan range: {e}")))?;
            let [start, step, end] = values[..] else {
                return Err(ActionError::Parameter(format!(
                    "'scan' takes <start> <step> <end>, got {} value(s)",
                    values.len()
                )));
            };
            self.range = Some(ScanRange { start, step, end });
        }
        params.record(tokens);
        Ok(())
    }

    async fn setup(
        &mut self,
        params: &ParameterStore,
        ctx: &ActionContext,
    ) -> Result<(), ActionError> {
        self.axis = params.first("axis_name").unwrap_or("X").to_string();
        self.mode = params
            .first("scan_mode")
            .or_else(|| params.first("mode"))
            .map(str::parse::<ScanMode>)
            .transpose()?
            .unwrap_or_default();
        self.restore = params.contains("restore");
        let range = self.range_from(params)?;
        range.validate()?;

        let channel = self.resolve_channel(params, ctx).await?;
        let device = ctx
            .connections
            .acquire_motion(&channel)
            .await
            .map_err(ActionError::resource)?;

        let home = if self.mode == ScanMode::Relative || self.restore {
            match device.position(&self.axis).await {
                Ok(position) => Some(position),
                Err(err) => {
                    let err = ActionError::resource(err);
                    return Err(abandon(ctx, DeviceKind::Motion, &channel, err).await);
                }
            }
        } else {
            None
        };
        let reference = match self.mode {
            ScanMode::Relative => home.unwrap_or(0.0),
            ScanMode::Absolute => 0.0,
        };

        let points = match range.points(reference) {
            Ok(points) => points,
            Err(err) => return Err(abandon(ctx, DeviceKind::Motion, &channel, err).await),
        };
        self.grid = ScanGrid::new(points);
        if self.grid.is_empty() {
            warn!(
                axis = %self.axis,
                start = range.start,
                step = range.step,
                end = range.end,
                "Scan grid is empty; running this stage will fail"
            );
        }
        info!(
            axis = %self.axis,
            channel = %channel,
            mode = %self.mode,
            points = self.grid.points().len(),
            "Stage scan configured"
        );

        self.home = home.filter(|_| self.restore);
        self.channel = Some(channel);
        self.device = Some(device);
        Ok(())
    }

    async fn run(&mut self, children: &mut Children<'_>, ctx: &ActionContext) -> ScanResult<()> {
        let point = self.grid.advance()?;
        let device = self
            .device
            .as_ref()
            .ok_or_else(|| ActionError::Runtime("stage is not connected".to_string()))?;

        debug!(axis = %self.axis, position = point, "Moving");
        device
            .move_abs(&self.axis, point)
            .await
            .map_err(ActionError::runtime)?;
        device
            .wait_settled(&self.axis)
            .await
            .map_err(ActionError::runtime)?;

        children.run_all(ctx).await
    }

    async fn cleanup(
        &mut self,
        _params: &ParameterStore,
        ctx: &ActionContext,
    ) -> Result<(), ActionError> {
        let mut outcome = Ok(());
        if let (Some(home), Some(device)) = (self.home, self.device.as_ref()) {
            info!(axis = %self.axis, position = home, "Restoring position");
            outcome = device
                .move_abs(&self.axis, home)
                .await
                .map_err(ActionError::runtime);
        }

        self.device = None;
        if let Some(channel) = self.channel.take() {
            let released = release(ctx, DeviceKind::Motion, &channel).await;
            outcome = outcome.and(released);
        }
        outcome
    }
}
