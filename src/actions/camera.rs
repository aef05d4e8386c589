//! `camera`: capture one frame per run and save it as CSV.
//!
//! Parameters: `exposure` (ms, default 50), `gain` (default 1.0), `file` (output
//! stem, default `<filebase>_camera`, numbered for later cameras), `device` (default
//! `cam0`). Run `n` writes `<file>_<n>.csv`, one pixel row per line.

use super::{abandon, release};
use crate::action::{Action, ActionContext, Children};
use crate::error::{ActionError, ScanResult};
use crate::hardware::{Camera, DeviceKind, Frame};
use crate::output::csv_writer;
use crate::parameters::ParameterStore;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;

/// Frame capture leaf.
#[derive(Default)]
pub struct CameraCapture {
    /// Output stem claimed at setup.
    stem: Option<String>,
    channel: Option<String>,
    device: Option<Arc<dyn Camera>>,
    frames: usize,
}

impl CameraCapture {
    pub fn new() -> Self {
        Self::default()
    }

    /// Frames captured since setup.
    pub fn frames(&self) -> usize {
        self.frames
    }

    fn frame_path(&self, ctx: &ActionContext, index: usize) -> PathBuf {
        match &self.stem {
            Some(stem) => ctx.output.dir().join(format!("{stem}_{index}.csv")),
            None => ctx.output.numbered("camera", index),
        }
    }
}

fn write_frame(path: &Path, frame: &Frame) -> Result<(), ActionError> {
    let mut writer = csv_writer(path)?;
    for row in frame.rows() {
        writer.write_record(row.iter().map(u16::to_string))?;
    }
    writer.flush()?;
    Ok(())
}

#[async_trait]
impl Action for CameraCapture {
    async fn setup(
        &mut self,
        params: &ParameterStore,
        ctx: &ActionContext,
    ) -> Result<(), ActionError> {
        let exposure: f64 = params.parse_or("exposure", 50.0)?;
        let gain: f64 = params.parse_or("gain", 1.0)?;
        let channel = params.first("device").unwrap_or("cam0").to_string();
        let stem = ctx.output.claim(params.first("file"), "camera").await?;

        let device = ctx
            .connections
            .acquire_camera(&channel)
            .await
            .map_err(ActionError::resource)?;
        let configured = match device.set_exposure(exposure).await {
            Ok(()) => device.set_gain(gain).await,
            Err(err) => Err(err),
        };
        if let Err(err) = configured {
            let err = ActionError::Parameter(format!("{err:#}"));
            return Err(abandon(ctx, DeviceKind::Camera, &channel, err).await);
        }

        info!(device = %channel, exposure_ms = exposure, gain, "Camera configured");
        self.stem = Some(stem);
        self.channel = Some(channel);
        self.device = Some(device);
        self.frames = 0;
        Ok(())
    }

    async fn run(&mut self, children: &mut Children<'_>, ctx: &ActionContext) -> ScanResult<()> {
        let device = self
            .device
            .as_ref()
            .ok_or_else(|| ActionError::Runtime("camera is not open".to_string()))?;

        let frame = device.capture().await.map_err(ActionError::runtime)?;
        self.frames += 1;
        let path = self.frame_path(ctx, self.frames);
        write_frame(&path, &frame)?;
        info!(frame = self.frames, path = %path.display(), "Saved frame");

        children.run_all(ctx).await
    }

    async fn cleanup(
        &mut self,
        _params: &ParameterStore,
        ctx: &ActionContext,
    ) -> Result<(), ActionError> {
        self.device = None;
        match self.channel.take() {
            Some(channel) => release(ctx, DeviceKind::Camera, &channel).await,
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hardware::{ConnectionManager, SimulatedBackend};
    use crate::output::OutputTarget;

    #[test]
    fn test_frame_rows_written() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("frame.csv");
        let frame = Frame {
            width: 3,
            height: 2,
            pixels: vec![1, 2, 3, 4, 5, 6],
        };
        write_frame(&path, &frame).unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "1,2,3\n4,5,6\n");
    }

    #[test]
    fn test_frame_path_uses_file_stem() {
        let ctx = ActionContext::new(
            ConnectionManager::new(Arc::new(SimulatedBackend::instant())),
            OutputTarget::new("/data", "bead"),
        );
        let mut capture = CameraCapture::new();
        assert_eq!(
            capture.frame_path(&ctx, 2),
            PathBuf::from("/data/bead_camera_2.csv")
        );
        capture.stem = Some("focus".to_string());
        assert_eq!(capture.frame_path(&ctx, 1), PathBuf::from("/data/focus_1.csv"));
    }

    #[tokio::test]
    async fn test_rejected_exposure_releases_camera() {
        let backend = Arc::new(SimulatedBackend::instant());
        let connections = ConnectionManager::new(backend.clone());
        let ctx = ActionContext::new(connections.clone(), OutputTarget::new(".", "test"));

        let mut params = ParameterStore::new();
        params.insert("exposure", ["-1"]);
        let err = CameraCapture::new().setup(&params, &ctx).await.unwrap_err();
        assert!(matches!(err, ActionError::Parameter(_)));
        assert_eq!(connections.open_count().await, 0);
    }
}
