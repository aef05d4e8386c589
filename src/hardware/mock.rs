//! Simulated Hardware Implementations
//!
//! Provides in-process devices for running sequences without physical hardware.
//! All simulated devices use async-safe waiting (`tokio::time::sleep`, never
//! `std::thread::sleep`).
//!
//! # Available Devices
//!
//! - `SimulatedMotion` - Multi-axis controller with speed-based travel time
//! - `SimulatedDigitizer` - A2D board producing deterministic sine data
//! - `SimulatedTone` - Tone output that records what it played
//! - `SimulatedCamera` - Camera producing a gradient test pattern
//!
//! Devices persist inside the backend across open/close cycles, so a stage keeps
//! its position between two actions that use the same channel.

use anyhow::{bail, Result};
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::f64::consts::TAU;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tokio::time::{sleep, Duration};
use tracing::{debug, trace};

use super::capabilities::{
    AcquisitionConfig, Camera, DeviceHandle, DeviceId, DeviceKind, Digitizer, Frame,
    HardwareBackend, MotionController, ToneGenerator,
};
use crate::config::HardwareSettings;

// =============================================================================
// SimulatedMotion - Multi-axis Motion Controller
// =============================================================================

/// Simulated motion controller.
///
/// - Travel time = distance / speed
/// - Fixed settling time after each move
/// - Every axis starts at 0.0
pub struct SimulatedMotion {
    positions: RwLock<HashMap<String, f64>>,
    history: Mutex<Vec<(String, f64)>>,
    speed: f64,
    settle: Duration,
}

impl SimulatedMotion {
    pub fn new(speed: f64, settle: Duration) -> Self {
        Self {
            positions: RwLock::new(HashMap::new()),
            history: Mutex::new(Vec::new()),
            speed,
            settle,
        }
    }

    /// Every commanded `(axis, target)` in order.
    pub async fn history(&self) -> Vec<(String, f64)> {
        self.history.lock().await.clone()
    }

    /// Targets commanded on one axis, in order.
    pub async fn targets(&self, axis: &str) -> Vec<f64> {
        self.history
            .lock()
            .await
            .iter()
            .filter(|(a, _)| a == axis)
            .map(|(_, t)| *t)
            .collect()
    }

    /// Place an axis without recording a move.
    pub async fn set_position(&self, axis: &str, position: f64) {
        self.positions
            .write()
            .await
            .insert(axis.to_string(), position);
    }
}

#[async_trait]
impl MotionController for SimulatedMotion {
    async fn move_abs(&self, axis: &str, target: f64) -> Result<()> {
        if !target.is_finite() {
            bail!("Axis {}: target {} is not a finite position", axis, target);
        }
        let current = self.position(axis).await?;
        let travel =
            Duration::try_from_secs_f64((target - current).abs() / self.speed).unwrap_or_default();

        debug!(axis, from = current, to = target, ?travel, "Simulated move");
        sleep(travel).await;

        self.positions
            .write()
            .await
            .insert(axis.to_string(), target);
        self.history.lock().await.push((axis.to_string(), target));
        Ok(())
    }

    async fn position(&self, axis: &str) -> Result<f64> {
        Ok(self
            .positions
            .read()
            .await
            .get(axis)
            .copied()
            .unwrap_or(0.0))
    }

    async fn wait_settled(&self, axis: &str) -> Result<()> {
        trace!(axis, "Settling");
        sleep(self.settle).await;
        Ok(())
    }
}

// =============================================================================
// SimulatedDigitizer - A2D Board
// =============================================================================

/// Simulated digitizer. Channel `c` carries a sine of `c + 1` Hz at half range.
pub struct SimulatedDigitizer {
    channel_count: usize,
    config: RwLock<Option<AcquisitionConfig>>,
    blocks: Mutex<u64>,
}

impl SimulatedDigitizer {
    pub fn new(channel_count: usize) -> Self {
        Self {
            channel_count,
            config: RwLock::new(None),
            blocks: Mutex::new(0),
        }
    }

    /// Number of blocks acquired so far.
    pub async fn blocks(&self) -> u64 {
        *self.blocks.lock().await
    }
}

#[async_trait]
impl Digitizer for SimulatedDigitizer {
    fn channel_count(&self) -> usize {
        self.channel_count
    }

    async fn configure(&self, config: &AcquisitionConfig) -> Result<()> {
        if let Some(bad) = config.channels.iter().find(|&&c| c >= self.channel_count) {
            bail!(
                "Channel {} out of range (board has {} channels)",
                bad,
                self.channel_count
            );
        }
        *self.config.write().await = Some(config.clone());
        Ok(())
    }

    async fn acquire(&self) -> Result<Vec<Vec<f64>>> {
        let config = self.config.read().await.clone();
        let Some(config) = config else {
            bail!("Digitizer acquired before configure");
        };

        let mut blocks = self.blocks.lock().await;
        let offset = *blocks * config.samples as u64;
        *blocks += 1;

        let rate = f64::from(config.rate_hz);
        let data = config
            .channels
            .iter()
            .map(|&channel| {
                let freq = (channel + 1) as f64;
                (0..config.samples)
                    .map(|i| {
                        let t = (offset + i as u64) as f64 / rate;
                        0.5 * config.range_volts * (TAU * freq * t).sin()
                    })
                    .collect()
            })
            .collect();
        Ok(data)
    }
}

// =============================================================================
// SimulatedTone - Audio Output
// =============================================================================

/// Simulated tone output. Optionally waits the tone's nominal duration.
pub struct SimulatedTone {
    real_time: bool,
    played: Mutex<Vec<f64>>,
}

impl SimulatedTone {
    pub fn new(real_time: bool) -> Self {
        Self {
            real_time,
            played: Mutex::new(Vec::new()),
        }
    }

    /// Frequencies played so far, in order.
    pub async fn played(&self) -> Vec<f64> {
        self.played.lock().await.clone()
    }
}

#[async_trait]
impl ToneGenerator for SimulatedTone {
    async fn play(&self, frequency_hz: f64, duration: Duration) -> Result<()> {
        if frequency_hz <= 0.0 {
            bail!("Tone frequency must be positive, got {}", frequency_hz);
        }
        trace!(frequency_hz, ?duration, "Tone");
        if self.real_time {
            sleep(duration).await;
        }
        self.played.lock().await.push(frequency_hz);
        Ok(())
    }
}

// =============================================================================
// SimulatedCamera
// =============================================================================

/// Simulated camera producing a diagonal gradient scaled by exposure and gain.
pub struct SimulatedCamera {
    resolution: (u32, u32),
    exposure_ms: RwLock<f64>,
    gain: RwLock<f64>,
    frames: Mutex<u32>,
}

impl SimulatedCamera {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            resolution: (width, height),
            exposure_ms: RwLock::new(50.0),
            gain: RwLock::new(1.0),
            frames: Mutex::new(0),
        }
    }

    /// Total number of frames captured.
    pub async fn frame_count(&self) -> u32 {
        *self.frames.lock().await
    }

    /// Current exposure in milliseconds.
    pub async fn exposure_ms(&self) -> f64 {
        *self.exposure_ms.read().await
    }
}

#[async_trait]
impl Camera for SimulatedCamera {
    async fn set_exposure(&self, ms: f64) -> Result<()> {
        if ms <= 0.0 {
            bail!("Exposure must be positive, got {} ms", ms);
        }
        *self.exposure_ms.write().await = ms;
        Ok(())
    }

    async fn set_gain(&self, gain: f64) -> Result<()> {
        if gain <= 0.0 {
            bail!("Gain must be positive, got {}", gain);
        }
        *self.gain.write().await = gain;
        Ok(())
    }

    async fn capture(&self) -> Result<Frame> {
        let (width, height) = self.resolution;
        let scale = *self.exposure_ms.read().await * *self.gain.read().await;
        let pixels = (0..height)
            .flat_map(|y| (0..width).map(move |x| x + y))
            .map(|v| (f64::from(v) * scale).min(f64::from(u16::MAX)) as u16)
            .collect();

        *self.frames.lock().await += 1;
        Ok(Frame {
            width,
            height,
            pixels,
        })
    }
}

// =============================================================================
// SimulatedBackend
// =============================================================================

/// Hardware backend serving simulated devices.
pub struct SimulatedBackend {
    settings: HardwareSettings,
    motions: Mutex<HashMap<String, Arc<SimulatedMotion>>>,
    digitizers: Mutex<HashMap<String, Arc<SimulatedDigitizer>>>,
    tones: Mutex<HashMap<String, Arc<SimulatedTone>>>,
    cameras: Mutex<HashMap<String, Arc<SimulatedCamera>>>,
    rejected: Mutex<HashSet<DeviceId>>,
    opens: Mutex<HashMap<DeviceId, usize>>,
    closes: Mutex<HashMap<DeviceId, usize>>,
}

impl SimulatedBackend {
    pub fn new(settings: HardwareSettings) -> Self {
        Self {
            settings,
            motions: Mutex::new(HashMap::new()),
            digitizers: Mutex::new(HashMap::new()),
            tones: Mutex::new(HashMap::new()),
            cameras: Mutex::new(HashMap::new()),
            rejected: Mutex::new(HashSet::new()),
            opens: Mutex::new(HashMap::new()),
            closes: Mutex::new(HashMap::new()),
        }
    }

    /// Backend whose devices never wait: instant moves, no settling, silent tones.
    pub fn instant() -> Self {
        Self::new(HardwareSettings {
            stage_speed: f64::INFINITY,
            settle_ms: 0,
            real_time_audio: false,
            ..HardwareSettings::default()
        })
    }

    /// Make every future `open` of `id` fail, as if the device were unplugged.
    pub async fn reject(&self, id: DeviceId) {
        self.rejected.lock().await.insert(id);
    }

    pub async fn motion(&self, channel: &str) -> Option<Arc<SimulatedMotion>> {
        self.motions.lock().await.get(channel).cloned()
    }

    pub async fn digitizer(&self, channel: &str) -> Option<Arc<SimulatedDigitizer>> {
        self.digitizers.lock().await.get(channel).cloned()
    }

    pub async fn tone(&self, channel: &str) -> Option<Arc<SimulatedTone>> {
        self.tones.lock().await.get(channel).cloned()
    }

    pub async fn camera(&self, channel: &str) -> Option<Arc<SimulatedCamera>> {
        self.cameras.lock().await.get(channel).cloned()
    }

    /// How often `id` was opened.
    pub async fn open_calls(&self, id: &DeviceId) -> usize {
        self.opens.lock().await.get(id).copied().unwrap_or(0)
    }

    /// How often `id` was closed.
    pub async fn close_calls(&self, id: &DeviceId) -> usize {
        self.closes.lock().await.get(id).copied().unwrap_or(0)
    }

    async fn motion_device(&self, channel: &str) -> Arc<SimulatedMotion> {
        let settle = Duration::from_millis(self.settings.settle_ms);
        self.motions
            .lock()
            .await
            .entry(channel.to_string())
            .or_insert_with(|| Arc::new(SimulatedMotion::new(self.settings.stage_speed, settle)))
            .clone()
    }

    async fn digitizer_device(&self, channel: &str) -> Arc<SimulatedDigitizer> {
        self.digitizers
            .lock()
            .await
            .entry(channel.to_string())
            .or_insert_with(|| Arc::new(SimulatedDigitizer::new(self.settings.digitizer_channels)))
            .clone()
    }

    async fn tone_device(&self, channel: &str) -> Arc<SimulatedTone> {
        self.tones
            .lock()
            .await
            .entry(channel.to_string())
            .or_insert_with(|| Arc::new(SimulatedTone::new(self.settings.real_time_audio)))
            .clone()
    }

    async fn camera_device(&self, channel: &str) -> Arc<SimulatedCamera> {
        let [width, height] = self.settings.camera_resolution;
        self.cameras
            .lock()
            .await
            .entry(channel.to_string())
            .or_insert_with(|| Arc::new(SimulatedCamera::new(width, height)))
            .clone()
    }
}

impl Default for SimulatedBackend {
    fn default() -> Self {
        Self::new(HardwareSettings::default())
    }
}

#[async_trait]
impl HardwareBackend for SimulatedBackend {
    async fn discover(&self, kind: DeviceKind) -> Result<Vec<String>> {
        let found = match kind {
            DeviceKind::Motion => self.settings.piezo_serials.clone(),
            DeviceKind::Digitizer => vec!["dev0".to_string()],
            DeviceKind::Tone => vec!["default".to_string()],
            DeviceKind::Camera => vec!["cam0".to_string()],
        };
        Ok(found)
    }

    async fn open(&self, id: &DeviceId) -> Result<DeviceHandle> {
        if self.rejected.lock().await.contains(id) {
            bail!("Device {} not found", id);
        }
        *self.opens.lock().await.entry(id.clone()).or_default() += 1;

        let handle = match id.kind {
            DeviceKind::Motion => DeviceHandle::Motion(self.motion_device(&id.channel).await),
            DeviceKind::Digitizer => {
                DeviceHandle::Digitizer(self.digitizer_device(&id.channel).await)
            }
            DeviceKind::Tone => DeviceHandle::Tone(self.tone_device(&id.channel).await),
            DeviceKind::Camera => DeviceHandle::Camera(self.camera_device(&id.channel).await),
        };
        Ok(handle)
    }

    async fn close(&self, id: &DeviceId, _handle: DeviceHandle) -> Result<()> {
        *self.closes.lock().await.entry(id.clone()).or_default() += 1;
        Ok(())
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
