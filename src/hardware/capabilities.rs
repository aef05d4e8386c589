//! Capability traits consumed by the built-in actions.
//!
//! Actions never talk to a vendor SDK directly. They acquire a [`DeviceHandle`]
//! from the [`ConnectionManager`](super::ConnectionManager) and drive it through
//! one of these traits. Connecting and disconnecting is the backend's job
//! ([`HardwareBackend::open`] / [`HardwareBackend::close`]).

use anyhow::Result;
use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// Multi-axis motion controller. Several axes may share one controller channel.
#[async_trait]
pub trait MotionController: Send + Sync {
    /// Move `axis` to an absolute position.
    async fn move_abs(&self, axis: &str, target: f64) -> Result<()>;

    /// Current position of `axis`.
    async fn position(&self, axis: &str) -> Result<f64>;

    /// Wait until `axis` has stopped moving.
    async fn wait_settled(&self, axis: &str) -> Result<()>;
}

/// Acquisition settings for a [`Digitizer`].
#[derive(Clone, Debug, PartialEq)]
pub struct AcquisitionConfig {
    /// Input channel indices, in output order.
    pub channels: Vec<usize>,
    /// Sample rate in Hz.
    pub rate_hz: u32,
    /// Input range in volts (±range).
    pub range_volts: f64,
    /// Samples per channel per block.
    pub samples: usize,
}

/// Analog-to-digital converter board.
#[async_trait]
pub trait Digitizer: Send + Sync {
    /// Number of physical input channels.
    fn channel_count(&self) -> usize;

    /// Arm the board with new acquisition settings.
    async fn configure(&self, config: &AcquisitionConfig) -> Result<()>;

    /// Acquire one block. Returns one vector of samples per configured channel.
    async fn acquire(&self) -> Result<Vec<Vec<f64>>>;
}

/// Audio output able to play a pure tone.
#[async_trait]
pub trait ToneGenerator: Send + Sync {
    /// Play a tone and return once it has finished.
    async fn play(&self, frequency_hz: f64, duration: Duration) -> Result<()>;
}

/// Monochrome frame captured by a [`Camera`].
#[derive(Clone, Debug, PartialEq)]
pub struct Frame {
    /// Width in pixels.
    pub width: u32,
    /// Height in pixels.
    pub height: u32,
    /// Row-major pixel data.
    pub pixels: Vec<u16>,
}

impl Frame {
    /// Pixel rows, top to bottom.
    pub fn rows(&self) -> impl Iterator<Item = &[u16]> {
        self.pixels.chunks(self.width.max(1) as usize)
    }
}

/// Scientific camera with software-triggered capture.
#[async_trait]
pub trait Camera: Send + Sync {
    /// Set exposure time in milliseconds.
    async fn set_exposure(&self, ms: f64) -> Result<()>;

    /// Set analog gain.
    async fn set_gain(&self, gain: f64) -> Result<()>;

    /// Capture a single frame.
    async fn capture(&self) -> Result<Frame>;
}

/// Device families the sequencer knows how to drive.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum DeviceKind {
    Motion,
    Digitizer,
    Tone,
    Camera,
}

impl fmt::Display for DeviceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DeviceKind::Motion => "motion",
            DeviceKind::Digitizer => "digitizer",
            DeviceKind::Tone => "tone",
            DeviceKind::Camera => "camera",
        };
        f.write_str(name)
    }
}

/// Identity of a shared physical resource: device family plus channel
/// (serial number, port, board name).
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct DeviceId {
    pub kind: DeviceKind,
    pub channel: String,
}

impl DeviceId {
    pub fn new(kind: DeviceKind, channel: impl Into<String>) -> Self {
        Self {
            kind,
            channel: channel.into(),
        }
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.kind, self.channel)
    }
}

/// An opened device, shared by every action that acquired the same [`DeviceId`].
#[derive(Clone)]
pub enum DeviceHandle {
    Motion(Arc<dyn MotionController>),
    Digitizer(Arc<dyn Digitizer>),
    Tone(Arc<dyn ToneGenerator>),
    Camera(Arc<dyn Camera>),
}

impl DeviceHandle {
    /// Family of the wrapped device.
    pub fn kind(&self) -> DeviceKind {
        match self {
            DeviceHandle::Motion(_) => DeviceKind::Motion,
            DeviceHandle::Digitizer(_) => DeviceKind::Digitizer,
            DeviceHandle::Tone(_) => DeviceKind::Tone,
            DeviceHandle::Camera(_) => DeviceKind::Camera,
        }
    }
}

impl fmt::Debug for DeviceHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "DeviceHandle({})", self.kind())
    }
}

/// Vendor-facing side of the hardware layer.
///
/// A backend opens and closes physical connections. It is only ever called by the
/// [`ConnectionManager`](super::ConnectionManager), which guarantees that each
/// [`DeviceId`] is opened at most once at a time.
#[async_trait]
pub trait HardwareBackend: Send + Sync {
    /// Channels of the given family that are currently attached.
    async fn discover(&self, kind: DeviceKind) -> Result<Vec<String>>;

    /// Connect to and initialize a device.
    async fn open(&self, id: &DeviceId) -> Result<DeviceHandle>;

    /// Disconnect a device previously returned by [`open`](Self::open).
    async fn close(&self, id: &DeviceId, handle: DeviceHandle) -> Result<()>;
}
