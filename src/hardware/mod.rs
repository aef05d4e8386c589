//! Hardware capabilities and shared device connections.
//!
//! Vendor drivers are out of scope for the sequencer: actions see devices only
//! through the capability traits in [`capabilities`], obtained from a
//! [`ConnectionManager`] that reference-counts open channels. The
//! [`mock`] module provides a simulated backend used by the binary and by tests.

pub mod capabilities;
pub mod connections;
pub mod mock;

pub use capabilities::{
    AcquisitionConfig, Camera, DeviceHandle, DeviceId, DeviceKind, Digitizer, Frame,
    HardwareBackend, MotionController, ToneGenerator,
};
pub use connections::ConnectionManager;
pub use mock::SimulatedBackend;
