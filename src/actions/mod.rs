//! Built-in action handlers.
//!
//! | type                          | category  | handler                            |
//! |-------------------------------|-----------|------------------------------------|
//! | `count`                       | composite | [`count::Repeat`]                  |
//! | `sleep`                       | composite | [`sleep::Delay`]                   |
//! | `stage`                       | composite | [`stage::StageScan`]               |
//! | `piezo`, `ThorlabsPiezoStage` | composite | [`stage::StageScan::piezo`]        |
//! | `a2d`, `A2D`                  | leaf      | [`a2d::Acquire`]                   |
//! | `beep`                        | leaf      | [`beep::Beep`]                     |
//! | `camera`                      | leaf      | [`camera::CameraCapture`]          |
//!
//! Hardware-facing handlers acquire their device from the shared
//! [`ConnectionManager`](crate::hardware::ConnectionManager) during setup and
//! release it during cleanup. A handler whose setup fails after acquiring a device
//! releases it before returning, since a node that never became ready is not cleaned
//! up.

pub mod a2d;
pub mod beep;
pub mod camera;
pub mod count;
pub mod sleep;
pub mod stage;

use crate::action::ActionContext;
use crate::error::ActionError;
use crate::hardware::{DeviceId, DeviceKind};
use tracing::warn;

/// Release one reference to `kind:channel`.
pub(crate) async fn release(
    ctx: &ActionContext,
    kind: DeviceKind,
    channel: &str,
) -> Result<(), ActionError> {
    ctx.connections
        .release(&DeviceId::new(kind, channel))
        .await
        .map_err(ActionError::resource)
}

/// Release a device acquired by a setup that is failing with `err`, and return `err`.
///
/// A failing release is only logged; `err` is still returned.
pub(crate) async fn abandon(
    ctx: &ActionContext,
    kind: DeviceKind,
    channel: &str,
    err: ActionError,
) -> ActionError {
    if let Err(release_err) = release(ctx, kind, channel).await {
        warn!(device = %DeviceId::new(kind, channel), error = %release_err, "Release after failed setup also failed");
    }
    err
}
