//! Capability query and capture window negotiation.

use tracing::{debug, warn};

use crate::traits::{Capability, CaptureError, ControlDevice, Result, Window};

/// Query the device and require capture support.
///
/// A device that cannot answer the capability request does not speak V4L1
/// at all, so both failure paths report [`CaptureError::Unsupported`].
pub fn probe_capability<D: ControlDevice>(device: &D) -> Result<Capability> {
    let caps = device.capability().map_err(|err| {
        CaptureError::Unsupported(format!(
            "video4linux version 1 not supported (VIDIOCGCAP): {err}"
        ))
    })?;

    debug!(
        name = %caps.name,
        capture = caps.can_capture,
        "capability ({} x {}) - ({} x {})",
        caps.min_width,
        caps.min_height,
        caps.max_width,
        caps.max_height
    );

    if !caps.can_capture {
        return Err(CaptureError::Unsupported(
            "v4l1 device does not support CAPTURE".to_owned(),
        ));
    }
    Ok(caps)
}

fn query_window<D: ControlDevice>(device: &D) -> Result<Window> {
    device.window().map_err(|err| {
        CaptureError::system("querying video window settings (VIDIOCGWIN)", err)
    })
}

/// Grow the capture window to `max`.
///
/// Returns the window the device reports afterwards. A rejected or shrunk
/// resize is not an error: the previous window is put back (best effort)
/// and re-queried. Only a failing window query is reported.
pub fn negotiate_window<D: ControlDevice>(device: &D, max: Window) -> Result<Window> {
    let current = query_window(device)?;
    debug!(window = %current, "current window");

    if current.width == max.width && current.height == max.height {
        return Ok(current);
    }

    let requested = Window {
        width: max.width,
        height: max.height,
        ..current
    };
    debug!(window = %requested, "setting max window");

    match device.set_window(&requested) {
        Ok(()) => {
            let applied = query_window(device)?;
            if applied.covers(&current) {
                return Ok(applied);
            }
            warn!(window = %applied, "window shrunk after resize");
        }
        Err(err) => warn!(error = %err, "window resize rejected"),
    }

    debug!("trying to restore the previous window");
    if let Err(err) = device.set_window(&current) {
        warn!(error = %err, "restoring window failed");
    }

    let restored = query_window(device)?;
    debug!(window = %restored, "final window");
    Ok(restored)
}
