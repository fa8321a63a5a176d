//! Pixel encoding negotiation.
//!
//! Drivers are known to silently ignore or clamp picture requests, so every
//! set is followed by a query and only an exact palette and depth match
//! counts as accepted.

use tracing::{debug, trace};

use crate::formats::{self, SupportedEncoding};
use crate::traits::{CaptureError, ControlDevice, FourCC, Picture, Result, Window};

/// Encoding the device has verifiably accepted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Negotiated {
    /// External code.
    pub fourcc: FourCC,
    /// V4L1 palette index.
    pub palette: u16,
    /// Bits per pixel.
    pub depth: u16,
    /// Bytes in one frame at the negotiated window.
    pub frame_len: usize,
}

fn query_picture<D: ControlDevice>(device: &D) -> Result<Picture> {
    device
        .picture()
        .map_err(|err| CaptureError::system("querying video format (VIDIOCGPICT)", err))
}

const fn round_trips(picture: &Picture, encoding: &SupportedEncoding) -> bool {
    picture.palette == encoding.palette && picture.depth == encoding.depth
}

/// The code of the palette the device currently uses, if it has one.
pub fn current_encoding<D: ControlDevice>(device: &D) -> Result<Option<FourCC>> {
    let picture = query_picture(device)?;
    let fourcc = formats::by_palette(picture.palette).and_then(|encoding| encoding.fourcc);
    debug!(
        fourcc = ?fourcc,
        depth = picture.depth,
        palette = picture.palette,
        "current format"
    );
    Ok(fourcc)
}

/// Try every table entry and keep the ones that survive a round trip.
///
/// Leaves the device on whichever palette was tried last; callers must
/// negotiate their real encoding afterwards.
pub fn probe_supported_encodings<D: ControlDevice>(device: &D) -> Result<Vec<FourCC>> {
    let base = query_picture(device)?;
    let mut supported = Vec::new();

    for encoding in formats::selectable() {
        let Some(fourcc) = encoding.fourcc else {
            continue;
        };
        let request = Picture {
            palette: encoding.palette,
            depth: encoding.depth,
            ..base
        };
        if let Err(err) = device.set_picture(&request) {
            trace!(palette = encoding.palette, %fourcc, error = %err, "no (set fails)");
            continue;
        }
        match device.picture() {
            Ok(reported) if round_trips(&reported, encoding) => {
                trace!(palette = encoding.palette, %fourcc, "yes");
                supported.push(fourcc);
            }
            Ok(reported) => trace!(
                palette = encoding.palette,
                %fourcc,
                reported_palette = reported.palette,
                reported_depth = reported.depth,
                "no (set ignored)"
            ),
            Err(err) => trace!(palette = encoding.palette, %fourcc, error = %err, "no (query fails)"),
        }
    }

    debug!(count = supported.len(), "probed supported formats");
    Ok(supported)
}

/// Select `fourcc` on the device and compute the frame length for `window`.
///
/// Nothing is sent to the device when the code is missing or not in the
/// palette table.
pub fn set_encoding<D: ControlDevice>(
    device: &D,
    fourcc: Option<FourCC>,
    window: &Window,
) -> Result<Negotiated> {
    let fourcc = fourcc.ok_or(CaptureError::InvalidFormat {
        fourcc: None,
        reason: "no encoding selected",
    })?;
    let encoding = formats::lookup(fourcc).ok_or(CaptureError::InvalidFormat {
        fourcc: Some(fourcc),
        reason: "invalid v4l1 format",
    })?;

    let request = Picture {
        palette: encoding.palette,
        depth: encoding.depth,
        ..query_picture(device)?
    };
    device
        .set_picture(&request)
        .map_err(|err| CaptureError::system("setting format (VIDIOCSPICT)", err))?;

    let reported = query_picture(device)?;
    if !round_trips(&reported, encoding) {
        return Err(CaptureError::InvalidFormat {
            fourcc: Some(fourcc),
            reason: "failed to set format",
        });
    }

    let negotiated = Negotiated {
        fourcc,
        palette: encoding.palette,
        depth: encoding.depth,
        frame_len: formats::frame_len(window.width, window.height, encoding.depth),
    };
    debug!(
        %fourcc,
        depth = negotiated.depth,
        palette = negotiated.palette,
        size = negotiated.frame_len,
        "set new format"
    );
    Ok(negotiated)
}
