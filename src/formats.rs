//! Static V4L1 palette table.
//!
//! V4L1 identifies pixel layouts by a small palette index instead of a
//! four-character code. The table below maps each palette index to the code
//! consumers use and the bit depth the driver must report for it. Palettes
//! with no code are never offered or selected.

use crate::traits::FourCC;

/// One palette table entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SupportedEncoding {
    /// External code, `None` for palettes that cannot be selected.
    pub fourcc: Option<FourCC>,
    /// V4L1 palette index.
    pub palette: u16,
    /// Bits per pixel.
    pub depth: u16,
}

const fn entry(fourcc: Option<FourCC>, palette: u16, depth: u16) -> SupportedEncoding {
    SupportedEncoding {
        fourcc,
        palette,
        depth,
    }
}

/// Highest palette index defined by the protocol (`VIDEO_PALETTE_YUV410P`).
pub const MAX_PALETTE: u16 = 16;

// RGB component ordering is unspecified by the protocol; drivers
// conventionally place red in the most significant bits.
/// Palette table, indexed by palette number.
pub const FORMAT_TABLE: [SupportedEncoding; MAX_PALETTE as usize + 1] = [
    entry(None, 0, 0),
    entry(Some(FourCC::GREY), 1, 8),
    entry(Some(FourCC::HI240), 2, 8),
    entry(Some(FourCC::RGBP), 3, 16),
    entry(Some(FourCC::BGR3), 4, 24),
    entry(Some(FourCC::BGR4), 5, 32),
    entry(Some(FourCC::RGBO), 6, 16),
    entry(Some(FourCC::YUY2), 7, 16),
    entry(Some(FourCC::YUYV), 8, 16),
    entry(Some(FourCC::UYVY), 9, 16),
    // YUV420 packed: layout is driver specific
    entry(None, 10, 12),
    entry(Some(FourCC::Y41P), 11, 12),
    // Bt848 raw
    entry(None, 12, 0),
    entry(Some(FourCC::YUV422P), 13, 16),
    entry(Some(FourCC::YUV411P), 14, 12),
    entry(Some(FourCC::YU12), 15, 12),
    entry(Some(FourCC::YUV9), 16, 9),
];

/// Entries that carry an external code, in palette order.
pub fn selectable() -> impl Iterator<Item = &'static SupportedEncoding> {
    FORMAT_TABLE
        .iter()
        .skip(1)
        .filter(|encoding| encoding.fourcc.is_some())
}

/// Find the entry for an external code.
#[must_use]
pub fn lookup(fourcc: FourCC) -> Option<&'static SupportedEncoding> {
    selectable().find(|encoding| encoding.fourcc == Some(fourcc))
}

/// Find the entry for a palette index.
#[must_use]
pub fn by_palette(palette: u16) -> Option<&'static SupportedEncoding> {
    FORMAT_TABLE.get(usize::from(palette))
}

/// Bytes in one frame: `ceil(width * height * depth / 8)`.
#[must_use]
pub fn frame_len(width: u32, height: u32, depth: u16) -> usize {
    let bits = u64::from(width) * u64::from(height) * u64::from(depth);
    usize::try_from(bits.div_ceil(8)).unwrap_or(usize::MAX)
}
