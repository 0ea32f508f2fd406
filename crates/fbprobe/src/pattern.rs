//! Test patterns.

/// Eight vertical colour bars: white, yellow, cyan, green, magenta, red,
/// blue, black.
const BARS: [(u8, u8, u8); 8] = [
    (0xFF, 0xFF, 0xFF),
    (0xFF, 0xFF, 0x00),
    (0x00, 0xFF, 0xFF),
    (0x00, 0xFF, 0x00),
    (0xFF, 0x00, 0xFF),
    (0xFF, 0x00, 0x00),
    (0x00, 0x00, 0xFF),
    (0x00, 0x00, 0x00),
];

/// Pack 8-bit channels into 5-6-5.
pub fn rgb565(r: u8, g: u8, b: u8) -> u16 {
    (u16::from(r >> 3) << 11) | (u16::from(g >> 2) << 5) | u16::from(b >> 3)
}

/// Geometry of the surface a pattern is drawn into.
#[derive(Debug, Clone, Copy)]
pub struct Surface {
    pub width: usize,
    pub height: usize,
    /// Bytes per row.
    pub stride: usize,
    pub bits_per_pixel: u32,
}

/// Fill `bytes` with colour bars scrolled left by `phase` bars.
///
/// 16 bpp writes little-endian 5-6-5, 32 bpp writes R, G, B, 0xFF. Other
/// depths are left untouched and return `false`.
pub fn color_bars(bytes: &mut [u8], surface: Surface, phase: usize) -> bool {
    let bpp = match surface.bits_per_pixel {
        16 => 2,
        32 => 4,
        _ => return false,
    };
    let bar_width = surface.width.checked_div(BARS.len()).unwrap_or(0).max(1);
    for row in bytes.chunks_mut(surface.stride.max(1)).take(surface.height) {
        for (x, px) in row.chunks_exact_mut(bpp).take(surface.width).enumerate() {
            let bar = x
                .checked_div(bar_width)
                .unwrap_or(0)
                .wrapping_add(phase)
                .checked_rem(BARS.len())
                .unwrap_or(0);
            let (r, g, b) = BARS.get(bar).copied().unwrap_or_default();
            if bpp == 2 {
                px.copy_from_slice(&rgb565(r, g, b).to_le_bytes());
            } else {
                px.copy_from_slice(&[r, g, b, 0xFF]);
            }
        }
    }
    true
}
