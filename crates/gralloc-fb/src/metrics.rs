//! Derived display metrics.
//!
//! Pure functions from driver-reported timings and sizes to refresh rate,
//! physical size and density. Degenerate driver data (zero pixel clock,
//! missing physical size) falls back to defaults instead of dividing by zero.

// Float conversions here are bounded by u32 screen geometry.
#![allow(clippy::cast_precision_loss)]
#![allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
// u128 sums of u32 fields cannot overflow; products are checked.
#![allow(clippy::arithmetic_side_effects)]

use fb_platform::FbVarScreenInfo;

use crate::config::MM_PER_INCH;

/// Picoseconds-per-second × millihertz-per-hertz.
const PS_MHZ_NUMERATOR: u128 = 1_000_000_000_000_000;

/// Refresh rate in millihertz from the VESA timing formula:
///
/// ```text
/// 1e15 / ((upper + lower + yres) × (left + right + xres) × pixclock)
/// ```
///
/// rounded to nearest. `None` when the product is zero (no pixel clock, as
/// under emulation) or the result rounds to zero.
pub fn refresh_mhz(var: &FbVarScreenInfo) -> Option<u32> {
    let v_total = u128::from(var.upper_margin) + u128::from(var.lower_margin) + u128::from(var.yres);
    let h_total = u128::from(var.left_margin) + u128::from(var.right_margin) + u128::from(var.xres);
    let quotient = v_total
        .checked_mul(h_total)?
        .checked_mul(u128::from(var.pixclock))?;
    if quotient == 0 {
        return None;
    }
    let rounded = PS_MHZ_NUMERATOR.checked_add(quotient / 2)? / quotient;
    u32::try_from(rounded).ok().filter(|mhz| *mhz > 0)
}

/// Physical size in millimetres for `res` pixels at `dpi`, rounded to
/// nearest and never below 1.
pub fn synthesize_mm(res: u32, dpi: f32) -> u32 {
    let mm = (res as f32 * MM_PER_INCH) / dpi + 0.5;
    (mm as u32).max(1)
}

/// Dots per inch for `res` pixels across `mm` millimetres.
pub fn dpi(res: u32, mm: u32) -> f32 {
    (res as f32 * MM_PER_INCH) / mm.max(1) as f32
}

/// Everything derived from one variable-info snapshot.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DisplayMetrics {
    /// Physical width in millimetres (reported or synthesized).
    pub width_mm: u32,
    /// Physical height in millimetres (reported or synthesized).
    pub height_mm: u32,
    /// Horizontal density.
    pub xdpi: f32,
    /// Vertical density.
    pub ydpi: f32,
    /// Refresh rate × 1000.
    pub refresh_mhz: u32,
    /// Refresh rate in Hz.
    pub fps: f32,
    /// `true` when the physical size was synthesized.
    pub size_synthesized: bool,
    /// `true` when the refresh rate is the default.
    pub refresh_defaulted: bool,
}

impl DisplayMetrics {
    /// Derive metrics from `var`, filling gaps with `default_dpi` and
    /// `default_refresh_mhz`.
    pub fn derive(var: &FbVarScreenInfo, default_dpi: f32, default_refresh_mhz: u32) -> Self {
        let computed = refresh_mhz(var);
        let refresh_mhz = computed.unwrap_or(default_refresh_mhz);

        let reported = var.physical_width_mm().zip(var.physical_height_mm());
        let (width_mm, height_mm) = reported.unwrap_or_else(|| {
            (
                synthesize_mm(var.xres, default_dpi),
                synthesize_mm(var.yres, default_dpi),
            )
        });

        Self {
            width_mm,
            height_mm,
            xdpi: dpi(var.xres, width_mm),
            ydpi: dpi(var.yres, height_mm),
            refresh_mhz,
            fps: refresh_mhz as f32 / 1000.0,
            size_synthesized: reported.is_none(),
            refresh_defaulted: computed.is_none(),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use super::*;

    fn timed(xres: u32, yres: u32, pixclock: u32) -> FbVarScreenInfo {
        FbVarScreenInfo {
            xres,
            yres,
            pixclock,
            left_margin: 40,
            right_margin: 24,
            upper_margin: 32,
            lower_margin: 11,
            ..FbVarScreenInfo::default()
        }
    }

    #[test]
    fn test_refresh_matches_vesa_formula() {
        // 1024x768 with a 15384 ps clock (~65 MHz)
        let var = timed(1024, 768, 15_384);
        let q = (32u128 + 11 + 768) * (40 + 24 + 1024) * 15_384;
        let expected = (1_000_000_000_000_000u128 + q / 2) / q;
        assert_eq!(refresh_mhz(&var), Some(expected as u32));
    }

    #[test]
    fn test_zero_pixclock_defaults_to_60hz() {
        let var = timed(800, 480, 0);
        assert_eq!(refresh_mhz(&var), None);
        let m = DisplayMetrics::derive(&var, 160.0, 60_000);
        assert_eq!(m.refresh_mhz, 60_000);
        assert!((m.fps - 60.0).abs() < f32::EPSILON);
        assert!(m.refresh_defaulted);
    }

    #[test]
    fn test_missing_physical_size_assumes_160dpi() {
        let var = timed(320, 480, 100_000);
        let m = DisplayMetrics::derive(&var, 160.0, 60_000);
        // 320 * 25.4 / 160 = 50.8 -> 51; 480 * 25.4 / 160 = 76.2 -> 76
        assert_eq!((m.width_mm, m.height_mm), (51, 76));
        assert!(m.size_synthesized);
        assert!((m.xdpi - 320.0 * 25.4 / 51.0).abs() < 1e-3);
    }

    #[test]
    fn test_reported_physical_size_is_kept() {
        let mut var = timed(480, 272, 100_000);
        var.width = 95;
        var.height = 54;
        let m = DisplayMetrics::derive(&var, 160.0, 60_000);
        assert_eq!((m.width_mm, m.height_mm), (95, 54));
        assert!(!m.size_synthesized);
    }

    #[test]
    fn test_tiny_resolution_never_yields_zero_mm() {
        assert_eq!(synthesize_mm(1, 160.0), 1);
        assert_eq!(synthesize_mm(0, 160.0), 1);
        assert!(dpi(0, 0).is_finite());
    }
}
