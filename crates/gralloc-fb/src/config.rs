//! Display configuration and constants
//!
//! Fixed protocol values live here as constants. Everything a board might
//! need to tune (device paths, buffer count, fallback metrics, the blit
//! calibration) lives in [`DisplayConfig`], which loads from JSON with every
//! field optional.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// The only device name [`crate::FramebufferDevice::open`] accepts.
pub const FB0: &str = "fb0";

/// Marker written to `reserved[0]` when an update rectangle is set ("UPDT").
pub const UPDATE_RECT_MAGIC: u32 = 0x5444_5055;

/// Device nodes tried in order when no configuration overrides them.
pub const DEFAULT_CANDIDATE_PATHS: [&str; 2] = ["/dev/graphics/fb0", "/dev/fb0"];

/// Buffers requested for page flipping.
pub const DEFAULT_NUM_BUFFERS: u32 = 2;

/// Refresh rate assumed when the driver reports no usable timings (60 Hz).
pub const DEFAULT_REFRESH_MHZ: u32 = 60_000;

/// Panel density assumed when the driver reports no physical size.
pub const DEFAULT_DPI: f32 = 160.0;

/// Millimetres per inch.
pub const MM_PER_INCH: f32 = 25.4;

/// Swap interval bounds. Both are fixed at one.
pub const MIN_SWAP_INTERVAL: i32 = 1;
/// See [`MIN_SWAP_INTERVAL`].
pub const MAX_SWAP_INTERVAL: i32 = 1;

/// Panel calibration for the software blit path.
///
/// The copy splits each row at `xres / 2 + split_extra_px` and swaps the
/// halves, reading from `source_row_shift` rows above the destination row.
/// Both values compensate for how the panel is wired and should be checked
/// against real hardware.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BlitCalibration {
    /// Pixels added to half the width to find the split column.
    pub split_extra_px: u32,
    /// Rows the source is read above the destination row.
    pub source_row_shift: u32,
}

impl Default for BlitCalibration {
    fn default() -> Self {
        Self {
            split_extra_px: 16,
            source_row_shift: 10,
        }
    }
}

/// Tunable display settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DisplayConfig {
    /// Device nodes tried in order; the first that opens wins.
    pub candidate_paths: Vec<PathBuf>,
    /// Virtual buffers requested (`yres_virtual = yres × num_buffers`).
    pub num_buffers: u32,
    /// Density used to synthesize a physical size the driver omits.
    pub default_dpi: f32,
    /// Refresh (mHz) used when the timing formula yields nothing.
    pub default_refresh_mhz: u32,
    /// Software blit calibration.
    pub blit: BlitCalibration,
}

impl Default for DisplayConfig {
    fn default() -> Self {
        Self {
            candidate_paths: DEFAULT_CANDIDATE_PATHS.iter().map(PathBuf::from).collect(),
            num_buffers: DEFAULT_NUM_BUFFERS,
            default_dpi: DEFAULT_DPI,
            default_refresh_mhz: DEFAULT_REFRESH_MHZ,
            blit: BlitCalibration::default(),
        }
    }
}

impl DisplayConfig {
    /// Parse and validate a JSON document. Missing fields take defaults.
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate a JSON file.
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).map_err(|source| Error::ConfigRead {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json_str(&text)
    }

    /// Reject settings negotiation cannot work with.
    pub fn validate(&self) -> Result<()> {
        if self.candidate_paths.is_empty() {
            return Err(Error::InvalidArgument("no candidate device paths"));
        }
        if self.num_buffers == 0 {
            return Err(Error::InvalidArgument("num_buffers must be at least 1"));
        }
        if !(self.default_dpi.is_finite() && self.default_dpi > 0.0) {
            return Err(Error::InvalidArgument("default_dpi must be positive"));
        }
        if self.default_refresh_mhz == 0 {
            return Err(Error::InvalidArgument("default_refresh_mhz must be positive"));
        }
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_stock_device() {
        let config = DisplayConfig::default();
        assert_eq!(
            config.candidate_paths,
            vec![PathBuf::from("/dev/graphics/fb0"), PathBuf::from("/dev/fb0")]
        );
        assert_eq!(config.num_buffers, 2);
        assert_eq!(config.default_refresh_mhz, 60_000);
        assert_eq!(config.blit.split_extra_px, 16);
        assert_eq!(config.blit.source_row_shift, 10);
        config.validate().unwrap();
    }

    #[test]
    fn test_partial_json_keeps_defaults() {
        let config = DisplayConfig::from_json_str(r#"{ "blit": { "source_row_shift": 0 } }"#)
            .unwrap();
        assert_eq!(config.blit.source_row_shift, 0);
        assert_eq!(config.blit.split_extra_px, 16);
        assert_eq!(config.num_buffers, 2);
    }

    #[test]
    fn test_invalid_values_rejected() {
        assert!(matches!(
            DisplayConfig::from_json_str(r#"{ "num_buffers": 0 }"#),
            Err(Error::InvalidArgument(_))
        ));
        assert!(matches!(
            DisplayConfig::from_json_str(r#"{ "candidate_paths": [] }"#),
            Err(Error::InvalidArgument(_))
        ));
        assert!(matches!(
            DisplayConfig::from_json_str("{ not json"),
            Err(Error::Config(_))
        ));
    }

    #[test]
    fn test_update_rect_magic_spells_updt() {
        assert_eq!(&UPDATE_RECT_MAGIC.to_be_bytes(), b"TDPU");
        assert_eq!(&UPDATE_RECT_MAGIC.to_le_bytes(), b"UPDT");
    }
}
