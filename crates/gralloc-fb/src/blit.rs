//! Split-swap row copy for the software post path.
//!
//! The panel shows each row rotated: the part of a source row right of the
//! split column lands on the left of the screen, and the part left of it
//! lands on the right, one row higher. With `W` the width, `off = W/2 +
//! split_extra_px` and `s` the calibrated source row shift:
//!
//! ```text
//! pass 1, r in 1..H   dst[r-1][W-off .. W]  <- src[r-s][0   .. off]
//! pass 2, r in 0..H   dst[r  ][0 .. W-off]  <- src[r-s][off .. W  ]
//! ```
//!
//! Rows whose source index falls outside the source buffer are skipped.

use core::ops::Range;

use crate::config::BlitCalibration;
use crate::error::{Error, Result};

/// One contiguous pixel run to copy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Segment {
    /// Destination row.
    pub dst_row: usize,
    /// Destination column of the first pixel.
    pub dst_col: usize,
    /// Source row.
    pub src_row: usize,
    /// Source column of the first pixel.
    pub src_col: usize,
    /// Pixels in the run.
    pub pixels: usize,
}

/// Precomputed geometry of the split-swap transform.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SplitSwap {
    width: usize,
    height: usize,
    bytes_per_pixel: usize,
    stride: usize,
    split: usize,
    source_row_shift: usize,
}

impl SplitSwap {
    /// Plan a copy of a `width × height` frame with `stride` bytes per row
    /// in both buffers.
    pub fn new(
        width: u32,
        height: u32,
        bits_per_pixel: u32,
        stride: u32,
        calibration: BlitCalibration,
    ) -> Result<Self> {
        let to_usize = |v: u32| usize::try_from(v).map_err(|_| Error::InvalidArgument("geometry out of range"));
        let width = to_usize(width)?;
        let bytes_per_pixel = to_usize(bits_per_pixel / 8)?;
        let stride = to_usize(stride)?;
        let split = (width / 2).saturating_add(to_usize(calibration.split_extra_px)?);

        if bytes_per_pixel == 0 {
            return Err(Error::InvalidArgument("depth below one byte per pixel"));
        }
        if split >= width {
            return Err(Error::InvalidArgument("split column past the row end"));
        }
        match width.checked_mul(bytes_per_pixel) {
            Some(row) if row <= stride => {}
            _ => return Err(Error::InvalidArgument("row wider than stride")),
        }

        Ok(Self {
            width,
            height: to_usize(height)?,
            bytes_per_pixel,
            stride,
            split,
            source_row_shift: to_usize(calibration.source_row_shift)?,
        })
    }

    /// The split column (`W/2 + split_extra_px`).
    pub fn split(&self) -> usize {
        self.split
    }

    /// Source row feeding destination-pass row `r`, if any.
    pub fn source_row(&self, r: usize) -> Option<usize> {
        r.checked_sub(self.source_row_shift)
    }

    /// Every run the copy performs, in order.
    pub fn segments(&self) -> impl Iterator<Item = Segment> + '_ {
        let right = (1..self.height).filter_map(move |r| {
            Some(Segment {
                dst_row: r.checked_sub(1)?,
                dst_col: self.width.checked_sub(self.split)?,
                src_row: self.source_row(r)?,
                src_col: 0,
                pixels: self.split,
            })
        });
        let left = (0..self.height).filter_map(move |r| {
            Some(Segment {
                dst_row: r,
                dst_col: 0,
                src_row: self.source_row(r)?,
                src_col: self.split,
                pixels: self.width.checked_sub(self.split)?,
            })
        });
        right.chain(left)
    }

    fn byte_range(&self, row: usize, col: usize, pixels: usize) -> Option<Range<usize>> {
        let start = row
            .checked_mul(self.stride)?
            .checked_add(col.checked_mul(self.bytes_per_pixel)?)?;
        let end = start.checked_add(pixels.checked_mul(self.bytes_per_pixel)?)?;
        Some(start..end)
    }

    /// Destination byte range of `seg`.
    pub fn dst_range(&self, seg: &Segment) -> Option<Range<usize>> {
        self.byte_range(seg.dst_row, seg.dst_col, seg.pixels)
    }

    /// Source byte range of `seg`.
    pub fn src_range(&self, seg: &Segment) -> Option<Range<usize>> {
        self.byte_range(seg.src_row, seg.src_col, seg.pixels)
    }

    /// Run the copy. Returns the number of runs copied; runs that fall
    /// outside either buffer are skipped.
    pub fn apply(&self, dst: &mut [u8], src: &[u8]) -> usize {
        let mut copied = 0usize;
        for seg in self.segments() {
            let from = self.src_range(&seg).and_then(|r| src.get(r));
            let to = self.dst_range(&seg).and_then(|r| dst.get_mut(r));
            match (to, from) {
                (Some(to), Some(from)) => {
                    to.copy_from_slice(from);
                    copied = copied.saturating_add(1);
                }
                _ => tracing::trace!(?seg, "skipping run outside the buffers"),
            }
        }
        copied
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
#[allow(clippy::cast_possible_truncation, clippy::arithmetic_side_effects)]
mod tests {
    use super::*;

    fn cal(shift: u32) -> BlitCalibration {
        BlitCalibration {
            split_extra_px: 16,
            source_row_shift: shift,
        }
    }

    #[test]
    fn test_split_is_half_width_plus_16() {
        let plan = SplitSwap::new(100, 10, 16, 200, cal(0)).unwrap();
        assert_eq!(plan.split(), 66);
    }

    #[test]
    fn test_narrow_frame_rejected() {
        // 20 / 2 + 16 = 26 >= 20
        assert!(matches!(
            SplitSwap::new(20, 10, 16, 40, cal(0)),
            Err(Error::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_stride_must_hold_a_row() {
        assert!(SplitSwap::new(100, 10, 16, 199, cal(0)).is_err());
        assert!(SplitSwap::new(100, 10, 8, 100, cal(0)).is_ok());
    }

    #[test]
    fn test_segment_counts_with_and_without_shift() {
        let plan = SplitSwap::new(100, 12, 16, 200, cal(0)).unwrap();
        assert_eq!(plan.segments().count(), 11 + 12);

        let shifted = SplitSwap::new(100, 12, 16, 200, cal(10)).unwrap();
        // pass 1 keeps r in 10..12, pass 2 keeps r in 10..12
        assert_eq!(shifted.segments().count(), 2 + 2);
    }

    #[test]
    fn test_pixel_placement_without_shift() {
        let (w, h, bpp) = (40usize, 4usize, 2usize);
        let stride = w * bpp;
        let plan = SplitSwap::new(w as u32, h as u32, 16, stride as u32, cal(0)).unwrap();
        let off = plan.split();
        assert_eq!(off, 36);

        // Tag each source pixel with (row, col).
        let mut src = vec![0u8; stride * h];
        for r in 0..h {
            for c in 0..w {
                src[r * stride + c * bpp] = r as u8;
                src[r * stride + c * bpp + 1] = c as u8;
            }
        }
        let mut dst = vec![0xEEu8; stride * h];
        plan.apply(&mut dst, &src);

        let px = |r: usize, c: usize| (dst[r * stride + c * bpp], dst[r * stride + c * bpp + 1]);
        for r in 0..h {
            for c in 0..(w - off) {
                assert_eq!(px(r, c), (r as u8, (c + off) as u8), "left part r={r} c={c}");
            }
        }
        for r in 0..(h - 1) {
            for c in (w - off)..w {
                assert_eq!(
                    px(r, c),
                    ((r + 1) as u8, (c - (w - off)) as u8),
                    "right part r={r} c={c}"
                );
            }
        }
        // Last row's right part has no source.
        assert_eq!(px(h - 1, w - 1), (0xEE, 0xEE));
    }

    #[test]
    fn test_short_source_is_skipped_not_panicking() {
        let plan = SplitSwap::new(40, 4, 16, 80, cal(0)).unwrap();
        let src = vec![1u8; 80]; // one row only
        let mut dst = vec![0u8; 320];
        let copied = plan.apply(&mut dst, &src);
        // pass 2 row 0 only
        assert_eq!(copied, 1);
        assert!(dst[..8].iter().all(|b| *b == 1));
    }
}
