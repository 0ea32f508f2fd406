//! fbdev screen-info ABI
//!
//! `#[repr(C)]` mirrors of `struct fb_bitfield`, `struct fb_var_screeninfo`
//! and `struct fb_fix_screeninfo` from `linux/fb.h`, plus the ioctl request
//! numbers and activation flags this crate issues.
//!
//! # Reserved-field protocol
//!
//! Some panel drivers repurpose `fb_var_screeninfo::reserved[0..3]` as a
//! side channel for partial-update rectangles:
//!
//! ```text
//! reserved[0] = 0x5444_5055            "UPDT" marker
//! reserved[1] = left  | top    << 16   (16-bit packed)
//! reserved[2] = right | bottom << 16   (16-bit packed)
//! ```
//!
//! The negotiation baseline clears all three; see
//! [`FbVarScreenInfo::clear_reserved`].

use std::borrow::Cow;

// ── ioctl request numbers ────────────────────────────────────────────────────

/// Read `fb_var_screeninfo` from the driver.
pub const FBIOGET_VSCREENINFO: u32 = 0x4600;

/// Write `fb_var_screeninfo` to the driver (driver writes back the result).
pub const FBIOPUT_VSCREENINFO: u32 = 0x4601;

/// Read `fb_fix_screeninfo` from the driver.
pub const FBIOGET_FSCREENINFO: u32 = 0x4602;

// ── Activation flags ─────────────────────────────────────────────────────────

/// Apply the variable info immediately.
pub const FB_ACTIVATE_NOW: u32 = 0;

/// Apply the variable info at the next vertical blank (page flip).
pub const FB_ACTIVATE_VBL: u32 = 16;

// ── fb_bitfield ──────────────────────────────────────────────────────────────

/// One colour channel's position inside a packed pixel.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FbBitfield {
    /// Bit offset from the least significant bit.
    pub offset: u32,
    /// Channel width in bits.
    pub length: u32,
    /// Non-zero when the most significant bit is on the right.
    pub msb_right: u32,
}

impl FbBitfield {
    /// A left-aligned channel at `offset` spanning `length` bits.
    pub const fn new(offset: u32, length: u32) -> Self {
        Self {
            offset,
            length,
            msb_right: 0,
        }
    }
}

// ── fb_var_screeninfo ────────────────────────────────────────────────────────

/// Variable screen information (`struct fb_var_screeninfo`, 160 bytes).
///
/// Resolution, virtual size, pan offsets, pixel layout and video timings.
/// `pixclock` is the pixel period in picoseconds; margins are in pixel
/// clocks (horizontal) or lines (vertical). `width`/`height` are the
/// physical panel size in millimetres; drivers that do not know it report
/// `0` or `u32::MAX` (-1).
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FbVarScreenInfo {
    /// Visible horizontal resolution.
    pub xres: u32,
    /// Visible vertical resolution.
    pub yres: u32,
    /// Virtual horizontal resolution.
    pub xres_virtual: u32,
    /// Virtual vertical resolution (rows across all buffers).
    pub yres_virtual: u32,
    /// Horizontal pan offset.
    pub xoffset: u32,
    /// Vertical pan offset (the page-flip register).
    pub yoffset: u32,
    /// Bits per pixel.
    pub bits_per_pixel: u32,
    /// Non-zero for grayscale panels.
    pub grayscale: u32,
    /// Red channel layout.
    pub red: FbBitfield,
    /// Green channel layout.
    pub green: FbBitfield,
    /// Blue channel layout.
    pub blue: FbBitfield,
    /// Transparency channel layout.
    pub transp: FbBitfield,
    /// Non-zero for non-standard pixel formats.
    pub nonstd: u32,
    /// `FB_ACTIVATE_*` flags.
    pub activate: u32,
    /// Physical height in millimetres.
    pub height: u32,
    /// Physical width in millimetres.
    pub width: u32,
    /// Obsolete acceleration flags.
    pub accel_flags: u32,
    /// Pixel clock period in picoseconds.
    pub pixclock: u32,
    /// Time from sync to picture.
    pub left_margin: u32,
    /// Time from picture to sync.
    pub right_margin: u32,
    /// Time from sync to picture (vertical).
    pub upper_margin: u32,
    /// Time from picture to sync (vertical).
    pub lower_margin: u32,
    /// Horizontal sync length.
    pub hsync_len: u32,
    /// Vertical sync length.
    pub vsync_len: u32,
    /// `FB_SYNC_*` flags.
    pub sync: u32,
    /// `FB_VMODE_*` flags.
    pub vmode: u32,
    /// Counter-clockwise rotation angle.
    pub rotate: u32,
    /// Colourspace for FOURCC-based modes.
    pub colorspace: u32,
    /// Reserved; see the module docs for the update-rectangle protocol.
    pub reserved: [u32; 4],
}

impl FbVarScreenInfo {
    /// Force the 16-bit RGB 5-6-5 layout (red 11:5, green 5:6, blue 0:5,
    /// no alpha).
    pub fn set_rgb565(&mut self) {
        self.bits_per_pixel = 16;
        self.red = FbBitfield::new(11, 5);
        self.green = FbBitfield::new(5, 6);
        self.blue = FbBitfield::new(0, 5);
        self.transp = FbBitfield::new(0, 0);
    }

    /// Zero the three driver-specific reserved words.
    pub fn clear_reserved(&mut self) {
        self.reserved[0] = 0;
        self.reserved[1] = 0;
        self.reserved[2] = 0;
    }

    /// Bytes per pixel, rounded down (`bits_per_pixel / 8`).
    pub const fn bytes_per_pixel(&self) -> u32 {
        self.bits_per_pixel / 8
    }

    /// Physical width in millimetres, or `None` when the driver reports a
    /// non-positive value (the field is signed in practice).
    pub fn physical_width_mm(&self) -> Option<u32> {
        positive_mm(self.width)
    }

    /// Physical height in millimetres, or `None` when not reported.
    pub fn physical_height_mm(&self) -> Option<u32> {
        positive_mm(self.height)
    }
}

fn positive_mm(raw: u32) -> Option<u32> {
    i32::try_from(raw)
        .ok()
        .filter(|mm| *mm > 0)
        .and_then(|mm| u32::try_from(mm).ok())
}

// ── fb_fix_screeninfo ────────────────────────────────────────────────────────

/// Fixed screen information (`struct fb_fix_screeninfo`).
///
/// `line_length` is the stride in bytes and `smem_len` the size of the
/// mappable framebuffer memory.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FbFixScreenInfo {
    /// Driver identification string, NUL padded.
    pub id: [u8; 16],
    /// Physical start of framebuffer memory.
    pub smem_start: std::ffi::c_ulong,
    /// Length of framebuffer memory in bytes.
    pub smem_len: u32,
    /// `FB_TYPE_*`.
    pub type_: u32,
    /// Interleave for interleaved planes.
    pub type_aux: u32,
    /// `FB_VISUAL_*`.
    pub visual: u32,
    /// Hardware horizontal panning step, zero if none.
    pub xpanstep: u16,
    /// Hardware vertical panning step, zero if none.
    pub ypanstep: u16,
    /// Hardware y-wrap step, zero if none.
    pub ywrapstep: u16,
    /// Bytes per line (stride).
    pub line_length: u32,
    /// Physical start of memory-mapped I/O.
    pub mmio_start: std::ffi::c_ulong,
    /// Length of memory-mapped I/O.
    pub mmio_len: u32,
    /// Acceleration chip identifier.
    pub accel: u32,
    /// `FB_CAP_*` flags.
    pub capabilities: u16,
    /// Reserved for future compatibility.
    pub reserved: [u16; 2],
}

impl FbFixScreenInfo {
    /// The driver identification string up to the first NUL.
    pub fn id_str(&self) -> Cow<'_, str> {
        let end = self
            .id
            .iter()
            .position(|b| *b == 0)
            .unwrap_or(self.id.len());
        String::from_utf8_lossy(self.id.get(..end).unwrap_or_default())
    }

    /// Set the identification string (truncated to 15 bytes + NUL).
    pub fn set_id(&mut self, id: &str) {
        self.id = [0; 16];
        for (dst, src) in self.id.iter_mut().take(15).zip(id.bytes()) {
            *dst = src;
        }
    }
}
