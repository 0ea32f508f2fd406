//! Property-based tests for the screen-info ABI helpers and buffer handles.
#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
#![allow(clippy::cast_possible_wrap, clippy::cast_sign_loss)]

use fb_platform::{BufferFlags, BufferHandle, BufferUsage, FbFixScreenInfo, FbVarScreenInfo};

proptest::proptest! {
    /// The id never exceeds 15 bytes and always keeps a NUL terminator.
    #[test]
    fn id_is_truncated_and_terminated(id in "[a-zA-Z0-9_]{0,40}") {
        let mut fix = FbFixScreenInfo::default();
        fix.set_id(&id);
        let expected: String = id.chars().take(15).collect();
        assert_eq!(fix.id_str(), expected);
        assert_eq!(fix.id[15], 0);
    }

    /// Signed-negative or zero sizes are "not reported"; positives pass through.
    #[test]
    fn physical_size_sign_is_respected(raw in proptest::num::i32::ANY) {
        let var = FbVarScreenInfo { width: raw as u32, height: raw as u32, ..FbVarScreenInfo::default() };
        if raw > 0 {
            assert_eq!(var.physical_width_mm(), Some(raw as u32));
            assert_eq!(var.physical_height_mm(), Some(raw as u32));
        } else {
            assert_eq!(var.physical_width_mm(), None);
            assert_eq!(var.physical_height_mm(), None);
        }
    }

    /// Forcing 5-6-5 leaves geometry alone and always yields two bytes per pixel.
    #[test]
    fn rgb565_only_touches_the_layout(xres in 1u32..8192, yres in 1u32..8192, bpp in 0u32..64) {
        let mut var = FbVarScreenInfo { xres, yres, bits_per_pixel: bpp, ..FbVarScreenInfo::default() };
        var.set_rgb565();
        assert_eq!((var.xres, var.yres), (xres, yres));
        assert_eq!(var.bytes_per_pixel(), 2);
        assert_eq!(var.green.length, 6);
    }

    /// Only the live marker validates, whatever the other fields hold.
    #[test]
    fn handle_magic_decides_liveness(magic in proptest::num::u32::ANY, bits in 0u32..4, base in 0usize..1 << 20) {
        let h = BufferHandle::from_raw_parts(magic, BufferFlags::from_bits(bits), 64, 0, base);
        assert_eq!(h.has_valid_magic(), magic == BufferHandle::MAGIC);
        assert_eq!(h.is_framebuffer(), bits & 1 == 1);
    }
}

#[test]
fn reserved_words_are_cleared() {
    let mut var = FbVarScreenInfo {
        reserved: [0x5444_5055, 7, 9, 1],
        ..FbVarScreenInfo::default()
    };
    var.clear_reserved();
    assert_eq!(var.reserved, [0, 0, 0, 1]);
}

#[test]
fn usage_hints_used_for_blits() {
    assert!(BufferUsage::SW_READ_RARELY.reads());
    assert!(!BufferUsage::SW_READ_RARELY.writes());
    assert!(BufferUsage::SW_WRITE_RARELY.writes());
    assert!(!BufferUsage::SW_WRITE_RARELY.reads());
}
