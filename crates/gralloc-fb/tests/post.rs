//! Posting: handle validation, page flips and the software blit fallback.
#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
#![allow(clippy::arithmetic_side_effects, clippy::cast_possible_truncation)]

use std::sync::Arc;

use fb_platform::mocks::{DriverCall, MockBufferMapper, MockFbDevice, MockOpener};
use fb_platform::{BufferFlags, BufferHandle, BufferUsage, FB_ACTIVATE_VBL};
use gralloc_fb::{
    BlitCalibration, DisplayConfig, DisplayModule, Error, FramebufferDevice, PostStrategy, FB0,
};

type Device = FramebufferDevice<Arc<MockFbDevice>, Arc<MockBufferMapper>>;

struct Rig {
    module: DisplayModule<MockOpener>,
    dev: Arc<MockFbDevice>,
    mapper: Arc<MockBufferMapper>,
}

impl Rig {
    fn new(dev: MockFbDevice, blit: BlitCalibration) -> Self {
        let dev = Arc::new(dev);
        let opener = MockOpener::new().with_device("/dev/graphics/fb0", Arc::clone(&dev));
        let config = DisplayConfig {
            blit,
            ..DisplayConfig::default()
        };
        Self {
            module: DisplayModule::new(opener, config),
            dev,
            mapper: Arc::new(MockBufferMapper::new()),
        }
    }

    fn open(&self) -> Device {
        FramebufferDevice::open(&self.module, FB0, Arc::clone(&self.mapper)).unwrap()
    }
}

fn flip_rig() -> Rig {
    Rig::new(MockFbDevice::panel(64, 16, 16), BlitCalibration::default())
}

fn unshifted() -> BlitCalibration {
    BlitCalibration {
        split_extra_px: 16,
        source_row_shift: 0,
    }
}

#[test]
fn invalid_handle_is_rejected_without_driver_io() {
    let rig = flip_rig();
    let mut device = rig.open();
    rig.dev.clear_calls();

    let stale = BufferHandle::from_raw_parts(0xDEAD_BEEF, BufferFlags::FRAMEBUFFER, 16, 0, 0);
    let err = device.post(&stale).unwrap_err();
    assert!(matches!(err, Error::InvalidArgument(_)));
    assert!(rig.dev.calls().is_empty(), "no driver I/O for an invalid handle");
    assert!(device.current_buffer().is_none());

    let freed = rig.mapper.allocate(64);
    rig.mapper.free(&freed);
    assert!(matches!(device.post(&freed), Err(Error::InvalidArgument(_))));
    assert!(rig.dev.calls().is_empty());
}

#[test]
fn flip_to_second_buffer_sets_yoffset() {
    let rig = flip_rig();
    let mut device = rig.open();
    let display = Arc::clone(device.display());
    let _front = display.allocate_framebuffer().unwrap();
    let back = display.allocate_framebuffer().unwrap();
    rig.dev.clear_calls();

    let strategy = device.post(&back).unwrap();
    assert_eq!(strategy, PostStrategy::Flip { yoffset: 16 });
    let puts = rig.dev.puts();
    assert_eq!(puts.len(), 1);
    assert_eq!(puts[0].yoffset, 16);
    assert_eq!(puts[0].activate, FB_ACTIVATE_VBL);
    assert_eq!(device.current_buffer(), Some(back));
}

#[test]
fn flip_offset_is_rows_from_base() {
    let rig = flip_rig();
    let mut device = rig.open();
    let region_base = device.display().region().base();
    let stride = device.display().region().stride();

    for k in [0usize, 3, 16] {
        let handle = BufferHandle::framebuffer(stride * 16, k * stride, region_base + k * stride);
        assert_eq!(
            device.post(&handle).unwrap(),
            PostStrategy::Flip { yoffset: k as u32 }
        );
    }
}

#[test]
fn misaligned_framebuffer_handle_is_invalid() {
    let rig = flip_rig();
    let mut device = rig.open();
    let base = device.display().region().base();
    let handle = BufferHandle::framebuffer(16, 3, base + 3);
    assert!(matches!(device.post(&handle), Err(Error::InvalidArgument(_))));
}

#[test]
fn buffer_in_mapping_slack_is_invalid_without_page_flip() {
    // 2000-byte buffer in a 4096-byte page; flipping refused by the driver.
    let rig = Rig::new(
        MockFbDevice::panel(100, 10, 16).rejecting_puts(1),
        BlitCalibration::default(),
    );
    let mut device = rig.open();
    let base = device.display().region().base();
    assert_eq!(device.display().region().len(), 4096);
    rig.dev.clear_calls();

    let slack = BufferHandle::framebuffer(2000, 2000, base + 2000);
    assert!(matches!(device.post(&slack), Err(Error::InvalidArgument(_))));
    let row_three = BufferHandle::framebuffer(2000, 600, base + 600);
    assert!(matches!(device.post(&row_three), Err(Error::InvalidArgument(_))));
    assert!(
        !rig.dev
            .calls()
            .iter()
            .any(|c| matches!(c, DriverCall::PutVariableInfo(_))),
        "no yoffset written past the only buffer"
    );

    let front = device.display().framebuffer_handle();
    assert_eq!(device.post(&front).unwrap(), PostStrategy::Flip { yoffset: 0 });
}

#[test]
fn rejected_flip_is_driver_write_error() {
    let rig = Rig::new(
        MockFbDevice::panel(64, 16, 16).with_put_script(&[
            fb_platform::mocks::PutOutcome::Accept,
            fb_platform::mocks::PutOutcome::Reject,
        ]),
        BlitCalibration::default(),
    );
    let mut device = rig.open();
    let front = device.display().framebuffer_handle();
    let err = device.post(&front).unwrap_err();
    assert!(matches!(err, Error::DriverWrite(_)));
    assert_eq!(err.errno(), -22);
    assert!(device.current_buffer().is_none());
    assert_eq!(rig.mapper.outstanding_locks(), 0);
}

#[test]
fn update_rect_travels_with_the_next_flip() {
    let rig = flip_rig();
    let mut device = rig.open();
    device.set_update_rect(4, 2, 10, 6).unwrap();
    let front = device.display().framebuffer_handle();
    device.post(&front).unwrap();

    let put = *rig.dev.puts().last().unwrap();
    assert_eq!(put.reserved[0], 0x5444_5055);
    assert_eq!(put.reserved[1], 4 | (2 << 16));
    assert_eq!(put.reserved[2], 14 | (8 << 16));
}

#[test]
fn blit_copies_with_split_swap_and_releases_locks() {
    let rig = Rig::new(MockFbDevice::panel(40, 4, 16), unshifted());
    let mut device = rig.open();
    let stride = 80usize;

    // Tag each source pixel with (row, col).
    let src = rig.mapper.allocate(stride * 4);
    let mut bytes = vec![0u8; stride * 4];
    for r in 0..4 {
        for c in 0..40 {
            bytes[r * stride + c * 2] = r as u8;
            bytes[r * stride + c * 2 + 1] = c as u8;
        }
    }
    rig.mapper.write(&src, &bytes);
    rig.dev.clear_calls();

    assert_eq!(device.post(&src).unwrap(), PostStrategy::Blit);
    assert!(rig.dev.calls().is_empty(), "blit does not touch the driver");
    assert!(device.current_buffer().is_none());

    let fb = device.display().region().as_bytes();
    let px = |r: usize, c: usize| (fb[r * stride + c * 2], fb[r * stride + c * 2 + 1]);
    let off = 36;
    assert_eq!(px(0, 0), (0, off as u8));
    assert_eq!(px(2, 3), (2, 39));
    assert_eq!(px(0, 4), (1, 0), "right part comes from the next source row");
    assert_eq!(px(2, 39), (3, 35));

    assert_eq!(rig.mapper.outstanding_locks(), 0);
    assert_eq!(rig.mapper.unlock_count(), 2);
    let usages: Vec<BufferUsage> = rig.mapper.locks().iter().map(|(_, u)| *u).collect();
    assert_eq!(
        usages,
        vec![BufferUsage::SW_WRITE_RARELY, BufferUsage::SW_READ_RARELY]
    );
}

#[test]
fn default_shift_reads_ten_rows_up() {
    let rig = Rig::new(MockFbDevice::panel(40, 12, 16), BlitCalibration::default());
    let mut device = rig.open();
    let stride = 80usize;

    let src = rig.mapper.allocate(stride * 12);
    let bytes: Vec<u8> = (0..stride * 12).map(|i| (i / stride) as u8 + 1).collect();
    rig.mapper.write(&src, &bytes);
    device.post(&src).unwrap();

    let fb = device.display().region().as_bytes();
    // Row 10 left part comes from source row 0; rows above it are untouched.
    assert_eq!(fb[10 * stride], 1);
    assert_eq!(fb[11 * stride], 2);
    assert_eq!(fb[0], 0);
    assert_eq!(fb[9 * stride], 0);
}

#[test]
fn failed_source_lock_releases_framebuffer_lock() {
    let rig = Rig::new(MockFbDevice::panel(40, 4, 16), unshifted());
    let mut device = rig.open();
    let src = rig.mapper.allocate(320);
    rig.mapper.fail_locks_for(&src);

    let err = device.post(&src).unwrap_err();
    assert!(matches!(err, Error::Lock(_)));
    assert_eq!(rig.mapper.outstanding_locks(), 0);
    assert_eq!(rig.mapper.unlock_count(), 1, "framebuffer lock released");
}

#[test]
fn narrow_panel_blit_is_invalid_geometry() {
    // 20 / 2 + 16 = 26 columns: the split lies past the row.
    let rig = Rig::new(MockFbDevice::panel(20, 4, 16), unshifted());
    let mut device = rig.open();
    let src = rig.mapper.allocate(160);
    assert!(matches!(device.post(&src), Err(Error::InvalidArgument(_))));
    assert_eq!(rig.mapper.outstanding_locks(), 0);
}

#[test]
fn driver_calls_for_flip_are_puts_only() {
    let rig = flip_rig();
    let mut device = rig.open();
    rig.dev.clear_calls();
    let front = device.display().framebuffer_handle();
    device.post(&front).unwrap();
    assert!(rig
        .dev
        .calls()
        .iter()
        .all(|c| matches!(c, DriverCall::PutVariableInfo(_))));
}
