//! Ordering and exclusion guarantees of the resource workers, end to end.

mod common;

use std::sync::Mutex;
use std::thread;
use std::time::Duration;

use common::{boot, eventually};
use pingzee::config::{I2C_ADDR_EEPROM, SystemConfig};
use pingzee::drivers::lis3dh::{REG_OUT_X_L, REG_OUT_Y_L, REG_OUT_Z_L};
use pingzee::events::Axis;
use pingzee::platform::LineMode;
use pingzee::tasks::accel::{AccelCmd, AccelMsg};
use pingzee::tasks::display::DisplayMsg;
use pingzee::tasks::i2c::I2cMsg;
use pingzee::tasks::spi::SpiMsg;
use pingzee::tasks::worker::Done;

static SEEN: Mutex<Vec<u8>> = Mutex::new(Vec::new());

fn note(msg: &I2cMsg) {
    SEEN.lock().unwrap().push(msg.tx.buf[1]);
}

#[test]
fn requests_complete_in_submission_order() {
    let rig = boot(SystemConfig::default());
    for value in 1..=6u8 {
        let write = I2cMsg::write(I2C_ADDR_EEPROM, &[0x20, value]).unwrap();
        rig.sys.i2c.submit(write.with_done(Done::Notify(note)));
    }
    assert!(eventually(Duration::from_secs(2), || SEEN.lock().unwrap().len() == 6));
    assert_eq!(*SEEN.lock().unwrap(), vec![1, 2, 3, 4, 5, 6]);
    assert_eq!(rig.i2c.register(I2C_ADDR_EEPROM, 0x20), Some(6));
}

#[test]
fn locked_sequences_do_not_interleave() {
    let rig = boot(SystemConfig::default());
    let sys = rig.sys;
    let device = sys.spi.transaction(SpiMsg::add_device(4)).device.unwrap();
    rig.spi.take_transfers();

    let workers: Vec<_> = (0..3u8)
        .map(|id| {
            thread::spawn(move || {
                for _ in 0..10 {
                    let _bus = sys.spi.lock();
                    sys.spi.call(SpiMsg::transfer(device, LineMode::Command, &[id]).unwrap());
                    thread::yield_now();
                    sys.spi.call(SpiMsg::transfer(device, LineMode::Data, &[id]).unwrap());
                }
            })
        })
        .collect();
    for w in workers {
        w.join().unwrap();
    }

    let ours: Vec<_> = rig
        .spi
        .take_transfers()
        .into_iter()
        .filter(|t| t.device == device)
        .collect();
    assert_eq!(ours.len(), 60);
    for pair in ours.chunks(2) {
        assert_eq!(pair[0].mode, LineMode::Command);
        assert_eq!(pair[1].mode, LineMode::Data);
        assert_eq!(pair[0].bytes, pair[1].bytes);
    }
}

#[test]
fn accelerometer_polls_rotate_through_the_axes() {
    let rig = boot(SystemConfig::default());
    rig.i2c.set_axis_raw(REG_OUT_X_L, 100);
    rig.i2c.set_axis_raw(REG_OUT_Y_L, -200);
    rig.i2c.set_axis_raw(REG_OUT_Z_L, 15987);

    let seen: Vec<_> = (0..4)
        .map(|_| rig.sys.accel.transaction(AccelMsg::poll()).reading.unwrap())
        .map(|r| (r.axis, r.raw))
        .collect();
    assert_eq!(
        seen,
        vec![(Axis::X, 100), (Axis::Y, -200), (Axis::Z, 15987), (Axis::X, 100)]
    );
}

#[test]
fn accelerometer_is_detected_and_configured() {
    let rig = boot(SystemConfig::default());
    let found = rig.sys.accel.transaction(AccelMsg::new(AccelCmd::CheckPresent));
    assert!(found.present);
    let setup = rig.sys.accel.transaction(AccelMsg::new(AccelCmd::Setup(None)));
    assert_eq!(setup.status, Ok(()));
    // 50 Hz, XYZ on; motion interrupt on INT1.
    assert_eq!(rig.i2c.register(0x19, 0x20), Some(0x47));
    assert_eq!(rig.i2c.register(0x19, 0x22), Some(0x60));
}

#[test]
fn display_rejects_pages_outside_the_panel() {
    let rig = boot(SystemConfig::default());
    rig.spi.take_transfers();
    let reply = rig.sys.display.transaction(DisplayMsg::show(3, 0, "ok"));
    assert_eq!(reply.status, Ok(()));
    let sent = rig.spi.take_transfers();
    assert_eq!(sent.len(), 2);
    assert_eq!(sent[0].bytes, vec![0xB3, 0x10, 0x00]);
    assert_eq!(sent[1].mode, LineMode::Data);

    let reply = rig.sys.display.transaction(DisplayMsg::show(4, 0, "no"));
    assert!(reply.status.is_err());
    assert!(rig.spi.take_transfers().is_empty());
}
