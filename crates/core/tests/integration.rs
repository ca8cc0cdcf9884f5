//! Integration tests: full control-channel scenarios over real sockets.
//!
//! Each test starts a device on its own fixed ports, connects TCP clients,
//! and exchanges 4-byte commands exactly as a remote client would.

use std::io::{Read, Write};
use std::net::TcpStream;
use std::sync::Arc;
use std::time::Duration;

use intercom::pipeline::{IoOutcome, Stage};
use intercom::{AudioIo, Command, Device, DeviceConfig, FrameSource};

/// Microphone stage producing a steady trickle of silence.
struct TestMic;

impl Stage for TestMic {
    fn open(&mut self) -> intercom::Result<()> {
        Ok(())
    }

    fn close(&mut self) -> intercom::Result<()> {
        Ok(())
    }

    fn read(&mut self, buf: &mut [u8], _wait: Option<Duration>) -> IoOutcome {
        std::thread::sleep(Duration::from_millis(2));
        let n = buf.len().min(64);
        buf[..n].fill(0);
        IoOutcome::Done(n)
    }
}

/// Speaker stage discarding everything it is given.
struct TestSpeaker;

impl Stage for TestSpeaker {
    fn open(&mut self) -> intercom::Result<()> {
        Ok(())
    }

    fn close(&mut self) -> intercom::Result<()> {
        Ok(())
    }

    fn write(&mut self, buf: &[u8], _wait: Option<Duration>) -> IoOutcome {
        IoOutcome::Done(buf.len())
    }
}

struct TestAudio;

impl AudioIo for TestAudio {
    fn mic(&self) -> Box<dyn Stage> {
        Box::new(TestMic)
    }

    fn speaker(&self) -> Box<dyn Stage> {
        Box::new(TestSpeaker)
    }
}

/// Camera yielding a fixed 4000-byte frame per capture.
struct TestCamera;

impl FrameSource for TestCamera {
    fn capture(&mut self) -> Option<Vec<u8>> {
        Some(vec![0x42; 4000])
    }
}

fn test_device(control_port: u16, audio_port: u16, video_port: u16) -> Device {
    let config = DeviceConfig {
        control_bind: format!("127.0.0.1:{control_port}"),
        audio_port,
        video_port,
        ..DeviceConfig::default()
    };
    let mut device = Device::new(config, Arc::new(TestAudio), Box::new(TestCamera))
        .expect("device construction");
    device.start().expect("device start");
    device
}

fn connect(control_port: u16) -> TcpStream {
    let stream = TcpStream::connect(("127.0.0.1", control_port)).expect("connect to device");
    stream
        .set_read_timeout(Some(Duration::from_secs(5)))
        .unwrap();
    stream
        .set_write_timeout(Some(Duration::from_secs(5)))
        .unwrap();
    stream
}

fn exchange(stream: &mut TcpStream, command: Command) -> Command {
    stream.write_all(&command.to_wire()).expect("send command");
    read_response(stream)
}

fn read_response(stream: &mut TcpStream) -> Command {
    let mut frame = [0u8; 4];
    stream.read_exact(&mut frame).expect("read response");
    Command::from_wire(frame).expect("known response code")
}

fn wait_until(what: &str, mut check: impl FnMut() -> bool) {
    for _ in 0..200 {
        if check() {
            return;
        }
        std::thread::sleep(Duration::from_millis(10));
    }
    panic!("timed out waiting for {what}");
}

#[test]
fn talk_arbitration_over_control_channel() {
    let mut device = test_device(18_345, 28_345, 28_346);

    let mut a = connect(18_345);
    let mut b = connect(18_345);

    // A gets the slot; B is denied while A holds it.
    assert_eq!(exchange(&mut a, Command::RequestTalk), Command::GrantTalk);
    assert!(device.is_talk_active());
    assert_eq!(exchange(&mut b, Command::RequestTalk), Command::DenyTalk);

    // Only the holder can end the session.
    assert_eq!(exchange(&mut b, Command::EndTalk), Command::TalkDidNotEnd);
    assert!(device.is_talk_active());
    assert_eq!(exchange(&mut a, Command::EndTalk), Command::TalkEnded);
    assert!(!device.is_talk_active());

    // The slot is free again for B.
    assert_eq!(exchange(&mut b, Command::RequestTalk), Command::GrantTalk);
    assert_eq!(exchange(&mut b, Command::EndTalk), Command::TalkEnded);

    device.stop();
}

#[test]
fn holder_disconnect_frees_slot_for_next_client() {
    let mut device = test_device(18_347, 28_347, 28_348);

    let mut a = connect(18_347);
    let mut b = connect(18_347);
    wait_until("both clients registered", || device.connected_clients() == 2);

    assert_eq!(exchange(&mut a, Command::RequestTalk), Command::GrantTalk);
    drop(a);
    wait_until("slot released after disconnect", || {
        !device.is_talk_active()
    });
    wait_until("client slot reclaimed", || device.connected_clients() == 1);

    assert_eq!(exchange(&mut b, Command::RequestTalk), Command::GrantTalk);
    assert_eq!(exchange(&mut b, Command::EndTalk), Command::TalkEnded);

    device.stop();
}

#[test]
fn doorbell_broadcast_reaches_every_connected_client() {
    let device = {
        let mut d = test_device(18_349, 28_349, 28_350);
        d.start().expect_err("second start must fail");
        d
    };

    let mut a = connect(18_349);
    let mut b = connect(18_349);
    wait_until("both clients registered", || device.connected_clients() == 2);

    assert_eq!(device.ring_doorbell(), 2);
    assert_eq!(read_response(&mut a), Command::DoorbellRing);
    assert_eq!(read_response(&mut b), Command::DoorbellRing);
}

#[test]
fn open_door_is_echoed_back() {
    let mut device = test_device(18_351, 28_351, 28_352);

    let mut a = connect(18_351);
    assert_eq!(exchange(&mut a, Command::OpenDoor), Command::OpenDoor);

    device.stop();
}

#[test]
fn unknown_command_is_ignored_and_connection_survives() {
    let mut device = test_device(18_353, 28_353, 28_354);

    let mut a = connect(18_353);
    a.write_all(&99u32.to_ne_bytes()).unwrap();

    // The connection is still serviced afterwards.
    assert_eq!(exchange(&mut a, Command::RequestTalk), Command::GrantTalk);
    assert_eq!(exchange(&mut a, Command::EndTalk), Command::TalkEnded);

    device.stop();
}

#[test]
fn connections_beyond_capacity_are_dropped() {
    let config = DeviceConfig {
        control_bind: "127.0.0.1:18355".to_string(),
        audio_port: 28_355,
        video_port: 28_356,
        max_clients: 2,
        ..DeviceConfig::default()
    };
    let mut device =
        Device::new(config, Arc::new(TestAudio), Box::new(TestCamera)).expect("device");
    device.start().expect("start");

    let _a = connect(18_355);
    let _b = connect(18_355);
    wait_until("both clients registered", || device.connected_clients() == 2);

    let mut c = connect(18_355);
    let mut buf = [0u8; 4];
    // The rejected connection is closed by the device: read returns EOF.
    match c.read(&mut buf) {
        Ok(0) => {}
        Ok(n) => panic!("expected EOF on rejected connection, got {n} bytes"),
        Err(e) => panic!("expected clean EOF, got {e}"),
    }

    device.stop();
}
