use std::io;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;

use intercom::pipeline::{IoOutcome, Stage};
use intercom::{AudioIo, Device, DeviceConfig, FrameSource};

/// Microphone stage for bench runs: a steady stream of silence.
struct SilentMic;

impl Stage for SilentMic {
    fn open(&mut self) -> intercom::Result<()> {
        Ok(())
    }

    fn close(&mut self) -> intercom::Result<()> {
        Ok(())
    }

    fn read(&mut self, buf: &mut [u8], _wait: Option<Duration>) -> IoOutcome {
        std::thread::sleep(Duration::from_millis(20));
        buf.fill(0);
        IoOutcome::Done(buf.len())
    }
}

/// Speaker stage for bench runs: discards received audio.
struct NullSpeaker;

impl Stage for NullSpeaker {
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

struct BenchAudio;

impl AudioIo for BenchAudio {
    fn mic(&self) -> Box<dyn Stage> {
        Box::new(SilentMic)
    }

    fn speaker(&self) -> Box<dyn Stage> {
        Box::new(NullSpeaker)
    }
}

/// Camera stand-in producing a counter-stamped synthetic frame.
struct PatternCamera {
    counter: u8,
}

impl FrameSource for PatternCamera {
    fn capture(&mut self) -> Option<Vec<u8>> {
        self.counter = self.counter.wrapping_add(1);
        Some(vec![self.counter; 4000])
    }
}

#[derive(Parser)]
#[command(
    name = "intercom-device",
    about = "Standalone intercom control-plane device with synthetic media sources"
)]
struct Args {
    /// Control bind address (host:port)
    #[arg(long, short, default_value = "0.0.0.0:12345")]
    bind: String,
}

fn main() {
    tracing_subscriber::fmt::init();

    let args = Args::parse();

    let config = DeviceConfig {
        control_bind: args.bind.clone(),
        ..DeviceConfig::default()
    };

    let mut device = match Device::new(
        config,
        Arc::new(BenchAudio),
        Box::new(PatternCamera { counter: 0 }),
    ) {
        Ok(device) => device,
        Err(e) => {
            eprintln!("Failed to create device: {}", e);
            return;
        }
    };

    if let Err(e) = device.start() {
        eprintln!("Failed to start device: {}", e);
        return;
    }

    println!("Intercom device on {} — press Enter to stop", args.bind);
    let mut input = String::new();
    io::stdin().read_line(&mut input).unwrap();

    device.stop();
}
