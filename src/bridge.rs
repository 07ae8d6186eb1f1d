//! Drives the real devices through a helper process.
//!
//! The helper (typically a small script owning the GPIO servo, the LED
//! strip and the audio mixer) reads one command per line on stdin and
//! answers each with `OK` or `ERR <reason>` on stdout. `MOVE` is answered
//! as soon as the motion starts; the actuator handle waits out the duration
//! itself, without holding the pipe, so LED frames keep flowing meanwhile.

use std::io::{BufRead, BufReader, Write};
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};
use std::sync::{Arc, Mutex};
use std::thread;
use anyhow::{anyhow, Context, Result};
use tracing::{debug, info, warn};

use crate::hardware::{Actuator, AudioOutput, DriverError, DriverResult, LightStrip, MotionProfile, Rgb};
use crate::types::DeviceState;

#[derive(Debug, Clone, PartialEq)]
pub enum BridgeCommand {
    Move { position: DeviceState, profile: MotionProfile },
    Release,
    Leds(Vec<Rgb>),
    Play(String),
    Volume(f32),
    Ambient { track: String, volume: f32 },
    AmbientStop,
}

impl BridgeCommand {
    pub fn to_line(&self) -> String {
        match self {
            BridgeCommand::Move { position, profile } => format!(
                "MOVE {} {} {}",
                position,
                profile.duration.as_millis(),
                profile.easing.name()
            ),
            BridgeCommand::Release => "RELEASE".to_string(),
            BridgeCommand::Leds(frame) => {
                let mut line = format!("LEDS {}", frame.len());
                for c in frame {
                    line.push(' ');
                    line.push_str(&c.hex());
                }
                line
            }
            // Clip names are single tokens on the wire.
            BridgeCommand::Play(clip) => format!("PLAY {}", clip.replace(char::is_whitespace, "_")),
            BridgeCommand::Volume(v) => format!("VOLUME {:.2}", v),
            BridgeCommand::Ambient { track, volume } => {
                format!("AMBIENT {} {:.2}", track.replace(char::is_whitespace, "_"), volume)
            }
            BridgeCommand::AmbientStop => "AMBIENT_STOP".to_string(),
        }
    }
}

/// Parses one reply line.
pub fn parse_reply(command: &str, line: &str) -> DriverResult<()> {
    let line = line.trim();
    if line == "OK" {
        return Ok(());
    }
    let reason = line.strip_prefix("ERR").map(str::trim).unwrap_or(line);
    Err(DriverError::Rejected {
        command: command.to_string(),
        reason: if reason.is_empty() { "unspecified".to_string() } else { reason.to_string() },
    })
}

struct Channel {
    stdin: ChildStdin,
    stdout: BufReader<ChildStdout>,
}

impl Channel {
    fn send(&mut self, command: &BridgeCommand) -> DriverResult<()> {
        let line = command.to_line();
        debug!("bridge -> {}", line);
        writeln!(self.stdin, "{}", line)?;
        self.stdin.flush()?;

        let mut reply = String::new();
        if self.stdout.read_line(&mut reply)? == 0 {
            return Err(DriverError::Disconnected);
        }
        let verb = line.split(' ').next().unwrap_or_default();
        parse_reply(verb, &reply)
    }
}

/// The helper process. Clone the device handles out of it; they share the
/// one pipe, so commands from different devices never interleave.
pub struct HelperBridge {
    process: Child,
    channel: Arc<Mutex<Channel>>,
}

impl HelperBridge {
    pub fn spawn(command: &[String]) -> Result<Self> {
        let (program, args) = command.split_first().ok_or_else(|| anyhow!("helper command is empty"))?;
        let mut process = Command::new(program)
            .args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .spawn()
            .with_context(|| format!("Failed to start device helper `{}`", program))?;

        let stdin = process.stdin.take().context("helper stdin unavailable")?;
        let stdout = process.stdout.take().context("helper stdout unavailable")?;
        info!("Started device helper `{}` (pid {})", program, process.id());

        Ok(Self {
            process,
            channel: Arc::new(Mutex::new(Channel { stdin, stdout: BufReader::new(stdout) })),
        })
    }

    fn send(channel: &Mutex<Channel>, command: &BridgeCommand) -> DriverResult<()> {
        let mut channel = channel.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        channel.send(command)
    }

    pub fn actuator(&self) -> BridgeActuator {
        BridgeActuator { channel: self.channel.clone() }
    }

    pub fn strip(&self, len: usize) -> BridgeStrip {
        BridgeStrip { channel: self.channel.clone(), len }
    }

    pub fn audio(&self) -> BridgeAudio {
        BridgeAudio { channel: self.channel.clone() }
    }
}

impl Drop for HelperBridge {
    fn drop(&mut self) {
        if let Err(e) = self.process.kill() {
            warn!("Failed to stop device helper: {}", e);
        }
        let _ = self.process.wait();
    }
}

pub struct BridgeActuator {
    channel: Arc<Mutex<Channel>>,
}

impl Actuator for BridgeActuator {
    fn move_to(&mut self, position: DeviceState, profile: MotionProfile) -> DriverResult<()> {
        HelperBridge::send(&self.channel, &BridgeCommand::Move { position, profile })?;
        thread::sleep(profile.duration);
        Ok(())
    }

    fn release(&mut self) -> DriverResult<()> {
        HelperBridge::send(&self.channel, &BridgeCommand::Release)
    }
}

pub struct BridgeStrip {
    channel: Arc<Mutex<Channel>>,
    len: usize,
}

impl LightStrip for BridgeStrip {
    fn len(&self) -> usize {
        self.len
    }

    fn render(&mut self, frame: &[Rgb]) -> DriverResult<()> {
        HelperBridge::send(&self.channel, &BridgeCommand::Leds(frame.to_vec()))
    }
}

pub struct BridgeAudio {
    channel: Arc<Mutex<Channel>>,
}

impl AudioOutput for BridgeAudio {
    fn play(&mut self, clip: &str) -> DriverResult<()> {
        HelperBridge::send(&self.channel, &BridgeCommand::Play(clip.to_string()))
    }

    fn set_ambient_volume(&mut self, volume: f32) -> DriverResult<()> {
        HelperBridge::send(&self.channel, &BridgeCommand::Volume(volume))
    }

    fn start_ambient(&mut self, track: &str, volume: f32) -> DriverResult<()> {
        HelperBridge::send(&self.channel, &BridgeCommand::Ambient { track: track.to_string(), volume })
    }

    fn stop_ambient(&mut self) -> DriverResult<()> {
        HelperBridge::send(&self.channel, &BridgeCommand::AmbientStop)
    }
}
