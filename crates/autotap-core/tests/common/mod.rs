//! Collaborator doubles shared by the scenario tests.

#![allow(dead_code)]

use autotap_core::{
    DeviceChannel, DeviceResult, EngineContext, Interpreter, ManualClock, Player,
    RandomizationSettings, RecordedAction, RecordingSource, StorageError, StorageResult,
    TemplateMatcher,
};
use image::RgbaImage;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Sent {
    Tap(i32, i32),
    Swipe(i32, i32, i32, i32, u64),
    Text(String),
    Key(i32),
    Shell(String),
}

#[derive(Default)]
pub struct FakeDevice {
    sent: Mutex<Vec<Sent>>,
}

impl FakeDevice {
    pub fn sent(&self) -> Vec<Sent> {
        self.sent.lock().unwrap().clone()
    }

    fn push(&self, cmd: Sent) -> DeviceResult<()> {
        self.sent.lock().unwrap().push(cmd);
        Ok(())
    }
}

impl DeviceChannel for FakeDevice {
    fn tap(&self, x: i32, y: i32) -> DeviceResult<()> {
        self.push(Sent::Tap(x, y))
    }

    fn swipe(&self, x1: i32, y1: i32, x2: i32, y2: i32, duration_ms: u64) -> DeviceResult<()> {
        self.push(Sent::Swipe(x1, y1, x2, y2, duration_ms))
    }

    fn text(&self, text: &str) -> DeviceResult<()> {
        self.push(Sent::Text(text.to_string()))
    }

    fn keyevent(&self, code: i32) -> DeviceResult<()> {
        self.push(Sent::Key(code))
    }

    fn shell(&self, command: &str) -> DeviceResult<String> {
        self.push(Sent::Shell(command.to_string()))?;
        Ok(String::new())
    }
}

pub struct AlwaysMatch;

impl TemplateMatcher for AlwaysMatch {
    fn matches(&self, _region: &RgbaImage, _template: &RgbaImage, _threshold: f64) -> bool {
        true
    }
}

#[derive(Default)]
pub struct MemoryRecordings(pub HashMap<String, Vec<RecordedAction>>);

impl RecordingSource for MemoryRecordings {
    fn load_recording(&self, reference: &str) -> StorageResult<Vec<RecordedAction>> {
        self.0
            .get(reference)
            .cloned()
            .ok_or_else(|| StorageError::NotFound(reference.to_string()))
    }
}

pub struct Harness {
    pub device: Arc<FakeDevice>,
    pub clock: ManualClock,
    pub ctx: EngineContext,
}

pub fn harness() -> Harness {
    let device = Arc::new(FakeDevice::default());
    let clock = ManualClock::new();
    let player = Arc::new(Player::with_seed(device.clone(), RandomizationSettings::default(), 11));
    let interpreter = Arc::new(Interpreter::new(
        device.clone(),
        player,
        Arc::new(MemoryRecordings::default()),
    ));
    let ctx = EngineContext {
        interpreter,
        frames: None,
        matcher: Arc::new(AlwaysMatch),
        clock: Arc::new(clock.clone()),
    };
    Harness { device, clock, ctx }
}
