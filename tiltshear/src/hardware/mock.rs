use std::{
    collections::HashMap,
    io,
    sync::{
        Mutex,
        atomic::{AtomicBool, AtomicU8, AtomicU32, AtomicUsize, Ordering},
    },
    time::Duration,
};

use async_trait::async_trait;

use super::{Actuator, Detector, ExclusiveLock, LockHeld};
use crate::models::{AxisId, PixelOffset};

#[derive(Debug, Clone, PartialEq)]
pub enum Call {
    Connect,
    Disconnect,
    SelectChannel(u8),
    SetStepSize(u8),
    Step { channel: u8, axis: AxisId, count: i32 },
    LimitStatus { channel: u8 },
    Home { channel: u8, axis: AxisId },
}

type StepHook = Box<dyn Fn(u8, AxisId, i32) + Send + Sync>;

pub struct MockActuator {
    calls: Mutex<Vec<Call>>,
    channel: AtomicU8,
    connected: AtomicBool,
    lock: ExclusiveLock,
    moving_polls: AtomicU32,
    remaining_polls: AtomicU32,
    limits: Mutex<HashMap<u8, u8>>,
    steps_before_failure: AtomicUsize,
    on_step: Mutex<Option<StepHook>>,
}

impl MockActuator {
    pub fn new() -> Self {
        Self {
            calls: Mutex::new(Vec::new()),
            channel: AtomicU8::new(1),
            connected: AtomicBool::new(false),
            lock: ExclusiveLock::default(),
            moving_polls: AtomicU32::new(0),
            remaining_polls: AtomicU32::new(0),
            limits: Mutex::new(HashMap::new()),
            steps_before_failure: AtomicUsize::new(usize::MAX),
            on_step: Mutex::new(None),
        }
    }

    /// Number of `is_moving` polls that report motion after each step or home.
    pub fn set_moving_polls(&self, polls: u32) {
        self.moving_polls.store(polls, Ordering::SeqCst);
    }

    pub fn set_limit(&self, channel: u8, status: u8) {
        self.limits.lock().unwrap().insert(channel, status);
    }

    /// Lets `successful` steps through, then fails every following step.
    pub fn fail_steps_after(&self, successful: usize) {
        self.steps_before_failure.store(successful, Ordering::SeqCst);
    }

    pub fn on_step(&self, hook: impl Fn(u8, AxisId, i32) + Send + Sync + 'static) {
        *self.on_step.lock().unwrap() = Some(Box::new(hook));
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    pub fn steps(&self) -> Vec<(u8, AxisId, i32)> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                Call::Step { channel, axis, count } => Some((channel, axis, count)),
                _ => None,
            })
            .collect()
    }

    pub fn homes(&self) -> Vec<(u8, AxisId)> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                Call::Home { channel, axis } => Some((channel, axis)),
                _ => None,
            })
            .collect()
    }

    pub fn lock_owner(&self) -> Option<String> {
        self.lock.owner()
    }

    pub fn channel(&self) -> u8 {
        self.channel.load(Ordering::SeqCst)
    }

    fn record(&self, call: Call) {
        self.calls.lock().unwrap().push(call);
    }

    fn start_motion(&self) {
        self.remaining_polls
            .store(self.moving_polls.load(Ordering::SeqCst), Ordering::SeqCst);
    }
}

#[async_trait]
impl Actuator for MockActuator {
    async fn connect(&self) -> io::Result<()> {
        self.record(Call::Connect);
        self.connected.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn disconnect(&self) {
        self.record(Call::Disconnect);
        self.connected.store(false, Ordering::SeqCst);
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    async fn select_channel(&self, channel: u8) -> io::Result<()> {
        self.record(Call::SelectChannel(channel));
        self.channel.store(channel, Ordering::SeqCst);
        Ok(())
    }

    async fn current_channel(&self) -> io::Result<u8> {
        Ok(self.channel())
    }

    async fn set_uniform_step_size(&self, amplitude: u8) -> io::Result<()> {
        self.record(Call::SetStepSize(amplitude));
        Ok(())
    }

    async fn step_axis(&self, axis: AxisId, count: i32) -> io::Result<()> {
        if self.steps().len() >= self.steps_before_failure.load(Ordering::SeqCst) {
            return Err(io::Error::new(io::ErrorKind::TimedOut, "controller not responding"));
        }
        let channel = self.channel();
        self.record(Call::Step { channel, axis, count });
        if let Some(hook) = self.on_step.lock().unwrap().as_ref() {
            hook(channel, axis, count);
        }
        self.start_motion();
        Ok(())
    }

    async fn is_moving(&self, _axis: AxisId) -> io::Result<bool> {
        let remaining = self.remaining_polls.load(Ordering::SeqCst);
        if remaining == 0 {
            return Ok(false);
        }
        self.remaining_polls.store(remaining - 1, Ordering::SeqCst);
        Ok(true)
    }

    async fn limit_status(&self) -> io::Result<u8> {
        let channel = self.channel();
        self.record(Call::LimitStatus { channel });
        Ok(self.limits.lock().unwrap().get(&channel).copied().unwrap_or(0))
    }

    async fn home_axis(&self, axis: AxisId) -> io::Result<()> {
        self.record(Call::Home {
            channel: self.channel(),
            axis,
        });
        self.start_motion();
        Ok(())
    }

    fn acquire_exclusive_lock(&self, owner: &str) -> Result<(), LockHeld> {
        self.lock.acquire(owner)
    }

    fn release_exclusive_lock(&self, owner: &str) {
        self.lock.release(owner)
    }
}

pub struct MockDetector {
    name: String,
    reference: Mutex<PixelOffset>,
    current: Mutex<PixelOffset>,
    initialized: AtomicBool,
    captures: AtomicU32,
    terminations: AtomicU32,
    capture_delay: Mutex<Duration>,
    fail_capture: AtomicBool,
}

impl MockDetector {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            reference: Mutex::new(PixelOffset::ORIGIN),
            current: Mutex::new(PixelOffset::ORIGIN),
            initialized: AtomicBool::new(false),
            captures: AtomicU32::new(0),
            terminations: AtomicU32::new(0),
            capture_delay: Mutex::new(Duration::ZERO),
            fail_capture: AtomicBool::new(false),
        }
    }

    pub fn with_current(name: &str, current: PixelOffset) -> Self {
        let detector = Self::new(name);
        detector.set_current(current);
        detector
    }

    pub fn set_current(&self, current: PixelOffset) {
        *self.current.lock().unwrap() = current;
    }

    pub fn shift(&self, dx: f64, dy: f64) {
        let mut current = self.current.lock().unwrap();
        current.x += dx;
        current.y += dy;
    }

    pub fn set_capture_delay(&self, delay: Duration) {
        *self.capture_delay.lock().unwrap() = delay;
    }

    pub fn fail_capture(&self, fail: bool) {
        self.fail_capture.store(fail, Ordering::SeqCst);
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::SeqCst)
    }

    pub fn captures(&self) -> u32 {
        self.captures.load(Ordering::SeqCst)
    }

    pub fn terminations(&self) -> u32 {
        self.terminations.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Detector for MockDetector {
    fn name(&self) -> &str {
        &self.name
    }

    fn reference_centroid(&self) -> PixelOffset {
        *self.reference.lock().unwrap()
    }

    fn current_centroid(&self) -> PixelOffset {
        *self.current.lock().unwrap()
    }

    fn set_reference_centroid(&self) {
        *self.reference.lock().unwrap() = self.current_centroid();
    }

    async fn configure_coadd(&self, _frames: u32, _interval: Duration) -> io::Result<()> {
        Ok(())
    }

    async fn capture_single_coadded_frame(&self, _block_until_done: bool) -> io::Result<()> {
        let delay = *self.capture_delay.lock().unwrap();
        tokio::time::sleep(delay).await;
        if self.fail_capture.load(Ordering::SeqCst) {
            return Err(io::Error::other("frame grabber stopped"));
        }
        self.captures.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn initialize(&self) -> io::Result<()> {
        self.initialized.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn terminate(&self) {
        self.initialized.store(false, Ordering::SeqCst);
        self.terminations.fetch_add(1, Ordering::SeqCst);
    }
}
