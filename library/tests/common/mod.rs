#![allow(dead_code)]

use motion_core::{Direction, Firing, MotionConfig, MotionCore, MotionParts, MotionShared, StepDir, StepGenerator, StepTimer, XYZData, XYZId};

pub const QUEUE_SIZE: usize = 16;

/// Counts rising edges per axis and checks pins are low between firings.
#[derive(Default)]
pub struct RecordingPins {
    pub rising: XYZData<u32>,
    pub high: XYZData<bool>,
    pub negative: XYZData<bool>,
}

impl StepDir for RecordingPins {
    fn step(&mut self, axis: XYZId, high: bool) {
        assert_ne!(self.high[axis], high, "step pin set twice to the same level");
        self.high[axis] = high;
        if high {
            self.rising[axis] += 1;
        }
    }

    fn dir(&mut self, axis: XYZId, negative: bool) {
        self.negative[axis] = negative;
    }
}

#[derive(Default)]
pub struct RecordingTimer {
    pub last: u32,
}

impl StepTimer for RecordingTimer {
    fn reload(&mut self, ticks: u32) {
        self.last = ticks;
    }
}

pub fn min_endstops() -> XYZData<Direction> {
    XYZData::from_clone(Direction::Negative)
}

pub fn start(shared: &MotionShared<QUEUE_SIZE>, config: MotionConfig) -> MotionParts<'_, QUEUE_SIZE> {
    MotionCore::new(shared, config, min_endstops()).expect("valid config")
}

/// Fires the timer until the generator goes idle. Returns retired block sequence numbers in order.
pub fn run_until_idle(generator: &mut StepGenerator<'_, QUEUE_SIZE>, pins: &mut RecordingPins, timer: &mut RecordingTimer) -> Vec<u32> {
    let mut retired = Vec::new();
    for _ in 0..1_000_000 {
        match generator.timer_fired(pins, timer) {
            Firing::Idle => return retired,
            Firing::Stepped { retired: Some(sequence) } => retired.push(sequence),
            Firing::Stepped { retired: None } => {}
            Firing::Halted => panic!("unexpected halt"),
        }
        assert!(!pins.high.any(|h| *h), "step pins left high after a firing");
    }
    panic!("generator never went idle");
}

/// Fires the timer until exactly one block retires.
pub fn run_one_block(generator: &mut StepGenerator<'_, QUEUE_SIZE>, pins: &mut RecordingPins, timer: &mut RecordingTimer) -> u32 {
    for _ in 0..1_000_000 {
        match generator.timer_fired(pins, timer) {
            Firing::Stepped { retired: Some(sequence) } => return sequence,
            Firing::Stepped { retired: None } => {}
            other => panic!("unexpected {:?}", other),
        }
    }
    panic!("block never finished");
}
