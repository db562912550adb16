#[allow(unused_imports)]
use micromath::F32Ext;
use bitflags::bitflags;

use crate::{stepper_math, StepTiming, XYZData, XYZId, XYZ_ID_LIST};

bitflags! {
    /// Axes whose step direction is negative.
    #[derive(Clone, Copy, PartialEq, Eq, Debug, Default)]
    pub struct DirectionBits: u8 {
        const X = 1 << 0;
        const Y = 1 << 1;
        const Z = 1 << 2;
    }

    /// Planner state. Whether the step generator owns a block is tracked per slot by
    /// `MoveQueue`, since blocks are copied and the flag must be atomic.
    #[derive(Clone, Copy, PartialEq, Eq, Debug, Default)]
    pub struct BlockFlags: u8 {
        /// Speeds changed since the trapezoid was last computed.
        const RECALCULATE = 1 << 0;
        /// The block can slow from nominal speed to the minimum planner speed within its own length.
        const NOMINAL_LENGTH = 1 << 1;
    }
}

impl DirectionBits {
    pub fn axis(id: XYZId) -> Self {
        match id {
            XYZId::X => DirectionBits::X,
            XYZId::Y => DirectionBits::Y,
            XYZId::Z => DirectionBits::Z,
        }
    }

    pub fn is_negative(self, id: XYZId) -> bool {
        self.contains(Self::axis(id))
    }

    pub fn from_steps(steps: &XYZData<i32>) -> Self {
        XYZ_ID_LIST.iter()
            .filter(|id| steps[**id] < 0)
            .fold(DirectionBits::empty(), |bits, id| bits | Self::axis(*id))
    }
}

/// Everything the step generator needs to run a block's speed ramp with integer math only.
/// Delays are timer ticks in 24.8 fixed point.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Default)]
pub struct RampCoefficients {
    pub entry_delay: u32,
    /// Steps it would take to reach the entry rate from standstill.
    pub entry_index: u32,
    pub cruise_delay: u32,
    pub exit_delay: u32,
    /// Steps it would take to stop from the cruise rate.
    pub decel_index: u32,
}

#[derive(Clone, Copy, PartialEq, Debug, Default)]
pub struct Block {
    pub sequence: u32,
    pub step_counts: XYZData<u32>,
    pub direction_bits: DirectionBits,
    pub step_event_count: u32,
    /// Machine-space length in mm.
    pub millimeters: f32,
    /// Machine-space direction of travel.
    pub unit_vector: XYZData<f32>,
    /// mm/s^2
    pub acceleration: f32,
    // mm/s
    pub nominal_speed: f32,
    pub max_entry_speed: f32,
    pub entry_speed: f32,
    pub cruise_speed: f32,
    pub exit_speed: f32,
    pub acceleration_steps: u32,
    pub deceleration_steps: u32,
    pub flags: BlockFlags,
    pub ramp: RampCoefficients,
}

impl Block {
    pub fn new(
        step_counts: XYZData<u32>,
        direction_bits: DirectionBits,
        millimeters: f32,
        unit_vector: XYZData<f32>,
        nominal_speed: f32,
        acceleration: f32,
    ) -> Self {
        let step_event_count = step_counts.iter().copied().max().unwrap_or(0);
        Self {
            step_counts,
            direction_bits,
            step_event_count,
            millimeters,
            unit_vector,
            acceleration,
            nominal_speed,
            max_entry_speed: nominal_speed,
            cruise_speed: nominal_speed,
            flags: BlockFlags::RECALCULATE,
            ..Default::default()
        }
    }

    /// The axis that steps on every step event.
    pub fn dominant_axis(&self) -> XYZId {
        XYZ_ID_LIST.iter().copied()
            .find(|id| self.step_counts[*id] == self.step_event_count)
            .unwrap_or(XYZId::X)
    }

    pub fn steps_per_mm(&self) -> f32 {
        if self.millimeters > 0.0 { self.step_event_count as f32 / self.millimeters } else { 0.0 }
    }

    /// Highest speed at the end of this block given `start` speed at its beginning.
    pub fn reachable_speed(&self, start: f32) -> f32 {
        libm::sqrtf(start * start + 2.0 * self.acceleration * self.millimeters)
    }

    /// Splits the block into accelerate, cruise and decelerate phases for the current
    /// `entry_speed` and the given exit speed, then derives the step generator's ramp.
    pub fn calculate_trapezoid(&mut self, exit_speed: f32, timing: &StepTiming) {
        let entry = self.entry_speed.min(self.nominal_speed);
        let exit = exit_speed.min(self.nominal_speed);
        let a = self.acceleration;
        let length = self.millimeters;
        let nominal_squared = self.nominal_speed * self.nominal_speed;

        let mut accelerate_distance = (nominal_squared - entry * entry) / (2.0 * a);
        let mut decelerate_distance = (nominal_squared - exit * exit) / (2.0 * a);
        let cruise_speed = if accelerate_distance + decelerate_distance <= length {
            self.nominal_speed
        }
        else {
            // no room to cruise, meet where the two ramps cross
            accelerate_distance = ((2.0 * a * length + exit * exit - entry * entry) / (4.0 * a)).clamp(0.0, length);
            decelerate_distance = length - accelerate_distance;
            libm::sqrtf(entry * entry + 2.0 * a * accelerate_distance).max(entry).max(exit)
        };

        let spm = self.steps_per_mm();
        let total = self.step_event_count;
        let acceleration_steps = ((accelerate_distance * spm).round() as u32).min(total);
        let deceleration_steps = ((decelerate_distance * spm).round() as u32).min(total - acceleration_steps);

        self.entry_speed = entry;
        self.exit_speed = exit;
        self.cruise_speed = cruise_speed;
        self.acceleration_steps = acceleration_steps;
        self.deceleration_steps = deceleration_steps;
        self.ramp = self.ramp_coefficients(timing);
        self.flags.remove(BlockFlags::RECALCULATE);
    }

    fn ramp_coefficients(&self, timing: &StepTiming) -> RampCoefficients {
        let spm = self.steps_per_mm();
        let accel_steps = self.acceleration * spm;
        let min = stepper_math::ticks_to_delay(timing.min_ticks);
        let max = stepper_math::ticks_to_delay(timing.max_ticks);
        let delay = |speed: f32| stepper_math::delay_for_rate(timing.frequency, speed * spm, min, max);

        let cruise_delay = delay(self.cruise_speed);
        let entry_index = stepper_math::ramp_index(self.entry_speed * spm, accel_steps);
        let mut entry_delay = delay(self.entry_speed);
        if entry_index == 0 {
            let first = stepper_math::first_step_delay(timing.frequency, accel_steps);
            if first < entry_delay as f32 {
                entry_delay = (first as u32).max(min);
            }
        }
        RampCoefficients {
            entry_delay: entry_delay.max(cruise_delay),
            entry_index,
            cruise_delay,
            exit_delay: delay(self.exit_speed).max(cruise_delay),
            decel_index: stepper_math::ramp_index(self.cruise_speed * spm, accel_steps).max(1),
        }
    }
}
