#[allow(unused_imports)]
use micromath::F32Ext;

use crate::{
    kinematics::{actuator_to_steps, steps_to_actuator},
    Block, ConfigError, Direction, DirectionBits, Fault, Kinematics, KinematicsError, LineRequest,
    MachineKinematics, MotionConfig, MotionError, MotionShared, Planner, RecoveryError, SafetyMonitor,
    Segments, StepGenerator, XYZData, XYZ_ID_LIST,
};

#[derive(Clone, Copy, PartialEq, Debug)]
struct PlannedPosition {
    machine: XYZData<f32>,
    steps: XYZData<i32>,
}

/// A move that only partly fit in the queue.
struct PendingMove {
    target: XYZData<f32>,
    feed_rate: f32,
    segments: Segments,
}

/// Main-context side of the motion system: turns machine-space moves into planned blocks.
pub struct MotionCore<'a, const N: usize> {
    planner: Planner<'a, N>,
    shared: &'a MotionShared<N>,
    kinematics: MachineKinematics,
    config: MotionConfig,
    planned: PlannedPosition,
    pending: Option<PendingMove>,
}

pub type MotionParts<'a, const N: usize> = (MotionCore<'a, N>, StepGenerator<'a, N>, SafetyMonitor<'a, N>);

impl<'a, const N: usize> MotionCore<'a, N> {
    /// Validates `config` and splits `shared` into the planner, the step generator for the
    /// timer interrupt and the safety monitor. The machine starts at the origin.
    pub fn new(shared: &'a MotionShared<N>, config: MotionConfig, endstop_guards: XYZData<Direction>) -> Result<MotionParts<'a, N>, ConfigError> {
        config.validate()?;
        let kinematics = MachineKinematics::from(&config.geometry);
        let origin = XYZData::from_clone(0.0);
        let actuator = kinematics.inverse(&origin).map_err(|_| ConfigError::UnreachableOrigin)?;
        let steps = actuator_to_steps(&actuator, &config.steps_per_mm);
        let (producer, consumer) = shared.queue.split().ok_or(ConfigError::QueueInUse)?;

        let generator = StepGenerator::new(consumer, shared, config.timing, steps);
        let monitor = SafetyMonitor::new(shared, endstop_guards);
        let core = Self {
            planner: Planner::new(producer, &config),
            shared,
            kinematics,
            config,
            planned: PlannedPosition { machine: origin, steps },
            pending: None,
        };
        Ok((core, generator, monitor))
    }

    pub fn config(&self) -> &MotionConfig {
        &self.config
    }

    /// Queues a straight machine-space move to `target` at `feed_rate` mm/s.
    ///
    /// On `QueueFull` the part of the move that fit stays queued; calling again with the
    /// same arguments continues where it stopped. A different move first finishes the
    /// pending one.
    pub fn enqueue_move(&mut self, target: XYZData<f32>, feed_rate: f32) -> Result<(), MotionError> {
        if let Some(fault) = self.shared.halt.halted() {
            return Err(MotionError::Halted(fault));
        }
        if let Some(pending) = &self.pending {
            let resuming = pending.target == target && pending.feed_rate == feed_rate;
            self.drain_pending()?;
            if resuming {
                return Ok(());
            }
        }

        let start = self.planned.machine;
        let count = self.kinematics.segment_count((target - start).length());
        for point in Segments::new(start, target, count) {
            self.kinematics.inverse(&point)?;
        }
        self.pending = Some(PendingMove { target, feed_rate, segments: Segments::new(start, target, count) });
        self.drain_pending()
    }

    fn drain_pending(&mut self) -> Result<(), MotionError> {
        loop {
            let next = self.pending.as_ref()
                .and_then(|p| p.segments.peek().map(|point| (point, p.feed_rate)));
            let Some((point, feed_rate)) = next else {
                self.pending = None;
                return Ok(());
            };
            if let Err(err) = self.buffer_segment(point, feed_rate) {
                if err != MotionError::QueueFull {
                    self.pending = None;
                }
                return Err(err);
            }
            if let Some(pending) = self.pending.as_mut() {
                pending.segments.next();
            }
        }
    }

    fn buffer_segment(&mut self, point: XYZData<f32>, feed_rate: f32) -> Result<(), MotionError> {
        let actuator = self.kinematics.inverse(&point)?;
        let target_steps = actuator_to_steps(&actuator, &self.config.steps_per_mm);
        let delta_steps = target_steps - self.planned.steps;
        if delta_steps.all(|s| *s == 0) {
            self.planned.machine = point;
            return Ok(());
        }

        let actuator_delta = steps_to_actuator(&delta_steps, &self.config.steps_per_mm);
        let machine_delta = point - self.planned.machine;
        let (millimeters, unit_vector) = match machine_delta.length() {
            length if length > f32::EPSILON => (length, machine_delta / length),
            _ => {
                // rounding moved the actuators without moving the tool
                let length = actuator_delta.length();
                (length, actuator_delta / length)
            }
        };
        let (nominal_speed, acceleration) = self.limits(&actuator_delta, millimeters, feed_rate);

        self.planner.buffer_line(LineRequest {
            step_counts: delta_steps.map(|s| s.unsigned_abs()),
            direction_bits: DirectionBits::from_steps(&delta_steps),
            millimeters,
            unit_vector,
            nominal_speed,
            acceleration,
        })?;
        self.planned = PlannedPosition { machine: point, steps: target_steps };
        Ok(())
    }

    /// Scales the path feed and acceleration down until no actuator exceeds its own limits.
    fn limits(&self, actuator_delta: &XYZData<f32>, millimeters: f32, feed_rate: f32) -> (f32, f32) {
        let mut nominal = feed_rate.min(self.config.max_feed_rate);
        let mut acceleration = self.config.acceleration;
        for id in XYZ_ID_LIST {
            let share = actuator_delta[id].abs() / millimeters;
            if share > 0.0 {
                let limit = self.config.axis_limits[id];
                nominal = nominal.min(limit.max_feed_rate / share);
                acceleration = acceleration.min(limit.max_acceleration / share);
            }
        }
        (nominal.max(self.config.minimum_planner_speed), acceleration)
    }

    /// Where the tool is now, from the steps actually emitted.
    pub fn current_position(&self) -> Result<XYZData<f32>, KinematicsError> {
        let steps = self.shared.realized_steps();
        self.kinematics.forward(&steps_to_actuator(&steps, &self.config.steps_per_mm))
    }

    /// Where the tool will be once the queue drains.
    pub fn planned_position(&self) -> XYZData<f32> {
        self.planned.machine
    }

    pub fn fault(&self) -> Option<Fault> {
        self.shared.halt.halted()
    }

    pub fn is_idle(&self) -> bool {
        self.shared.queue.is_empty() && self.shared.active.is_idle()
    }

    pub fn queued(&self) -> usize {
        self.shared.queue.len()
    }

    /// Newest first, up to `window` blocks the step generator has not started.
    pub fn planned_blocks(&self, window: usize) -> impl Iterator<Item = &Block> + '_ {
        self.planner.producer().peek_recent(window)
    }

    pub fn replan(&mut self) {
        self.planner.replan();
    }

    /// Clears an acknowledged halt. Anything still queued is dropped and planning restarts
    /// from the position the motors actually reached.
    pub fn recover(&mut self) -> Result<(), RecoveryError> {
        self.shared.halt.ready_to_clear()?;
        self.shared.queue.flush();
        let steps = self.shared.realized_steps();
        let machine = self.kinematics
            .forward(&steps_to_actuator(&steps, &self.config.steps_per_mm))
            .unwrap_or(self.planned.machine);
        self.planned = PlannedPosition { machine, steps };
        self.pending = None;
        self.planner.reset();
        self.shared.halt.clear()
    }
}
