use arrayvec::ArrayVec;

use crate::{
    stepper_math::{delay_to_ticks, inter_step_acc_delay, inter_step_dec_delay},
    Block, Consumer, DirectionBits, Fault, MotionShared, StepTiming, XYZData, XYZId, XYZ_ID_LIST,
};

/// Step and direction outputs. Implemented by the board pins and by test recorders.
pub trait StepDir {
    fn step(&mut self, axis: XYZId, high: bool);
    fn dir(&mut self, axis: XYZId, negative: bool);
}

/// The hardware timer driving `StepGenerator::timer_fired`.
pub trait StepTimer {
    /// Ticks until the next firing.
    fn reload(&mut self, ticks: u32);
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum RampPhase {
    Accelerating,
    Cruising,
    Decelerating,
    Complete,
}

/// What a single timer firing did.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Firing {
    Idle,
    Halted,
    /// At least one step pulse went out. `retired` is the sequence number of a block that finished.
    Stepped { retired: Option<u32> },
}

struct ActiveBlock {
    block: Block,
    dominant: XYZId,
    counters: XYZData<u32>,
    completed: u32,
    delay: u32,
    ramp_index: u32,
    phase: RampPhase,
}

impl ActiveBlock {
    fn new(block: Block) -> Self {
        Self {
            dominant: block.dominant_axis(),
            counters: XYZData::from_clone(block.step_event_count / 2),
            completed: 0,
            delay: block.ramp.entry_delay,
            ramp_index: block.ramp.entry_index,
            phase: if block.acceleration_steps > 0 { RampPhase::Accelerating } else { RampPhase::Cruising },
            block,
        }
    }

    /// Delay before the next step, from integer ramp state only.
    fn advance_ramp(&mut self) -> Result<u32, Fault> {
        let block = &self.block;
        let done = self.completed;
        if done >= block.step_event_count {
            self.phase = RampPhase::Complete;
        }
        else if done < block.acceleration_steps {
            self.phase = RampPhase::Accelerating;
            self.ramp_index += 1;
            let next = inter_step_acc_delay(self.delay, self.ramp_index).ok_or(Fault::TimerOverflow)?;
            self.delay = next.max(block.ramp.cruise_delay).min(self.delay);
        }
        else if done < block.step_event_count - block.deceleration_steps {
            self.phase = RampPhase::Cruising;
            self.delay = block.ramp.cruise_delay;
        }
        else {
            if self.phase != RampPhase::Decelerating {
                self.phase = RampPhase::Decelerating;
                self.ramp_index = block.ramp.decel_index;
            }
            let next = inter_step_dec_delay(self.delay, self.ramp_index).ok_or(Fault::TimerOverflow)?;
            self.ramp_index = self.ramp_index.saturating_sub(1).max(1);
            self.delay = next.min(block.ramp.exit_delay).max(self.delay);
        }
        Ok(self.delay)
    }
}

/// Interrupt-side executor. Owns the realized position and the running block; everything it
/// touches per step is integer math.
pub struct StepGenerator<'a, const N: usize> {
    consumer: Consumer<'a, N>,
    shared: &'a MotionShared<N>,
    timing: StepTiming,
    position: XYZData<i32>,
    direction_bits: Option<DirectionBits>,
    active: Option<ActiveBlock>,
}

impl<'a, const N: usize> StepGenerator<'a, N> {
    pub(crate) fn new(consumer: Consumer<'a, N>, shared: &'a MotionShared<N>, timing: StepTiming, position: XYZData<i32>) -> Self {
        shared.store_position(&position);
        Self { consumer, shared, timing, position, direction_bits: None, active: None }
    }

    pub fn position(&self) -> XYZData<i32> {
        self.position
    }

    pub fn is_busy(&self) -> bool {
        self.active.is_some()
    }

    pub fn phase(&self) -> RampPhase {
        self.active.as_ref().map_or(RampPhase::Complete, |a| a.phase)
    }

    /// One timer interrupt: start a block if idle, emit this step event's pulses, advance
    /// the ramp and reload the timer.
    pub fn timer_fired(&mut self, pins: &mut impl StepDir, timer: &mut impl StepTimer) -> Firing {
        if !self.shared.halt.is_running() {
            return self.stop(timer);
        }

        if self.active.is_none() {
            match self.claim_next(pins) {
                Ok(true) => {}
                Ok(false) => {
                    timer.reload(self.timing.idle_ticks);
                    return Firing::Idle;
                }
                Err(fault) => return self.fault(fault, timer),
            }
        }
        let Some(active) = self.active.as_mut() else {
            timer.reload(self.timing.idle_ticks);
            return Firing::Idle;
        };

        let mut pulsed = ArrayVec::<XYZId, 3>::new();
        if active.completed < active.block.step_event_count {
            for id in XYZ_ID_LIST {
                let steps = active.block.step_counts[id];
                if steps == 0 {
                    continue;
                }
                let fire = id == active.dominant || {
                    let counter = &mut active.counters[id];
                    *counter += steps;
                    if *counter >= active.block.step_event_count {
                        *counter -= active.block.step_event_count;
                        true
                    }
                    else { false }
                };
                if fire {
                    pins.step(id, true);
                    pulsed.push(id);
                    self.position[id] += if active.block.direction_bits.is_negative(id) { -1 } else { 1 };
                }
            }
            active.completed += 1;
            self.shared.store_position(&self.position);
        }

        let delay = match active.advance_ramp() {
            Ok(delay) => delay,
            Err(fault) => {
                Self::end_pulses(pins, &pulsed);
                return self.fault(fault, timer);
            }
        };
        let ticks = delay_to_ticks(delay);
        if ticks == 0 || ticks > self.timing.max_ticks {
            Self::end_pulses(pins, &pulsed);
            return self.fault(Fault::TimerOverflow, timer);
        }

        let mut retired = None;
        let complete = active.phase == RampPhase::Complete;
        if complete {
            retired = self.consumer.pop_if_complete(active.completed).map(|b| b.sequence);
            self.active = None;
        }

        Self::end_pulses(pins, &pulsed);
        if complete {
            // the next block takes over the published direction before its first step
            if let Err(fault) = self.claim_next(pins) {
                return self.fault(fault, timer);
            }
        }
        timer.reload(ticks.max(self.timing.min_ticks));
        Firing::Stepped { retired }
    }

    /// Starts the head block if there is one. Without one, nothing is moving any more.
    fn claim_next(&mut self, pins: &mut impl StepDir) -> Result<bool, Fault> {
        match self.consumer.start_next()? {
            Some(block) if block.step_event_count == 0 => Err(Fault::QueueCorrupted),
            Some(block) => {
                self.begin(block, pins);
                Ok(true)
            }
            None => {
                self.shared.active.clear();
                Ok(false)
            }
        }
    }

    fn begin(&mut self, block: Block, pins: &mut impl StepDir) {
        let directions = block.direction_bits;
        for id in XYZ_ID_LIST {
            let negative = directions.is_negative(id);
            if self.direction_bits.map_or(true, |d| d.is_negative(id) != negative) {
                pins.dir(id, negative);
            }
        }
        self.direction_bits = Some(directions);
        self.shared.active.publish(&block.step_counts, directions);
        self.active = Some(ActiveBlock::new(block));
    }

    fn end_pulses(pins: &mut impl StepDir, pulsed: &[XYZId]) {
        for id in pulsed {
            pins.step(*id, false);
        }
    }

    fn stop(&mut self, timer: &mut impl StepTimer) -> Firing {
        self.active = None;
        self.shared.active.clear();
        self.shared.halt.acknowledge();
        timer.reload(self.timing.min_ticks);
        Firing::Halted
    }

    fn fault(&mut self, fault: Fault, timer: &mut impl StepTimer) -> Firing {
        self.shared.halt(fault);
        self.stop(timer)
    }
}
