use crate::{Block, BlockFlags, BlockHandle, DirectionBits, MotionConfig, PlanWindow, Producer, QueueFull, StepTiming, XYZData};

/// A straight actuator move ready for planning. Speeds in mm/s of machine travel.
#[derive(Clone, Copy, PartialEq, Debug)]
pub struct LineRequest {
    pub step_counts: XYZData<u32>,
    pub direction_bits: DirectionBits,
    pub millimeters: f32,
    pub unit_vector: XYZData<f32>,
    pub nominal_speed: f32,
    pub acceleration: f32,
}

/// Highest speed allowed through the corner between two unit vectors so the path stays
/// within `deviation` mm of the sharp corner while accelerating at `acceleration`.
pub fn junction_speed(previous: &XYZData<f32>, next: &XYZData<f32>, acceleration: f32, deviation: f32, minimum_speed: f32) -> f32 {
    let cos_theta = -previous.dot(next);
    if cos_theta > 0.999_999 {
        // full reversal
        return minimum_speed;
    }
    if cos_theta < -0.999_999 {
        // straight through
        return f32::INFINITY;
    }
    let sin_theta_half = libm::sqrtf(0.5 * (1.0 - cos_theta));
    let speed_squared = acceleration * deviation * sin_theta_half / (1.0 - sin_theta_half);
    libm::sqrtf(speed_squared).max(minimum_speed)
}

/// Look-ahead velocity planner. Owns the producer side of the move queue.
pub struct Planner<'a, const N: usize> {
    producer: Producer<'a, N>,
    junction_deviation: f32,
    minimum_speed: f32,
    timing: StepTiming,
    /// Unit vector and nominal speed of the last block pushed.
    previous: Option<(XYZData<f32>, f32)>,
}

impl<'a, const N: usize> Planner<'a, N> {
    pub fn new(producer: Producer<'a, N>, config: &MotionConfig) -> Self {
        Self {
            producer,
            junction_deviation: config.junction_deviation,
            minimum_speed: config.minimum_planner_speed,
            timing: config.timing,
            previous: None,
        }
    }

    pub fn producer(&self) -> &Producer<'a, N> {
        &self.producer
    }

    /// Forget the last direction of travel; the next block starts from standstill.
    pub fn reset(&mut self) {
        self.previous = None;
    }

    pub fn buffer_line(&mut self, line: LineRequest) -> Result<BlockHandle, QueueFull> {
        let mut block = Block::new(
            line.step_counts,
            line.direction_bits,
            line.millimeters,
            line.unit_vector,
            line.nominal_speed,
            line.acceleration,
        );
        block.max_entry_speed = match &self.previous {
            Some((unit, nominal)) => junction_speed(unit, &line.unit_vector, line.acceleration, self.junction_deviation, self.minimum_speed)
                .min(line.nominal_speed)
                .min(*nominal),
            None => self.minimum_speed,
        };
        if block.nominal_speed <= block.reachable_speed(self.minimum_speed) {
            block.flags.insert(BlockFlags::NOMINAL_LENGTH);
        }

        let mut window = self.producer.lock();
        if window.is_empty() && self.previous.is_some() {
            // pinned from here on, so it has to match what the running block exits at
            if let Some(started) = window.started() {
                block.entry_speed = started.exit_speed;
            }
        }
        let handle = window.try_push(block)?;
        self.previous = Some((line.unit_vector, line.nominal_speed));
        plan(&mut window, self.minimum_speed, &self.timing);
        Ok(handle)
    }

    /// Re-runs both passes over the queue as it stands.
    pub fn replan(&mut self) {
        let mut window = self.producer.lock();
        plan(&mut window, self.minimum_speed, &self.timing);
    }
}

/// Recomputes entry speeds newest to oldest, then caps them oldest to newest, then rebuilds
/// the trapezoids whose speeds moved. Block 0 of the window keeps its entry speed.
pub fn plan<const N: usize>(window: &mut PlanWindow<'_, N>, minimum_speed: f32, timing: &StepTiming) {
    let len = window.len();
    if len == 0 {
        return;
    }
    let newest = len - 1;

    let mut start = 0;
    let mut next_entry = minimum_speed;
    for k in (1..=newest).rev() {
        let Some(block) = window.get_mut(k) else { break };
        let nominal_length = block.flags.contains(BlockFlags::NOMINAL_LENGTH);
        if nominal_length && k != newest {
            // its entry can't depend on anything newer, so neither can older blocks
            start = k;
            break;
        }
        let entry = if nominal_length {
            block.max_entry_speed
        }
        else {
            block.max_entry_speed.min(block.reachable_speed(next_entry))
        };
        if entry != block.entry_speed {
            block.entry_speed = entry;
            block.flags.insert(BlockFlags::RECALCULATE);
        }
        next_entry = entry;
    }

    for k in start..newest {
        let Some((current, next)) = window.pair_mut(k) else { break };
        if current.entry_speed < next.entry_speed {
            let reachable = current.reachable_speed(current.entry_speed);
            if reachable < next.entry_speed {
                next.entry_speed = reachable;
                next.flags.insert(BlockFlags::RECALCULATE);
            }
        }
    }

    for k in start..=newest {
        let exit = match window.get(k + 1) {
            Some(next) => next.entry_speed,
            None => minimum_speed,
        };
        let Some(block) = window.get_mut(k) else { break };
        if block.flags.contains(BlockFlags::RECALCULATE) || block.exit_speed != exit {
            block.calculate_trapezoid(exit, timing);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::MoveQueue;
    use approx::assert_relative_eq;

    fn line(unit: XYZData<f32>, mm: f32, nominal: f32) -> LineRequest {
        let steps = (unit * (mm * 80.0)).map(|v| libm::roundf(*v) as i32);
        LineRequest {
            step_counts: steps.map(|s| s.unsigned_abs()),
            direction_bits: DirectionBits::from_steps(&steps),
            millimeters: mm,
            unit_vector: unit,
            nominal_speed: nominal,
            acceleration: 1000.0,
        }
    }

    const X: XYZData<f32> = XYZData::new(1.0, 0.0, 0.0);
    const NEG_X: XYZData<f32> = XYZData::new(-1.0, 0.0, 0.0);
    const Y: XYZData<f32> = XYZData::new(0.0, 1.0, 0.0);

    #[test]
    fn junction_right_angle() {
        // sin(45deg) = 0.7071, v^2 = 1000 * 0.05 * 0.7071 / 0.2929
        assert_relative_eq!(junction_speed(&X, &Y, 1000.0, 0.05, 0.05), 10.98684, epsilon = 1e-3);
    }

    #[test]
    fn junction_straight_and_reversal() {
        assert_eq!(junction_speed(&X, &X, 1000.0, 0.05, 0.05), f32::INFINITY);
        assert_eq!(junction_speed(&X, &NEG_X, 1000.0, 0.05, 0.05), 0.05);
    }

    #[test]
    fn first_block_starts_and_ends_at_rest() {
        let queue = MoveQueue::<8>::new();
        let (producer, _consumer) = queue.split().unwrap();
        let mut planner = Planner::new(producer, &MotionConfig::default());
        planner.buffer_line(line(X, 10.0, 100.0)).unwrap();
        let block = planner.producer().peek_recent(1).next().copied().unwrap();
        assert_eq!(block.entry_speed, 0.0);
        assert_eq!(block.exit_speed, 0.05);
        assert!(block.flags.contains(BlockFlags::NOMINAL_LENGTH));
        assert!(!block.flags.contains(BlockFlags::RECALCULATE));
    }

    #[test]
    fn short_blocks_limit_each_other() {
        let queue = MoveQueue::<8>::new();
        let (producer, _consumer) = queue.split().unwrap();
        let mut planner = Planner::new(producer, &MotionConfig::default());
        for _ in 0..4 {
            planner.buffer_line(line(X, 0.5, 100.0)).unwrap();
        }
        let mut blocks = [Block::default(); 4];
        for (slot, block) in blocks.iter_mut().rev().zip(planner.producer().peek_recent(4)) {
            *slot = *block;
        }
        // 0.5mm at 1000mm/s^2 can't reach 100mm/s in either direction
        for block in blocks.iter() {
            assert!(!block.flags.contains(BlockFlags::NOMINAL_LENGTH));
            assert!(block.cruise_speed < 100.0);
            assert!(block.entry_speed <= block.cruise_speed && block.exit_speed <= block.cruise_speed);
        }
        for pair in blocks.windows(2) {
            assert_eq!(pair[0].exit_speed, pair[1].entry_speed);
        }
        // symmetric profile: accelerate over the first two blocks and decelerate over the last two
        assert_relative_eq!(blocks[2].entry_speed, 44.72136, epsilon = 1e-2);
        assert!(blocks[0].entry_speed == 0.0);
    }

    #[test]
    fn block_behind_a_started_one_enters_at_its_exit() {
        let queue = MoveQueue::<8>::new();
        let (producer, mut consumer) = queue.split().unwrap();
        let mut planner = Planner::new(producer, &MotionConfig::default());
        planner.buffer_line(line(X, 10.0, 100.0)).unwrap();
        let running = consumer.start_next().unwrap().unwrap();
        planner.buffer_line(line(X, 10.0, 100.0)).unwrap();
        assert_eq!(planner.producer().peek_recent(8).count(), 1);
        let next = planner.producer().peek_recent(1).next().copied().unwrap();
        assert_eq!(running.exit_speed, 0.05);
        assert_eq!(next.entry_speed, running.exit_speed);
        assert!(next.cruise_speed >= next.entry_speed);
    }

    #[test]
    fn reversal_drops_to_minimum_speed() {
        let queue = MoveQueue::<8>::new();
        let (producer, _consumer) = queue.split().unwrap();
        let mut planner = Planner::new(producer, &MotionConfig::default());
        planner.buffer_line(line(X, 10.0, 100.0)).unwrap();
        planner.buffer_line(line(NEG_X, 10.0, 100.0)).unwrap();
        let newest = planner.producer().peek_recent(1).next().copied().unwrap();
        assert_eq!(newest.max_entry_speed, 0.05);
        assert_eq!(newest.entry_speed, 0.05);
    }
}
