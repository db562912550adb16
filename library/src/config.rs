use crate::{ConfigError, XYZData};

pub const STEPS_PER_MM: f32 = 80.0;
pub const Z_STEPS_PER_MM: f32 = 400.0;
/// mm/s
pub const MAX_FEED_RATE: f32 = 200.0;
pub const Z_MAX_FEED_RATE: f32 = 20.0;
/// mm/s^2
pub const ACCELERATION: f32 = 1000.0;
pub const Z_ACCELERATION: f32 = 200.0;
/// mm
pub const JUNCTION_DEVIATION: f32 = 0.05;
/// mm/s, the speed every plan ends at and every reversal passes through.
pub const MINIMUM_PLANNER_SPEED: f32 = 0.05;
/// mm
pub const SEGMENT_LENGTH: f32 = 1.0;

/// Timer 1 with a /8 prescaler on a 16MHz part.
pub const STEP_TIMER_FREQUENCY: u32 = 2_000_000;
/// 25us, caps the step rate at 40kHz.
pub const MIN_TIMER_TICKS: u32 = 50;
/// 1ms
pub const IDLE_TIMER_TICKS: u32 = 2_000;
pub const MAX_TIMER_TICKS: u32 = u16::MAX as u32;

/// Timer facts the step generator and the ramp precomputation agree on.
#[derive(Clone, Copy, PartialEq, Debug)]
pub struct StepTiming {
    pub frequency: u32,
    pub min_ticks: u32,
    pub idle_ticks: u32,
    pub max_ticks: u32,
}

impl Default for StepTiming {
    fn default() -> Self {
        Self {
            frequency: STEP_TIMER_FREQUENCY,
            min_ticks: MIN_TIMER_TICKS,
            idle_ticks: IDLE_TIMER_TICKS,
            max_ticks: MAX_TIMER_TICKS,
        }
    }
}

#[derive(Clone, Copy, PartialEq, Debug)]
pub struct AxisLimits {
    /// mm/s of actuator travel
    pub max_feed_rate: f32,
    /// mm/s^2 of actuator travel
    pub max_acceleration: f32,
}

/// Delta printer geometry. Towers sit on a circle of `radius` around the origin,
/// carriages ride up the towers and `diagonal_rod` links them to the effector.
#[derive(Clone, Copy, PartialEq, Debug)]
pub struct DeltaGeometry {
    pub diagonal_rod: f32,
    /// Tower radius minus the effector and carriage offsets.
    pub radius: f32,
    /// Degrees, counter-clockwise from +X.
    pub tower_angles: XYZData<f32>,
    pub print_radius: f32,
    /// Lowest effector height, the bed.
    pub min_z: f32,
    /// Top of carriage travel on the towers.
    pub max_carriage_height: f32,
    pub max_segment_length: f32,
}

impl Default for DeltaGeometry {
    fn default() -> Self {
        Self {
            diagonal_rod: 250.0,
            radius: 120.0,
            tower_angles: XYZData::new(210.0, 330.0, 90.0),
            print_radius: 100.0,
            min_z: 0.0,
            max_carriage_height: 500.0,
            max_segment_length: SEGMENT_LENGTH,
        }
    }
}

#[derive(Clone, Copy, PartialEq, Debug)]
pub enum Geometry {
    /// Soft travel limits in machine mm, inclusive.
    Cartesian { travel_min: XYZData<f32>, travel_max: XYZData<f32> },
    Delta(DeltaGeometry),
}

#[derive(Clone, Copy, PartialEq, Debug)]
pub struct MotionConfig {
    pub steps_per_mm: XYZData<f32>,
    pub axis_limits: XYZData<AxisLimits>,
    pub max_feed_rate: f32,
    pub acceleration: f32,
    pub junction_deviation: f32,
    pub minimum_planner_speed: f32,
    pub timing: StepTiming,
    pub geometry: Geometry,
}

impl Default for MotionConfig {
    fn default() -> Self {
        let xy = AxisLimits { max_feed_rate: MAX_FEED_RATE, max_acceleration: ACCELERATION };
        Self {
            steps_per_mm: XYZData::new(STEPS_PER_MM, STEPS_PER_MM, Z_STEPS_PER_MM),
            axis_limits: XYZData::new(xy, xy, AxisLimits { max_feed_rate: Z_MAX_FEED_RATE, max_acceleration: Z_ACCELERATION }),
            max_feed_rate: MAX_FEED_RATE,
            acceleration: ACCELERATION,
            junction_deviation: JUNCTION_DEVIATION,
            minimum_planner_speed: MINIMUM_PLANNER_SPEED,
            timing: StepTiming::default(),
            geometry: Geometry::Cartesian {
                travel_min: XYZData::new(0.0, 0.0, 0.0),
                travel_max: XYZData::new(300.0, 300.0, 250.0),
            },
        }
    }
}

impl MotionConfig {
    /// Delta machines move all three carriages for any motion, so every actuator gets the XY limits.
    pub fn delta(geometry: DeltaGeometry) -> Self {
        let limits = AxisLimits { max_feed_rate: MAX_FEED_RATE, max_acceleration: ACCELERATION };
        Self {
            steps_per_mm: XYZData::from_clone(STEPS_PER_MM),
            axis_limits: XYZData::from_clone(limits),
            geometry: Geometry::Delta(geometry),
            ..Self::default()
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        fn positive(value: f32, name: &'static str) -> Result<(), ConfigError> {
            if value.is_finite() && value > 0.0 { Ok(()) } else { Err(ConfigError::NotPositive(name)) }
        }
        for spm in self.steps_per_mm.iter() {
            positive(*spm, "steps_per_mm")?;
        }
        for limit in self.axis_limits.iter() {
            positive(limit.max_feed_rate, "axis max_feed_rate")?;
            positive(limit.max_acceleration, "axis max_acceleration")?;
        }
        positive(self.max_feed_rate, "max_feed_rate")?;
        positive(self.acceleration, "acceleration")?;
        positive(self.junction_deviation, "junction_deviation")?;
        positive(self.minimum_planner_speed, "minimum_planner_speed")?;
        if self.timing.frequency == 0
            || self.timing.min_ticks == 0
            || self.timing.min_ticks >= self.timing.idle_ticks
            || self.timing.idle_ticks > self.timing.max_ticks
            || self.timing.max_ticks > u32::MAX >> 8 {
            return Err(ConfigError::TimerRange);
        }
        if let Geometry::Delta(delta) = &self.geometry {
            positive(delta.diagonal_rod, "diagonal_rod")?;
            positive(delta.radius, "radius")?;
            positive(delta.print_radius, "print_radius")?;
            positive(delta.max_carriage_height - delta.min_z, "carriage travel")?;
            positive(delta.max_segment_length, "max_segment_length")?;
        }
        Ok(())
    }
}
