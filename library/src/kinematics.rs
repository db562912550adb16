#[allow(unused_imports)]
use micromath::F32Ext;

use crate::{DeltaGeometry, Geometry, KinematicsError, XYZData, XYZId, XYZ_ID_LIST};

/// Maps machine coordinates (mm) to actuator coordinates (mm of belt or carriage travel) and back.
pub trait Kinematics {
    fn inverse(&self, machine: &XYZData<f32>) -> Result<XYZData<f32>, KinematicsError>;
    fn forward(&self, actuator: &XYZData<f32>) -> Result<XYZData<f32>, KinematicsError>;
    /// How many straight segments a machine-space line of `length` mm is cut into.
    fn segment_count(&self, length: f32) -> u32;
}

/// Absolute actuator position rounded to whole steps.
pub fn actuator_to_steps(actuator: &XYZData<f32>, steps_per_mm: &XYZData<f32>) -> XYZData<i32> {
    actuator.zip_map(steps_per_mm, |mm, spm| (mm * spm).round() as i32)
}

pub fn steps_to_actuator(steps: &XYZData<i32>, steps_per_mm: &XYZData<f32>) -> XYZData<f32> {
    steps.zip_map(steps_per_mm, |s, spm| *s as f32 / spm)
}

#[derive(Clone, Copy, PartialEq, Debug)]
pub struct Cartesian {
    pub travel_min: XYZData<f32>,
    pub travel_max: XYZData<f32>,
}

impl Cartesian {
    fn check(&self, position: &XYZData<f32>) -> Result<(), KinematicsError> {
        let inside = XYZ_ID_LIST.iter().all(|id| {
            let v = position[*id];
            v.is_finite() && v >= self.travel_min[*id] && v <= self.travel_max[*id]
        });
        if inside { Ok(()) } else { Err(KinematicsError::Unreachable) }
    }
}

impl Kinematics for Cartesian {
    fn inverse(&self, machine: &XYZData<f32>) -> Result<XYZData<f32>, KinematicsError> {
        self.check(machine)?;
        Ok(*machine)
    }

    fn forward(&self, actuator: &XYZData<f32>) -> Result<XYZData<f32>, KinematicsError> {
        Ok(*actuator)
    }

    fn segment_count(&self, _length: f32) -> u32 {
        1
    }
}

#[derive(Clone, Copy, PartialEq, Debug)]
pub struct Delta {
    geometry: DeltaGeometry,
    towers: XYZData<(f32, f32)>,
}

impl Delta {
    pub fn new(geometry: DeltaGeometry) -> Self {
        let towers = geometry.tower_angles.map(|degrees| {
            let radians = degrees.to_radians();
            (geometry.radius * libm::cosf(radians), geometry.radius * libm::sinf(radians))
        });
        Self { geometry, towers }
    }

    pub fn tower(&self, id: XYZId) -> (f32, f32) {
        self.towers[id]
    }
}

impl Kinematics for Delta {
    fn inverse(&self, machine: &XYZData<f32>) -> Result<XYZData<f32>, KinematicsError> {
        if !machine.all(|v| v.is_finite()) || machine.z < self.geometry.min_z {
            return Err(KinematicsError::Unreachable);
        }
        let print_radius = self.geometry.print_radius;
        if machine.x * machine.x + machine.y * machine.y > print_radius * print_radius {
            return Err(KinematicsError::Unreachable);
        }
        let rod_squared = self.geometry.diagonal_rod * self.geometry.diagonal_rod;
        let mut carriages = XYZData::from_clone(0.0f32);
        for id in XYZ_ID_LIST {
            let (tx, ty) = self.towers[id];
            let dx = tx - machine.x;
            let dy = ty - machine.y;
            let radicand = rod_squared - dx * dx - dy * dy;
            if radicand <= 0.0 {
                return Err(KinematicsError::Unreachable);
            }
            let carriage = machine.z + libm::sqrtf(radicand);
            if carriage > self.geometry.max_carriage_height {
                return Err(KinematicsError::Unreachable);
            }
            carriages[id] = carriage;
        }
        Ok(carriages)
    }

    /// Trilateration of the three rod spheres. Runs in f64, the f32 form drifts past one step near the rim.
    fn forward(&self, actuator: &XYZData<f32>) -> Result<XYZData<f32>, KinematicsError> {
        let point = |id: XYZId| {
            let (x, y) = self.towers[id];
            [x as f64, y as f64, actuator[id] as f64]
        };
        let (p1, p2, p3) = (point(XYZId::X), point(XYZId::Y), point(XYZId::Z));
        let rod = self.geometry.diagonal_rod as f64;

        let sub = |a: [f64; 3], b: [f64; 3]| [a[0] - b[0], a[1] - b[1], a[2] - b[2]];
        let dot = |a: [f64; 3], b: [f64; 3]| a[0] * b[0] + a[1] * b[1] + a[2] * b[2];
        let scale = |a: [f64; 3], s: f64| [a[0] * s, a[1] * s, a[2] * s];
        let cross = |a: [f64; 3], b: [f64; 3]| [
            a[1] * b[2] - a[2] * b[1],
            a[2] * b[0] - a[0] * b[2],
            a[0] * b[1] - a[1] * b[0],
        ];

        let p12 = sub(p2, p1);
        let d = libm::sqrt(dot(p12, p12));
        let ex = scale(p12, 1.0 / d);
        let p13 = sub(p3, p1);
        let i = dot(ex, p13);
        let ey_raw = sub(p13, scale(ex, i));
        let j = libm::sqrt(dot(ey_raw, ey_raw));
        if d == 0.0 || j == 0.0 {
            return Err(KinematicsError::Unreachable);
        }
        let ey = scale(ey_raw, 1.0 / j);
        let ez = cross(ex, ey);

        // equal sphere radii cancel out of x and y
        let x = d / 2.0;
        let y = (i * i + j * j - 2.0 * i * x) / (2.0 * j);
        let z_squared = rod * rod - x * x - y * y;
        if z_squared < 0.0 {
            return Err(KinematicsError::Unreachable);
        }
        let z = libm::sqrt(z_squared);

        let base = [
            p1[0] + ex[0] * x + ey[0] * y,
            p1[1] + ex[1] * x + ey[1] * y,
            p1[2] + ex[2] * x + ey[2] * y,
        ];
        let up = [base[0] + ez[0] * z, base[1] + ez[1] * z, base[2] + ez[2] * z];
        let down = [base[0] - ez[0] * z, base[1] - ez[1] * z, base[2] - ez[2] * z];
        // the effector hangs below the carriages
        let effector = if up[2] < down[2] { up } else { down };
        Ok(XYZData::new(effector[0] as f32, effector[1] as f32, effector[2] as f32))
    }

    fn segment_count(&self, length: f32) -> u32 {
        ((length / self.geometry.max_segment_length).ceil() as u32).max(1)
    }
}

/// The configured machine geometry.
#[derive(Clone, Copy, PartialEq, Debug)]
pub enum MachineKinematics {
    Cartesian(Cartesian),
    Delta(Delta),
}

impl From<&Geometry> for MachineKinematics {
    fn from(geometry: &Geometry) -> Self {
        match geometry {
            Geometry::Cartesian { travel_min, travel_max } => MachineKinematics::Cartesian(Cartesian {
                travel_min: *travel_min,
                travel_max: *travel_max,
            }),
            Geometry::Delta(delta) => MachineKinematics::Delta(Delta::new(*delta)),
        }
    }
}

impl Kinematics for MachineKinematics {
    fn inverse(&self, machine: &XYZData<f32>) -> Result<XYZData<f32>, KinematicsError> {
        match self {
            MachineKinematics::Cartesian(k) => k.inverse(machine),
            MachineKinematics::Delta(k) => k.inverse(machine),
        }
    }

    fn forward(&self, actuator: &XYZData<f32>) -> Result<XYZData<f32>, KinematicsError> {
        match self {
            MachineKinematics::Cartesian(k) => k.forward(actuator),
            MachineKinematics::Delta(k) => k.forward(actuator),
        }
    }

    fn segment_count(&self, length: f32) -> u32 {
        match self {
            MachineKinematics::Cartesian(k) => k.segment_count(length),
            MachineKinematics::Delta(k) => k.segment_count(length),
        }
    }
}

/// Evenly spaced segment end points of a straight machine-space line, ending exactly on `end`.
pub struct Segments {
    start: XYZData<f32>,
    end: XYZData<f32>,
    next: u32,
    count: u32,
}

impl Segments {
    pub fn new(start: XYZData<f32>, end: XYZData<f32>, count: u32) -> Self {
        Self { start, end, next: 1, count: count.max(1) }
    }

    pub fn count(&self) -> u32 {
        self.count
    }

    /// Index of the next end point, starting at 1.
    pub fn position(&self) -> u32 {
        self.next
    }

    pub fn peek(&self) -> Option<XYZData<f32>> {
        (self.next <= self.count).then(|| self.start.lerp(&self.end, self.next, self.count))
    }
}

impl Iterator for Segments {
    type Item = XYZData<f32>;

    fn next(&mut self) -> Option<Self::Item> {
        let point = self.peek()?;
        self.next += 1;
        Some(point)
    }
}
