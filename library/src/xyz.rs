use core::{iter::once, ops::{Add, Div, Index, IndexMut, Mul, Sub}};

#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Debug, ufmt::derive::uDebug)]
pub enum XYZId { X, Y, Z }
pub static XYZ_ID_LIST:[XYZId;3] = [XYZId::X, XYZId::Y, XYZId::Z];

impl XYZId {
    pub fn index(self) -> usize {
        self as usize
    }
}

/// One value per machine axis (or per actuator, for kinematics where the two differ).
#[derive(Clone, Copy, PartialEq, Debug)]
pub struct XYZData<T> {
    pub x: T,
    pub y: T,
    pub z: T,
}

impl<T> Add for XYZData<T> where T: Add::<Output=T> {
    type Output=XYZData<T>;
    fn add(self, rhs: Self) -> Self::Output {
        Self {
            x: self.x + rhs.x,
            y: self.y + rhs.y,
            z: self.z + rhs.z,
        }
    }
}

impl<T> Sub for XYZData<T> where T: Sub::<Output=T> {
    type Output=XYZData<T>;
    fn sub(self, rhs: Self) -> Self::Output {
        Self {
            x: self.x - rhs.x,
            y: self.y - rhs.y,
            z: self.z - rhs.z,
        }
    }
}

impl<T> Mul for XYZData<T> where T: Mul::<Output=T> {
    type Output=XYZData<T>;
    fn mul(self, rhs: Self) -> Self::Output {
        Self {
            x: self.x * rhs.x,
            y: self.y * rhs.y,
            z: self.z * rhs.z,
        }
    }
}

impl Mul<f32> for XYZData<f32> {
    type Output=XYZData<f32>;
    fn mul(self, rhs: f32) -> Self::Output {
        self.map(|v| v * rhs)
    }
}

impl Div<f32> for XYZData<f32> {
    type Output=XYZData<f32>;
    fn div(self, rhs: f32) -> Self::Output {
        self.map(|v| v / rhs)
    }
}

impl<T> Default for XYZData<T> where T: Default {
    fn default() -> Self {
        return Self {
            x: Default::default(),
            y: Default::default(),
            z: Default::default(),
        }
    }
}

impl<T> Index<XYZId> for XYZData<T> {
    type Output = T;
    fn index(&self, id: XYZId) -> &T {
        self.match_id(id)
    }
}

impl<T> IndexMut<XYZId> for XYZData<T> {
    fn index_mut(&mut self, id: XYZId) -> &mut T {
        self.match_id_mut(id)
    }
}

impl<T> XYZData<T> {
    pub const fn new(x: T, y: T, z: T) -> Self {
        Self { x, y, z }
    }
    pub fn from_clone(state: T) -> Self where T: Clone {
        Self {
            x: state.clone(),
            y: state.clone(),
            z: state,
        }
    }
    pub fn from_fn(mut f: impl FnMut(XYZId) -> T) -> Self {
        Self { x: f(XYZId::X), y: f(XYZId::Y), z: f(XYZId::Z) }
    }
    pub fn iter(&self) -> impl Iterator<Item=&T> {
        once(&self.x).chain(once(&self.y)).chain(once(&self.z))
    }
    pub fn iter_mut(&mut self) -> impl Iterator<Item=&mut T> {
        once(&mut self.x).chain(once(&mut self.y)).chain(once(&mut self.z))
    }
    /// Pairs each value with its axis id.
    pub fn enumerate(&self) -> impl Iterator<Item=(XYZId, &T)> {
        XYZ_ID_LIST.iter().copied().zip(self.iter())
    }
    pub fn match_id(&self, id: XYZId) -> &T {
        match id {
            XYZId::X => &self.x,
            XYZId::Y => &self.y,
            XYZId::Z => &self.z,
        }
    }
    pub fn match_id_mut(&mut self, id: XYZId) -> &mut T {
        match id {
            XYZId::X => &mut self.x,
            XYZId::Y => &mut self.y,
            XYZId::Z => &mut self.z,
        }
    }

    pub fn all(&self, predicate: impl Fn(&T) -> bool) -> bool {
        predicate(&self.x) && predicate(&self.y) && predicate(&self.z)
    }

    pub fn any(&self, predicate: impl Fn(&T) -> bool) -> bool {
        predicate(&self.x) || predicate(&self.y) || predicate(&self.z)
    }

    pub fn map<TR>(&self, p: impl Fn(&T) -> TR) -> XYZData<TR> {
        XYZData { x: p(&self.x), y: p(&self.y), z: p(&self.z) }
    }

    pub fn zip_map<U, TR>(&self, other: &XYZData<U>, p: impl Fn(&T, &U) -> TR) -> XYZData<TR> {
        XYZData {
            x: p(&self.x, &other.x),
            y: p(&self.y, &other.y),
            z: p(&self.z, &other.z),
        }
    }
}

impl XYZData<f32> {
    pub fn dot(&self, other: &Self) -> f32 {
        self.x * other.x + self.y * other.y + self.z * other.z
    }

    pub fn length(&self) -> f32 {
        libm::sqrtf(self.dot(self))
    }

    /// Point `numerator / denominator` of the way from `self` to `end`. The last point is `end` exactly.
    pub fn lerp(&self, end: &Self, numerator: u32, denominator: u32) -> Self {
        if numerator >= denominator {
            return *end;
        }
        let t = numerator as f32 / denominator as f32;
        self.zip_map(end, |a, b| a + (b - a) * t)
    }
}
