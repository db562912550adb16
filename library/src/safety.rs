use portable_atomic::{AtomicI32, AtomicU16, AtomicU8, Ordering};

use crate::{Direction, DirectionBits, Fault, MoveQueue, RecoveryError, XYZData, XYZId, XYZ_ID_LIST};

const RUNNING: u8 = 0;
const HALT_REQUESTED: u8 = 1;
const HALTED: u8 = 2;

const fn pack(state: u8, fault: u8) -> u16 {
    (state as u16) << 8 | fault as u16
}

const fn unpack(word: u16) -> (u8, u8) {
    ((word >> 8) as u8, word as u8)
}

/// Persistent stop flag. Any context may request a halt, the step generator acknowledges
/// it by dropping its block, and only `recover` clears it. State and fault share one word
/// so a request can never slip between a check and the clear.
pub struct HaltLatch(AtomicU16);

impl Default for HaltLatch {
    fn default() -> Self {
        Self::new()
    }
}

impl HaltLatch {
    pub const fn new() -> Self {
        Self(AtomicU16::new(pack(RUNNING, 0)))
    }

    fn state(&self) -> u8 {
        unpack(self.0.load(Ordering::Acquire)).0
    }

    /// Until the halt is acknowledged the first fault wins. A request after the
    /// acknowledgement replaces the fault and needs acknowledging again, so `recover`
    /// can't clear a fault it never saw.
    pub fn request(&self, fault: Fault) {
        let code = fault.encode();
        let _ = self.0.fetch_update(Ordering::AcqRel, Ordering::Acquire, |word| match unpack(word) {
            (RUNNING, _) | (HALTED, _) => Some(pack(HALT_REQUESTED, code)),
            _ => None,
        });
    }

    pub fn is_running(&self) -> bool {
        self.state() == RUNNING
    }

    /// The step generator has seen the halt and stopped.
    pub fn is_acknowledged(&self) -> bool {
        self.state() == HALTED
    }

    pub fn fault(&self) -> Option<Fault> {
        Fault::decode(unpack(self.0.load(Ordering::Acquire)).1)
    }

    /// The latched fault while not running.
    pub fn halted(&self) -> Option<Fault> {
        if self.is_running() { None } else { self.fault() }
    }

    pub(crate) fn acknowledge(&self) {
        let _ = self.0.fetch_update(Ordering::AcqRel, Ordering::Acquire, |word| match unpack(word) {
            (HALT_REQUESTED, fault) => Some(pack(HALTED, fault)),
            _ => None,
        });
    }

    pub(crate) fn ready_to_clear(&self) -> Result<(), RecoveryError> {
        match self.state() {
            RUNNING => Err(RecoveryError::NotHalted),
            HALT_REQUESTED => Err(RecoveryError::NotAcknowledged),
            _ => Ok(()),
        }
    }

    pub(crate) fn clear(&self) -> Result<(), RecoveryError> {
        self.0
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |word| match unpack(word) {
                (HALTED, _) => Some(pack(RUNNING, 0)),
                _ => None,
            })
            .map(|_| ())
            .map_err(|word| match unpack(word).0 {
                RUNNING => RecoveryError::NotHalted,
                _ => RecoveryError::NotAcknowledged,
            })
    }
}

const MOVING_SHIFT: u8 = 4;

/// Which axes the executing block moves, and which way. Written by the step generator
/// at block boundaries, read by the safety monitor.
pub struct ActiveMotion(AtomicU8);

impl Default for ActiveMotion {
    fn default() -> Self {
        Self::new()
    }
}

impl ActiveMotion {
    pub const fn new() -> Self {
        Self(AtomicU8::new(0))
    }

    pub(crate) fn publish(&self, step_counts: &XYZData<u32>, directions: DirectionBits) {
        let moving = XYZ_ID_LIST.iter()
            .filter(|id| step_counts[**id] != 0)
            .fold(0u8, |bits, id| bits | DirectionBits::axis(*id).bits());
        self.0.store((moving << MOVING_SHIFT) | directions.bits(), Ordering::Release);
    }

    pub(crate) fn clear(&self) {
        self.0.store(0, Ordering::Release);
    }

    pub fn is_idle(&self) -> bool {
        self.0.load(Ordering::Acquire) >> MOVING_SHIFT == 0
    }

    pub fn moving_toward(&self, axis: XYZId, direction: Direction) -> bool {
        let value = self.0.load(Ordering::Acquire);
        let bit = DirectionBits::axis(axis).bits();
        let moving = (value >> MOVING_SHIFT) & bit != 0;
        let negative = value & bit != 0;
        moving && negative == direction.is_negative()
    }
}

/// State shared by the main context and the step interrupt. Lives in a static on target.
pub struct MotionShared<const N: usize> {
    pub queue: MoveQueue<N>,
    pub halt: HaltLatch,
    pub active: ActiveMotion,
    /// Realized actuator position in steps, mirrored by the step generator after every step.
    pub position: XYZData<AtomicI32>,
}

impl<const N: usize> Default for MotionShared<N> {
    fn default() -> Self {
        Self::new()
    }
}

impl<const N: usize> MotionShared<N> {
    pub fn new() -> Self {
        Self {
            queue: MoveQueue::new(),
            halt: HaltLatch::new(),
            active: ActiveMotion::new(),
            position: XYZData::new(AtomicI32::new(0), AtomicI32::new(0), AtomicI32::new(0)),
        }
    }

    pub fn realized_steps(&self) -> XYZData<i32> {
        self.position.map(|p| p.load(Ordering::Relaxed))
    }

    pub(crate) fn store_position(&self, steps: &XYZData<i32>) {
        for id in XYZ_ID_LIST {
            self.position[id].store(steps[id], Ordering::Relaxed);
        }
    }

    /// Latches the halt, then drops queued work so nothing is left to resume into.
    pub fn halt(&self, fault: Fault) {
        self.halt.request(fault);
        self.queue.flush();
    }
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum TriggerEdge {
    Idle,
    Triggered,
    Released,
}

/// Turns endstop and thermal inputs into halts. Cheap to copy into whichever context
/// samples the inputs.
#[derive(Clone, Copy)]
pub struct SafetyMonitor<'a, const N: usize> {
    shared: &'a MotionShared<N>,
    guards: XYZData<Direction>,
}

impl<'a, const N: usize> SafetyMonitor<'a, N> {
    /// `guards` names the travel direction each axis' endstop protects.
    pub fn new(shared: &'a MotionShared<N>, guards: XYZData<Direction>) -> Self {
        Self { shared, guards }
    }

    /// Halts only when the axis is currently driving toward the switch, so backing off a
    /// pressed endstop keeps working. Returns whether a halt was latched.
    pub fn on_endstop_triggered(&self, axis: XYZId, direction: Direction) -> bool {
        if !self.shared.active.moving_toward(axis, direction) {
            return false;
        }
        self.shared.halt(Fault::Endstop { axis, direction });
        true
    }

    /// Always halts, moving or not.
    pub fn on_thermal_fault(&self) {
        self.shared.halt(Fault::Thermal);
    }

    /// One sampling pass over the inputs. Returns the latched fault, if any.
    pub fn poll(&self, thermal_fault: bool, endstop: impl Fn(XYZId) -> TriggerEdge) -> Option<Fault> {
        if thermal_fault {
            self.on_thermal_fault();
        }
        for axis in XYZ_ID_LIST {
            if endstop(axis) == TriggerEdge::Triggered {
                self.on_endstop_triggered(axis, self.guards[axis]);
            }
        }
        if self.shared.halt.is_running() { None } else { self.shared.halt.fault() }
    }
}
