mod common;

use approx::assert_relative_eq;
use common::{run_until_idle, start, RecordingPins, RecordingTimer, QUEUE_SIZE};
use motion_core::{
    Direction, Fault, Firing, MotionConfig, MotionError, MotionShared, RampPhase, RecoveryError, TriggerEdge, XYZData, XYZId,
};

#[test]
fn endstop_stops_pulses_mid_acceleration() {
    let shared = MotionShared::<QUEUE_SIZE>::new();
    let (mut motion, mut generator, monitor) = start(&shared, MotionConfig::default());
    motion.enqueue_move(XYZData::new(100.0, 0.0, 0.0), 100.0).unwrap();
    motion.enqueue_move(XYZData::new(100.0, 50.0, 0.0), 100.0).unwrap();

    let mut pins = RecordingPins::default();
    let mut timer = RecordingTimer::default();
    for _ in 0..30 {
        assert!(matches!(generator.timer_fired(&mut pins, &mut timer), Firing::Stepped { .. }));
    }
    assert_eq!(generator.phase(), RampPhase::Accelerating);

    assert!(monitor.on_endstop_triggered(XYZId::X, Direction::Positive));
    assert!(motion.fault().is_some());
    for _ in 0..200 {
        assert_eq!(generator.timer_fired(&mut pins, &mut timer), Firing::Halted);
        assert_eq!(timer.last, motion.config().timing.min_ticks);
    }
    assert_eq!(pins.rising, XYZData::new(30, 0, 0));
    assert_eq!(motion.queued(), 0);
    assert_eq!(
        motion.enqueue_move(XYZData::new(1.0, 0.0, 0.0), 10.0),
        Err(MotionError::Halted(Fault::Endstop { axis: XYZId::X, direction: Direction::Positive })),
    );

    assert_eq!(motion.recover(), Ok(()));
    assert!(motion.fault().is_none());
    let position = motion.current_position().unwrap();
    assert_relative_eq!(position.x, 30.0 / 80.0);
    assert_eq!(motion.planned_position(), position);

    motion.enqueue_move(XYZData::new(1.0, 0.0, 0.0), 10.0).unwrap();
    run_until_idle(&mut generator, &mut pins, &mut timer);
    assert_eq!(shared.realized_steps(), XYZData::new(80, 0, 0));
}

#[test]
fn endstop_ignored_while_backing_off() {
    let shared = MotionShared::<QUEUE_SIZE>::new();
    let (mut motion, mut generator, monitor) = start(&shared, MotionConfig::default());
    motion.enqueue_move(XYZData::new(10.0, 0.0, 0.0), 50.0).unwrap();
    let mut pins = RecordingPins::default();
    let mut timer = RecordingTimer::default();
    for _ in 0..10 {
        generator.timer_fired(&mut pins, &mut timer);
    }
    // the X min switch is still pressed while X moves away from it
    let edges = |axis| if axis == XYZId::X { TriggerEdge::Triggered } else { TriggerEdge::Idle };
    assert_eq!(monitor.poll(false, edges), None);
    assert!(!monitor.on_endstop_triggered(XYZId::Y, Direction::Positive));
    run_until_idle(&mut generator, &mut pins, &mut timer);
    assert_eq!(pins.rising.x, 800);
}

#[test]
fn thermal_fault_halts_even_when_idle() {
    let shared = MotionShared::<QUEUE_SIZE>::new();
    let (mut motion, mut generator, monitor) = start(&shared, MotionConfig::default());
    assert!(motion.is_idle());
    assert_eq!(monitor.poll(true, |_| TriggerEdge::Idle), Some(Fault::Thermal));
    assert_eq!(motion.recover(), Err(RecoveryError::NotAcknowledged));

    let mut pins = RecordingPins::default();
    let mut timer = RecordingTimer::default();
    assert_eq!(generator.timer_fired(&mut pins, &mut timer), Firing::Halted);
    assert_eq!(motion.recover(), Ok(()));
    assert_eq!(motion.recover(), Err(RecoveryError::NotHalted));
    assert_eq!(generator.timer_fired(&mut pins, &mut timer), Firing::Idle);
    assert_eq!(timer.last, motion.config().timing.idle_ticks);
}

#[test]
fn fault_raised_after_acknowledgement_needs_its_own() {
    let shared = MotionShared::<QUEUE_SIZE>::new();
    let (mut motion, mut generator, monitor) = start(&shared, MotionConfig::default());
    let mut pins = RecordingPins::default();
    let mut timer = RecordingTimer::default();
    assert!(monitor.poll(false, |_| TriggerEdge::Idle).is_none());
    monitor.on_thermal_fault();
    assert_eq!(generator.timer_fired(&mut pins, &mut timer), Firing::Halted);

    monitor.on_thermal_fault();
    assert_eq!(motion.recover(), Err(RecoveryError::NotAcknowledged));
    assert_eq!(motion.fault(), Some(Fault::Thermal));
    assert_eq!(generator.timer_fired(&mut pins, &mut timer), Firing::Halted);
    assert_eq!(timer.last, motion.config().timing.min_ticks);
    assert_eq!(motion.recover(), Ok(()));
    assert_eq!(motion.fault(), None);
}

#[test]
fn halt_drops_queued_moves() {
    let shared = MotionShared::<QUEUE_SIZE>::new();
    let (mut motion, mut generator, monitor) = start(&shared, MotionConfig::default());
    for i in 1..6 {
        motion.enqueue_move(XYZData::new(i as f32 * 3.0, 0.0, 0.0), 50.0).unwrap();
    }
    monitor.on_thermal_fault();
    assert_eq!(motion.queued(), 0);

    let mut pins = RecordingPins::default();
    let mut timer = RecordingTimer::default();
    assert_eq!(generator.timer_fired(&mut pins, &mut timer), Firing::Halted);
    motion.recover().unwrap();
    assert_eq!(generator.timer_fired(&mut pins, &mut timer), Firing::Idle);
    assert_eq!(pins.rising, XYZData::new(0, 0, 0));
    assert_eq!(motion.planned_position(), XYZData::new(0.0, 0.0, 0.0));
}
