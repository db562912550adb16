#![no_std]
#![no_main]
#![feature(abi_avr_interrupt)]

mod my_clock;
mod pins;
mod stepper_interrupt;

use motion_core::{Direction, MotionConfig, MotionCore, MotionError, MotionShared, RecoveryError, XYZData};
use my_clock::millis;
use static_cell::StaticCell;
use stepper_interrupt::{retired_blocks, stepper_interrupt_init};

pub const QUEUE_SIZE: usize = 16;

/// Time a halt stays latched before the machine resyncs and carries on.
const RECOVER_AFTER_MS: u32 = 2_000;

static SHARED: StaticCell<MotionShared<QUEUE_SIZE>> = StaticCell::new();

/// Test pattern: a square with a lift and plunge at the start corner, at mixed feed rates.
const PROGRAM: [(XYZData<f32>, f32); 7] = [
    (XYZData::new(0.0, 0.0, 5.0), 10.0),
    (XYZData::new(40.0, 0.0, 5.0), 100.0),
    (XYZData::new(40.0, 40.0, 5.0), 100.0),
    (XYZData::new(0.0, 40.0, 5.0), 60.0),
    (XYZData::new(0.0, 0.0, 5.0), 60.0),
    (XYZData::new(20.0, 20.0, 5.0), 150.0),
    (XYZData::new(0.0, 0.0, 0.0), 10.0),
];

fn micrometres(mm: f32) -> i32 {
    (mm * 1000.0) as i32
}

#[panic_handler]
fn panic(_info: &core::panic::PanicInfo) -> ! {
    avr_device::interrupt::disable();
    loop {
        avr_device::asm::sleep();
    }
}

#[arduino_hal::entry]
fn main() -> ! {
    let mut board = unsafe { pins::init_static_pins() };
    unsafe { avr_device::interrupt::enable(); }
    let shared: &'static MotionShared<QUEUE_SIZE> = SHARED.init_with(MotionShared::new);
    let config = MotionConfig::default();
    log!(
        "Startup: {} slot queue, {} {} {} steps/mm, {} mm/s^2",
        QUEUE_SIZE,
        config.steps_per_mm.x as u32,
        config.steps_per_mm.y as u32,
        config.steps_per_mm.z as u32,
        config.acceleration as u32
    );
    let idle_ticks = config.timing.idle_ticks;
    let (mut motion, generator, monitor) = match MotionCore::new(shared, config, XYZData::from_clone(Direction::Negative)) {
        Ok(parts) => parts,
        Err(e) => {
            log!("bad motion config: {}", e);
            loop {
                arduino_hal::delay_ms(1000);
            }
        },
    };
    stepper_interrupt_init(board.step_timer, generator, idle_ticks);

    let mut next = 0;
    let mut halted_at = None;
    loop {
        let now = millis();
        let edges = board.endstops.sample();
        if let Some(fault) = monitor.poll(board.thermal.is_tripped(), |axis| edges[axis]) {
            if halted_at.is_none() {
                log!("halt: {}", fault);
                halted_at = Some(now);
            }
        }

        if let Some(since) = halted_at {
            if now.wrapping_sub(since) >= RECOVER_AFTER_MS {
                match motion.recover() {
                    Ok(()) => {
                        halted_at = None;
                        next = 0;
                        match motion.current_position() {
                            Ok(p) => log!("recovered at {} {} {} um", micrometres(p.x), micrometres(p.y), micrometres(p.z)),
                            Err(_) => log!("recovered, position unreachable"),
                        }
                    },
                    // a fault landed after the stop, give it its own wait
                    Err(RecoveryError::NotAcknowledged) => {
                        if let Some(fault) = motion.fault() {
                            log!("halt renewed: {}", fault);
                        }
                        halted_at = Some(now);
                    },
                    Err(e) => log!("recover: {:?}", e),
                }
            }
            continue;
        }

        if let Some((target, feed_rate)) = PROGRAM.get(next) {
            match motion.enqueue_move(*target, *feed_rate) {
                Ok(()) => next += 1,
                // the planner keeps what fit, the same call picks it up once blocks retire
                Err(MotionError::QueueFull) => {},
                // reported by the safety poll
                Err(MotionError::Halted(_)) => {},
                Err(e) => {
                    log!("skipping move {}: {}", next, e);
                    next += 1;
                },
            }
        } else if motion.is_idle() {
            log!("program done, {} blocks", retired_blocks());
            next = 0;
            arduino_hal::delay_ms(1000);
        }
    }
}
