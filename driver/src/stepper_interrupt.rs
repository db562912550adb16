use core::cell::{Cell, RefCell};

use avr_device::interrupt::Mutex;
use motion_core::{Firing, StepGenerator, StepTimer};

use crate::{pins::DriverStaticStepDir, QUEUE_SIZE};

// spec sheet: https://ww1.microchip.com/downloads/en/DeviceDoc/doc7799.pdf
// rust timer block: https://blog.rahix.de/005-avr-hal-millis/

// 16MHz / 8 gives the 2MHz tick the step timing is computed for.
const PRESCALER: u32 = 8;

/// Timer 1 in CTC mode. Each compare match restarts the count, so the compare value is
/// the delay until the next firing.
pub struct Tc1(arduino_hal::pac::TC1);

impl StepTimer for Tc1 {
    fn reload(&mut self, ticks: u32) {
        let ticks = u16::try_from(ticks).unwrap_or(u16::MAX);
        self.0.ocr1a.write(|w| unsafe { w.bits(ticks) });
    }
}

struct StepInterrupt {
    generator: StepGenerator<'static, QUEUE_SIZE>,
    timer: Tc1,
    pins: DriverStaticStepDir,
}

static STEP_INTERRUPT: Mutex<RefCell<Option<StepInterrupt>>> = Mutex::new(RefCell::new(None));
static RETIRED: Mutex<Cell<u32>> = Mutex::new(Cell::new(0));

/// Hands the generator to the timer interrupt and starts the timer at `first_ticks`.
pub fn stepper_interrupt_init(treg: arduino_hal::pac::TC1, generator: StepGenerator<'static, QUEUE_SIZE>, first_ticks: u32) {
    treg.tccr1a.write(|w| w.wgm1().bits(0b00));
    treg.tccr1b.write(|w| {
        let w = w.wgm1().bits(0b01);
        match PRESCALER {
            8 => w.cs1().prescale_8(),
            64 => w.cs1().prescale_64(),
            256 => w.cs1().prescale_256(),
            1024 => w.cs1().prescale_1024(),
            _ => panic!(),
        }
    });
    let mut timer = Tc1(treg);
    timer.reload(first_ticks);
    timer.0.timsk1.write(|w| w.ocie1a().set_bit());

    avr_device::interrupt::free(|cs| {
        RETIRED.borrow(cs).set(0);
        STEP_INTERRUPT.borrow(cs).replace(Some(StepInterrupt { generator, timer, pins: DriverStaticStepDir }));
    });
}

#[avr_device::interrupt(atmega2560)]
fn TIMER1_COMPA() {
    avr_device::interrupt::free(|cs| {
        if let Some(isr) = STEP_INTERRUPT.borrow(cs).borrow_mut().as_mut() {
            if let Firing::Stepped { retired: Some(_) } = isr.generator.timer_fired(&mut isr.pins, &mut isr.timer) {
                let retired = RETIRED.borrow(cs);
                retired.set(retired.get().wrapping_add(1));
            }
        }
    })
}

/// Blocks finished since start up.
pub fn retired_blocks() -> u32 {
    avr_device::interrupt::free(|cs| RETIRED.borrow(cs).get())
}
