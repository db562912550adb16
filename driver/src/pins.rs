use core::mem::MaybeUninit;
use arduino_hal::{clock::MHz16, hal::{port::{PE0, PE1}, Atmega}, pac::USART0, port::mode::{Input, Output, PullUp}};
use avr_hal_generic::usart::UsartWriter;
use embedded_hal::serial::Write;
use motion_core::{StepDir, TriggerEdge, XYZData, XYZId};

use crate::my_clock::millis_init;

/*
* Arduino mega ramps 1.4 pinout.
* X Pins
*   step    A0(PF0)
*   dir     A1(PF1)
*   enable  D38(PD7)
*   min     D3(PE5)
*   max     D2(PE4)
* Y Pins
*   step    A6(PF6)
*   dir     A7(PF7)
*   enable  A2(PF2)
*   min     D14(PJ1)
* Z Pins
*   step    D46(PL3)
*   dir     D48(PL1)
*   enable  A8(PK0)
*   min     D18(PD3)
* E0 Pins
*   step    D26(PA4)
*   dir     D28(PA6)
*   enable  D24(PA2)
*/

// on my cnc I use the Z slot for X movement, and X for Z movement. Those are simply swapped,
// endstops included. Y2 is driven from E0 in lockstep with Y.
pub static mut X_STEP: MaybeUninit<arduino_hal::port::Pin<Output, arduino_hal::hal::port::PL3>> = MaybeUninit::uninit();
pub static mut X_DIR: MaybeUninit<arduino_hal::port::Pin<Output, arduino_hal::hal::port::PL1>> = MaybeUninit::uninit();
pub static mut Y_STEP: MaybeUninit<arduino_hal::port::Pin<Output, arduino_hal::hal::port::PF6>> = MaybeUninit::uninit();
pub static mut Y_DIR: MaybeUninit<arduino_hal::port::Pin<Output, arduino_hal::hal::port::PF7>> = MaybeUninit::uninit();
pub static mut E0_STEP: MaybeUninit<arduino_hal::port::Pin<Output, arduino_hal::hal::port::PA4>> = MaybeUninit::uninit();
pub static mut E0_DIR: MaybeUninit<arduino_hal::port::Pin<Output, arduino_hal::hal::port::PA6>> = MaybeUninit::uninit();
pub static mut Z_STEP: MaybeUninit<arduino_hal::port::Pin<Output, arduino_hal::hal::port::PF0>> = MaybeUninit::uninit();
pub static mut Z_DIR: MaybeUninit<arduino_hal::port::Pin<Output, arduino_hal::hal::port::PF1>> = MaybeUninit::uninit();

pub static mut WRITER: MaybeUninit<UsartWriter<Atmega, USART0, arduino_hal::port::Pin<Input, PE0>, arduino_hal::port::Pin<Output, PE1>, MHz16>> = MaybeUninit::uninit();

pub fn write_uart(source: &str) {
    write_uart_u8(source.as_bytes());
}
pub fn write_uart_u8(source: &[u8]) {
    #[allow(static_mut_refs)]
    let writer = unsafe{WRITER.assume_init_mut()};
    for b in source {
        let _ = nb::block!(writer.write(*b));
    }
}

/// Formats a line into a stack buffer and sends it over the serial port. Lines that do not
/// fit are dropped.
#[macro_export]
macro_rules! log {
    ($($arg:tt)*) => {{
        let mut buffer = str_buf::StrBuf::<96>::new();
        if ufmt::uwriteln!(buffer, $($arg)*).is_ok() {
            $crate::pins::write_uart(buffer.as_str());
        }
    }};
}

/// Switches pull the input to ground when pressed.
pub struct Endstops {
    x: arduino_hal::port::Pin<Input<PullUp>, arduino_hal::hal::port::PD3>,
    y: arduino_hal::port::Pin<Input<PullUp>, arduino_hal::hal::port::PJ1>,
    z: arduino_hal::port::Pin<Input<PullUp>, arduino_hal::hal::port::PE5>,
    pressed: XYZData<bool>,
}

impl Endstops {
    fn is_pressed(&self, axis: XYZId) -> bool {
        match axis {
            XYZId::X => self.x.is_low(),
            XYZId::Y => self.y.is_low(),
            XYZId::Z => self.z.is_low(),
        }
    }

    /// Reports `Triggered` for as long as a switch is held, `Released` once when it lets go.
    pub fn sample(&mut self) -> XYZData<TriggerEdge> {
        let now = XYZData::from_fn(|axis| self.is_pressed(axis));
        let edges = now.zip_map(&self.pressed, |now, before| match (*now, *before) {
            (true, _) => TriggerEdge::Triggered,
            (false, true) => TriggerEdge::Released,
            (false, false) => TriggerEdge::Idle,
        });
        self.pressed = now;
        edges
    }
}

/// Over-temperature cutoff from the driver board. Active low, on the free X max header.
pub struct ThermalCutoff(arduino_hal::port::Pin<Input<PullUp>, arduino_hal::hal::port::PE4>);

impl ThermalCutoff {
    pub fn is_tripped(&self) -> bool {
        self.0.is_low()
    }
}

pub struct Board {
    pub step_timer: arduino_hal::pac::TC1,
    pub endstops: Endstops,
    pub thermal: ThermalCutoff,
}

pub unsafe fn init_static_pins() -> Board {
    let Some(dp) = arduino_hal::Peripherals::take() else {
        panic!("peripherals already taken");
    };
    let pins = arduino_hal::pins!(dp);
    millis_init(dp.TC0);
    let serial = arduino_hal::default_serial!(dp, pins, 57600);
    let (_, serial_writer) = serial.split();

    // drivers are enabled with a low level and stay enabled so axes hold position
    pins.a8.into_output().set_low();
    pins.a2.into_output().set_low();
    pins.d24.into_output().set_low();
    pins.d38.into_output().set_low();

    #[allow(static_mut_refs)]
    unsafe {
        WRITER.write(serial_writer);
        X_STEP.write(pins.d46.into_output());
        X_DIR.write(pins.d48.into_output());
        Y_STEP.write(pins.a6.into_output());
        Y_DIR.write(pins.a7.into_output());
        E0_STEP.write(pins.d26.into_output());
        E0_DIR.write(pins.d28.into_output());
        Z_STEP.write(pins.a0.into_output());
        Z_DIR.write(pins.a1.into_output());
    }

    Board {
        step_timer: dp.TC1,
        endstops: Endstops {
            x: pins.d18.into_pull_up_input(),
            y: pins.d14.into_pull_up_input(),
            z: pins.d3.into_pull_up_input(),
            pressed: Default::default(),
        },
        thermal: ThermalCutoff(pins.d2.into_pull_up_input()),
    }
}

#[derive(Clone, Copy, PartialEq)]
pub enum Pin {
    XStep,
    YStep,
    ZStep,
    E0Step,
    XDir,
    YDir,
    ZDir,
    E0Dir,
}

pub fn translate_pin_set<T: avr_hal_generic::port::PinOps>(high: bool, b_pin: &mut avr_hal_generic::port::Pin<arduino_hal::port::mode::Output, T>) {
    if high {
        b_pin.set_high();
    } else {
        b_pin.set_low();
    }
}

#[allow(static_mut_refs)]
pub fn pin_write(pin: Pin, high: bool) {
    match pin {
        Pin::XStep => translate_pin_set(high, unsafe { X_STEP.assume_init_mut() }),
        Pin::YStep => translate_pin_set(high, unsafe { Y_STEP.assume_init_mut() }),
        Pin::ZStep => translate_pin_set(high, unsafe { Z_STEP.assume_init_mut() }),
        Pin::E0Step => translate_pin_set(high, unsafe { E0_STEP.assume_init_mut() }),
        Pin::XDir => translate_pin_set(high, unsafe { X_DIR.assume_init_mut() }),
        Pin::YDir => translate_pin_set(high, unsafe { Y_DIR.assume_init_mut() }),
        Pin::ZDir => translate_pin_set(high, unsafe { Z_DIR.assume_init_mut() }),
        Pin::E0Dir => translate_pin_set(high, unsafe { E0_DIR.assume_init_mut() }),
    }
}

/// Step and direction outputs as seen from the step interrupt. Only valid after
/// `init_static_pins`.
#[derive(Clone, Copy)]
pub struct DriverStaticStepDir;

impl StepDir for DriverStaticStepDir {
    fn step(&mut self, axis: XYZId, high: bool) {
        match axis {
            XYZId::X => pin_write(Pin::XStep, high),
            XYZId::Y => {
                pin_write(Pin::YStep, high);
                pin_write(Pin::E0Step, high);
            },
            XYZId::Z => pin_write(Pin::ZStep, high),
        }
    }

    fn dir(&mut self, axis: XYZId, negative: bool) {
        match axis {
            XYZId::X => pin_write(Pin::XDir, negative),
            XYZId::Y => {
                pin_write(Pin::YDir, negative);
                pin_write(Pin::E0Dir, negative);
            },
            XYZId::Z => pin_write(Pin::ZDir, negative),
        }
    }
}
