#![no_std]

mod block;
mod config;
mod error;
mod kinematics;
mod motion;
mod planner;
mod queue;
mod safety;
mod stepper;
pub mod stepper_math;
mod xyz;

pub use block::*;
pub use config::*;
pub use error::*;
pub use kinematics::*;
pub use motion::*;
pub use planner::*;
pub use queue::*;
pub use safety::*;
pub use stepper::*;
pub use xyz::*;
