//! Energy integration
//!
//! Turns the meter's cumulative mWh counters into a per-session energy
//! figure and flags samples that would run the total backwards.

mod accumulator;

pub use accumulator::{ChargePoint, EnergyAccumulator, JOULES_PER_MWH};
