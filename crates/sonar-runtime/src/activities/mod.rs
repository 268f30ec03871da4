//! The rangefinder's periodic activities and capture handler.

pub mod blinker;
pub mod echo;
pub mod reporter;
pub mod trigger;

pub use blinker::{StatusBlinker, BLINKER};
pub use echo::EchoHandler;
pub use reporter::{DistanceReporter, Report, REPORTER};
pub use trigger::{TriggerGenerator, TRIGGER};
