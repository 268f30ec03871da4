#![doc = "Real-time core of the HC-SR04 rangefinder firmware."]

pub mod activities;
pub mod executor;
pub mod firmware;
pub mod measurement;
pub mod periodic;
pub mod realtime;

pub use activities::*;
pub use executor::*;
pub use firmware::*;
pub use measurement::*;
pub use periodic::*;
pub use realtime::*;
