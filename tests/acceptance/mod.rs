//! Integration tests for rangefinder acceptance testing.

mod common;
mod measurement_test;
mod scenarios_test;
mod scheduling_test;
