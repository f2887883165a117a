//! Unit tests for testbay CLI
//!
//! These tests use simulated devices and mocked ports and run without
//! touching real hardware.

mod engine;
mod helpers;
mod mocks;
mod property_tests;
mod scheduler;
