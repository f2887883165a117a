//! Integration tests for the testbay CLI
//!
//! These tests spawn the actual binary against simulated `null` devices.
//! They are slower and should be run separately from unit tests.

mod cli_tests;
