#![no_std]

// Shared logic for the power-meter sampling agent.
//
// This crate stays portable across the ESP32 firmware and host tooling by
// avoiding the Rust standard library. Bus, network and timing access enter
// through traits so the whole sampling loop runs unchanged on the host.

pub mod config;
pub mod cycle;
pub mod escalation;
pub mod failure;
pub mod meter;
pub mod telemetry;
pub mod timing;
pub mod upload;
