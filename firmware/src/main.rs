#![cfg_attr(target_os = "none", no_std)]
#![cfg_attr(target_os = "none", no_main)]

mod config;
mod identity;
mod status;

#[cfg(target_os = "none")]
mod bus;
#[cfg(target_os = "none")]
mod indicator;
#[cfg(target_os = "none")]
mod net;
#[cfg(target_os = "none")]
mod runtime;

#[cfg(not(target_os = "none"))]
fn main() {}
