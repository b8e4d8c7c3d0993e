#![allow(clippy::new_ret_no_self)]

#[macro_use]
extern crate log;

pub mod blocks;
pub mod runtime;

pub use anyhow::Context;
pub use anyhow::Result;
pub use num_complex::Complex32;
