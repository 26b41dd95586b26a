//! Glue for the `scrip` binary.

pub mod intent;
pub mod progress;
