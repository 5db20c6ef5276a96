#![deny(warnings, rust_2018_idioms)]
#![forbid(unsafe_code)]

pub use policy_configurator_core as core;
pub use policy_configurator_engine as engine;

mod args;
pub mod state;

pub use self::args::Args;
