#[macro_use]
extern crate serde_derive;
#[macro_use]
extern crate log;
#[macro_use]
extern crate anyhow;

pub mod channel;
pub mod core;
pub mod dag;
pub mod memory;
pub mod net;
pub mod runtime;
pub mod strategy;
pub mod utils;
