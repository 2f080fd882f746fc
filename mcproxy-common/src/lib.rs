pub mod configs;
pub mod data;
pub mod error;
pub mod metrics;
pub mod protocol;
pub mod ring;

#[macro_use]
extern crate serde_derive;
#[macro_use]
extern crate log;
#[macro_use]
extern crate metrics as lib_metrics;
