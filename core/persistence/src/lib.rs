#[macro_use]
extern crate diesel;

pub mod executor;
pub mod timestamp;
pub mod types;
