#![forbid(unsafe_code)]

pub mod cli;
pub mod inventory;
pub mod sources;
