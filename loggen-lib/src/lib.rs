#![cfg_attr(
    not(test),
    warn(clippy::print_stdout, clippy::dbg_macro),
    deny(clippy::unwrap_used, clippy::expect_used)
)]

pub mod backend;
pub mod client;
pub mod config;
pub mod confirm;
pub mod emitter;
pub mod payload;
pub mod record;
pub mod run;
pub mod schedule;
pub mod utils;
