//! Protocol module - wire constants and fixed-offset structures.

pub mod constants;
pub mod header;

pub use constants::*;
pub use header::{FelRequest, FelVersionReply, SubmitHeader};
