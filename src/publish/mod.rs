//! Publishing: bounded retries, the generation swap, and the run controller

mod controller;
mod retry;
mod swap;

pub use controller::{PublishController, PublishError, RunOutcome, RunReport, RunState};
pub use retry::{retry, RetryError, RetryPolicy};
pub use swap::{
    is_reserved_name, GenerationMarker, GenerationSwap, RecoveryAction, SwapError, GENERATION_MARKER,
};
