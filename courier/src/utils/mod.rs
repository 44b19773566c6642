//! Small helpers shared across modules.

pub mod clock;
pub mod fs;
pub mod key;

pub use clock::{Clock, SystemClock};
pub use key::schedule_key;
