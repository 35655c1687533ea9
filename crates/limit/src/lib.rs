pub mod error;
mod limiter;
mod progress;

pub use crate::limiter::{Limiter, Slot};
pub use crate::progress::Progress;
