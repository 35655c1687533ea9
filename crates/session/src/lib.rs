//! Disposable automation sessions.
//!
//! A [`Pool`] leases [`Session`]s, each wrapping one [`Automation`]
//! instance launched into its own scratch directory, and runs tasks on them
//! under a [`RetryPolicy`]. [`WorkerPool`] fans independent [`Job`]s out
//! across a fixed number of workers sharing the same pool.

mod automation;
pub mod error;
#[cfg(any(test, feature = "mock"))]
pub mod mock;
mod pool;
mod retry;
mod session;
mod worker;

pub use crate::automation::{Automation, LaunchSpec, Launcher};
pub use crate::pool::Pool;
pub use crate::retry::RetryPolicy;
pub use crate::session::{Session, SessionHandle, SessionState};
pub use crate::worker::{Job, WorkerPool};
