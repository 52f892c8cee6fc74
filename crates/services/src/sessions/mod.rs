mod controller;
mod locks;
mod snapshot;

// Public API of the session subsystem.
pub use crate::error::{Recovery, SessionError};
pub use controller::{Outcome, SessionController};
pub use locks::LearnerLocks;
