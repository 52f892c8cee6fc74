//! Domain model of the staff trainer: learners and their conversation state,
//! the curriculum, quizzes, attempts and per-topic progress.

pub mod error;
pub mod model;
pub mod time;

pub use error::Error;
pub use time::Clock;
