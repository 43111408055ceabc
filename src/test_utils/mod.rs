//! Helpers shared by unit and integration tests.
//!
//! Compiled for unit tests and, through the `test-util` feature, for the
//! integration tests under `tests/`.

pub mod collecting_handler;
pub mod recording_delivery;

pub use collecting_handler::CollectingHandler;
pub use recording_delivery::RecordingDelivery;
