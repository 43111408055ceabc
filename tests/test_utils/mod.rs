//! Helpers shared by the integration tests.

#![allow(dead_code)]

pub mod mock_loki;
pub mod shared_buffer;

pub use mock_loki::{MockLoki, PushRequest};
pub use shared_buffer::SharedBuf;

use std::time::{Duration, Instant};

/// Poll `condition` every few milliseconds until it holds or `timeout` passes.
pub fn eventually(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(5));
    }
    condition()
}
