//! Wall clock access, kept behind one function so every core operation
//! can take an explicit `now_ms` in tests.

use chrono::Utc;

pub(crate) fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}
