//! Integration tests for fgtrim.
//!
//! These tests run the compiled binary end to end and read its output back with noodles.

mod helpers;
mod test_trim_primers;
