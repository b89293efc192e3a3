//! CLI command implementations for fgtrim.
//!
//! - [`trim_primers`] - Trim PCR primers from aligned amplicon reads

#![allow(
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss,
    clippy::missing_errors_doc,
    clippy::needless_pass_by_value,
    clippy::struct_excessive_bools,
    clippy::uninlined_format_args
)]

pub mod command;
pub mod common;
pub mod trim_primers;
