//! Timestamp handling shared across the crate.

pub mod timestamps;

pub use timestamps::{
    elapsed_seconds, format_iso8601, iso_timestamp, monotonic_after, now_utc, Timestamp,
};
