//! Internal numeric utilities.

pub(crate) mod linalg;
