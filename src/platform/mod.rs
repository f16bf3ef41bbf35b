//! Target-specific runtime glue shared by both components.

pub mod runtime;
