//! Shared infrastructure that is not specific to x86-64 or verification.

pub mod graph;
