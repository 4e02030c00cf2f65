//! Runtime linked into every `edgecov`-instrumented binary.
//!
//! Exposes exactly one symbol to instrumented code, the probe
//! [`__edgecov_hit`], plus a pre-`main` constructor that attaches the
//! shared coverage map (or degrades to a process-local buffer).

pub mod coverage;

pub use coverage::*;
