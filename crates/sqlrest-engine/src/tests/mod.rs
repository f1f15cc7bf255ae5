//! Test suites for the command engine.

pub(crate) mod support;
