//! Crate-level test helpers and end-to-end scenarios.

pub(crate) mod support;

mod scenarios;
