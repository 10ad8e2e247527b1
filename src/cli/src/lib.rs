//! Cranberry CLI - run declarative container image plans.

pub mod commands;
pub mod output;
