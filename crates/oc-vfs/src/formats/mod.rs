//! File format handlers

pub mod sfo;

pub use sfo::{ParamSfo, SfoParser, SfoValue};
