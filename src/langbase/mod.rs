//! Langbase Pipes client.
//!
//! The reasoner, grader, and refiner are all Langbase pipes reached through
//! [`LangbaseClient`]. Components depend on the [`PipeRunner`] trait so tests
//! can substitute scripted completions.

mod client;
mod types;


pub use client::{LangbaseClient, PipeRunner};
pub use types::*;
