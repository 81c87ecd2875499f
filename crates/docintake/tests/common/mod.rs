//! Shared test utilities for docintake integration tests.
//!
//! This module provides:
//! - `TestHarness` wiring real stores in a temp directory to scripted
//!   OCR and LLM doubles
//! - PDF builders producing real documents with lopdf

pub mod builders;
pub mod harness;

pub use builders::*;
pub use harness::*;
