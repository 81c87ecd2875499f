pub mod document;

pub use document::{Classification, Document, DocumentStatus, Upload};

/// Category assigned when the LLM returns no usable category.
pub const UNCLASSIFIED: &str = "Unclassified";

/// Category assigned when the document carries too little text to classify.
pub const NOT_IDENTIFIED: &str = "Not Identified";

/// Category recorded on FAILED documents alongside the error payload.
pub const PROCESSING_ERROR_CATEGORY: &str = "Processing Error";
