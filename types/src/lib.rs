//! Core domain types for the JSONP loader.
//!
//! This crate contains pure domain types with no IO, no async, and minimal dependencies:
//! the request descriptor, correlation tokens, query parameters, response
//! validation, and the error taxonomy a pending load rejects with.

// Pedantic lint configuration - these are intentional design choices
#![allow(clippy::missing_errors_doc)] // Result-returning functions are self-explanatory

mod descriptor;
mod error;
mod params;
mod response;
mod token;

pub use descriptor::{DEFAULT_PARAM_NAME, DEFAULT_TIMEOUT, PostProcess, RequestDescriptor};
pub use error::{DescriptorError, ErrorCode, LoadError, TransportError};
pub use params::{ParamValue, QueryParams};
pub use response::{DEFAULT_RESPONSE_FIELD, ResponsePolicy, is_truthy};
pub use token::{CorrelationToken, TokenSource, is_token_char};

/// Raw payload passed to a correlation callback.
pub type Payload = serde_json::Value;
