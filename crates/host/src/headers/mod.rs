//! Header handling: raw multi-value storage, the quote-aware comma tokenizer
//! and the restricted response-header interceptor.
//!
//! # Components
//!
//! - [`HeaderStore`]: case-insensitive map from header name to an ordered
//!   array of raw values, one element per header line as received
//! - [`SharedHeaders`]: shareable handle over a store, identity-comparable
//!   for the environment's guarded assign-once semantics
//! - [`split_quoted_commas`] / [`normalize_values`]: the derived logical view
//!   splitting raw values on unquoted commas
//! - [`ResponseHeaderWriter`]: response-side decorator redirecting writes to
//!   `Content-Length`, `Keep-Alive` and `Transfer-Encoding` onto
//!   [`NativeResponseProps`] instead of storage

mod store;
pub use store::HeaderStore;
pub use store::SharedHeaders;

mod tokenizer;
pub use tokenizer::normalize_values;
pub use tokenizer::split_quoted_commas;

mod response;
pub use response::NativeResponseProps;
pub use response::ResponseHeaderWriter;
