//! Call bookkeeping: the in-memory status registry and request validation.

pub mod registry;     // Per-call status records
pub mod validation;   // Destination, language and year checks

pub use registry::{CallRegistry, CallState};
pub use validation::{validate_outbound_call, ValidationError};
