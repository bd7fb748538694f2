//! Ready-made layers
//!
//! None of these are required by the stack; they are ordinary [`Layer`]
//! implementations an application may mount.
//!
//! [`Layer`]: crate::Layer

mod get_response;
mod trace;

pub use get_response::GetResponseLayer;
pub use trace::TraceLayer;
