//! Trellis Provider
//!
//! Providers implement create/read/update/delete for resource kinds. The
//! engine hands them fully known attributes as JSON objects and stores the
//! computed attributes they return without interpreting them.

mod error;
mod null;
mod provider;
mod registry;

pub use error::{Operation, ProviderError};
pub use null::NullProvider;
pub use provider::{Attributes, Created, Provider};
pub use registry::ProviderRegistry;
