mod error;
mod order;
mod resolver;

pub use error::ResolveError;
pub use resolver::{Resolver, StandardResolver};
