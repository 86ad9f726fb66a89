mod error;
mod fs_registry;
mod memory;
mod registry;

pub use error::RegistryError;
pub use fs_registry::FsUnitRegistry;
pub use memory::MemoryUnitRegistry;
pub use registry::UnitRegistry;
