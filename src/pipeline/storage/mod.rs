// Datalake adapters for the raw and dataset ports

pub mod fs;
pub mod in_memory;

pub use fs::FsDatalake;
pub use in_memory::InMemoryDatalake;
