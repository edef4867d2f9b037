// Adapters behind the application ports

pub mod audit_store;
pub mod http_client;
pub mod in_memory;
pub mod metrics_store;
pub mod page_schema;
