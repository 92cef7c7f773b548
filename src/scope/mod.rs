pub mod binder;
pub mod container;

pub use binder::{ScopeBinder, ScopeInitializer};
pub use container::{ScopeId, SessionScope};
