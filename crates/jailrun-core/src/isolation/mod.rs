//! Linux isolation primitives
//!
//! - `clone3` - clone3 syscall for creating a process inside new namespaces
//! - `namespace` - which namespaces the bootstrap child gets

pub mod clone3;
pub mod namespace;

pub use self::namespace::NamespaceConfig;
