//! One module per entity kind from the data model. Each record type owns
//! its parse/validate rules; cross-record invariants (unique aliases, the
//! build parent DAG, one default-build network per location) live beside the
//! type they protect.

pub mod application;
pub mod build;
pub mod constant;
pub mod environment;
pub mod file;
pub mod hypervisor;
pub mod location;
pub mod network;
pub mod resource;
pub mod system;

pub use application::Application;
pub use build::Build;
pub use constant::Constant;
pub use environment::Environment;
pub use file::{EnvFlags, FileDef, FileKind, FileMap};
pub use hypervisor::{HvEnvironment, HvNetwork, HvSystem, Hypervisor};
pub use location::Location;
pub use network::Network;
pub use resource::{Resource, ResourceAssign, ResourceKind};
pub use system::{System, VmKind};
