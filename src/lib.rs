//! Facade over the scs workspace: re-exports the library crates so
//! integrations can depend on one name, while the `scs` binary drives the
//! CLI in `scs_cli`.

pub use scs_cli as cli;
pub use scs_core as core;
pub use scs_ipam as ipam;
pub use scs_provision as provision;
pub use scs_release as release;
pub use scs_remote as remote;
pub use scs_store as store;
