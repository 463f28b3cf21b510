//! Remote execution over SSH/SCP. All effect on managed hosts and
//! hypervisors flows through the [`RemoteHost`] trait so higher layers can
//! run against the in-memory [`mock`] in tests.

pub mod host;
pub mod known_hosts;
pub mod mock;

pub use host::{Connector, ExecResult, RemoteHost, SshConnector, SshHost};
pub use mock::{MockConnector, MockRemote};
