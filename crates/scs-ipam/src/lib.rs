//! IP address management: one index file per /24 under `net/`, allocation
//! and reservation semantics, range maintenance, and the liveness probe
//! used before handing an address out.

pub mod addr;
pub mod index;
pub mod probe;

pub use index::{AssignOutcome, IndexRow};
pub use probe::{FixedProbe, Liveness, NetProbe};
