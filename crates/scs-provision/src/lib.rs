//! Virtual-machine lifecycle: hypervisor capacity polling and ranking,
//! UUID/MAC allocation, kickstart delivery, the two-phase provisioning
//! state machine, image conversion and distribution, deprovisioning, and
//! secondary disks. All remote effect flows through `scs_remote::Connector`
//! so the whole machine runs against mocks in tests.

pub mod abort;
pub mod convert;
pub mod deprovision;
pub mod disk;
pub mod distribute;
pub mod hosts;
pub mod hypervisor;
pub mod ids;
pub mod kickstart;
pub mod overlay;
pub mod phase1;
pub mod phase2;

pub use phase1::{ProvisionOpts, ProvisionPlan, provision};
pub use phase2::{Phase2Opts, run_phase2};
