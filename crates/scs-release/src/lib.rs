//! Everything between the repository and a deployable artifact: the
//! layered constant resolver, the token template engine, the context-diff
//! patcher, the cpio/gzip payload codec, the release compiler, and the
//! auditor that verifies a live host against the compiled reference.

pub mod audit;
pub mod compiler;
pub mod cpio;
pub mod patch;
pub mod resolver;
pub mod template;

pub use compiler::{CompiledRelease, compile};
pub use resolver::VarMap;
pub use template::MissingPolicy;
