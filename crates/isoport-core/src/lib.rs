pub mod artifact;
pub mod b64;
pub mod backend;
pub mod error;
pub mod fetch;
pub mod job;
pub mod outcome;

pub use artifact::*;
pub use backend::*;
pub use error::*;
pub use job::*;
pub use outcome::*;

/// Ceiling applied to every payload crossing the transport, in either direction.
pub const MAX_MESSAGE_BYTES: usize = 25 * 1024 * 1024;
