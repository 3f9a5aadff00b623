pub mod call;
pub mod dispatcher;
pub mod handoff;
pub mod process;
pub mod thread;
pub mod worker;

pub use call::*;
pub use dispatcher::*;
pub use handoff::*;
pub use process::WorkerCommand;
pub use worker::*;
