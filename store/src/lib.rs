//! websettings storage backends
//!
//! Namespaced settings over a synchronous host key-value store, settings
//! staged in a file and persisted to an asynchronous durable database, and
//! the selector that picks between them.

pub mod codec;
pub mod durable;
pub mod event_loop;
pub mod file;
pub mod local;
pub mod memory;
pub mod persistent;
pub mod prefix;
pub mod registry;
pub mod selector;

pub use codec::*;
pub use durable::*;
pub use event_loop::*;
pub use file::*;
pub use local::*;
pub use memory::*;
pub use persistent::*;
pub use prefix::*;
pub use registry::*;
pub use selector::*;
