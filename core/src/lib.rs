//! websettings Core Library
//! 
//! Core types, traits, and abstractions shared by every settings backend.
//! The host storage primitives are consumed through the traits defined here.

pub mod types;
pub mod traits;
pub mod error;
pub mod config;

pub use types::*;
pub use traits::*;
pub use error::*;
pub use config::*;
