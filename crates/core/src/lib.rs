//! Core types and errors for the event correlator.

pub mod error;
pub mod events;
pub mod group;
pub mod limits;

pub use error::{Error, Result};
pub use events::*;
pub use group::*;
