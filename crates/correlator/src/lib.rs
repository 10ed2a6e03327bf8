//! Event correlation engine.
//!
//! - `EventCorrelator` groups events by correlation key and emits one
//!   aggregated event per completed group
//! - `CorrelationPolicy` supplies the business rules
//! - Background expiry sweep, gated on the primary flag
//! - `get_response` waits for the result of one group

pub mod config;
pub mod correlator;
pub mod locks;
pub mod notifications;
pub mod policy;
pub mod processed;
mod responses;
pub mod scheduler;

pub use config::{CorrelatorConfig, ExpiryAction};
pub use correlator::{EventCorrelator, SweepReport};
pub use notifications::{CorrelationListener, CorrelationNotification, LogListener};
pub use policy::{CollectionPolicy, CorrelationKeyStrategy, CorrelationPolicy};
