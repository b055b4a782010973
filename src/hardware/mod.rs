//! Hardware access layer.
//!
//! The device-access library is an external collaborator; this module pins down the
//! small surface the pipeline uses ([`capabilities`]), the channel catalogue
//! ([`channels`]) and a simulated backend ([`mock`]).

pub mod capabilities;
pub mod channels;
pub mod mock;

pub use capabilities::{SensorTagDriver, SensorTagSession};
pub use channels::Channel;
pub use mock::SimulatedDriver;
