//! Device Access Capabilities
//!
//! The acquisition pipeline never talks to the radio itself. Everything it needs from
//! a sensor tag is expressed by two small traits:
//!
//! - [`SensorTagDriver`] opens connections by address
//! - [`SensorTagSession`] switches channels on and off and reads them
//!
//! # Design Philosophy
//!
//! Each capability trait:
//! - Is async (uses #[async_trait])
//! - Is thread-safe (requires Send, drivers also Sync)
//! - Uses anyhow::Result for errors; any error is a link fault
//! - Knows nothing about timing, rounding or retries
//!
//! # Example
//!
//! ```rust,ignore
//! async fn read_light<D: SensorTagDriver>(driver: &D) -> anyhow::Result<f64> {
//!     let mut session = driver.connect("54:6C:0E:53:45:B7").await?;
//!     session.enable(Channel::Light).await?;
//!     let values = session.read(Channel::Light).await?;
//!     session.disable(Channel::Light).await?;
//!     Ok(values[0])
//! }
//! ```

use anyhow::Result;
use async_trait::async_trait;

use crate::hardware::channels::Channel;

/// Capability: Connection Establishment
///
/// Opens a live session to one device. Shared by every worker, so implementations
/// must be `Sync`; the sessions they hand out are owned by exactly one worker.
#[async_trait]
pub trait SensorTagDriver: Send + Sync + 'static {
    /// Session type produced by [`connect`](Self::connect).
    type Session: SensorTagSession;

    /// Connect to the device at `address`.
    ///
    /// # Returns
    /// - Ok(session) once the device accepted the connection
    /// - Err on any connection-level failure (out of range, refused, adapter busy)
    async fn connect(&self, address: &str) -> Result<Self::Session>;
}

/// Capability: Channel Control and Readout
///
/// # Contract
/// - A channel must be enabled before it is read
/// - `read` returns exactly `channel.field_names().len()` values, in field order
/// - Any error means the link is no longer trustworthy
#[async_trait]
pub trait SensorTagSession: Send + 'static {
    /// Power up a channel.
    async fn enable(&mut self, channel: Channel) -> Result<()>;

    /// Power down a channel.
    async fn disable(&mut self, channel: Channel) -> Result<()>;

    /// Read the current value tuple of an enabled channel.
    async fn read(&mut self, channel: Channel) -> Result<Vec<f64>>;
}
