//! # SensorTag DAQ Core Library
//!
//! This crate is the core library for the `sensortag-daq` application. It samples a fleet
//! of wireless sensor tags on a shared wall-clock grid, buffers the readings in memory and
//! persists them to an append-only CSV log. By organizing the project as a library, the
//! pipeline can be driven from the CLI (`main.rs`) as well as from integration tests with
//! simulated hardware and a paused clock.
//!
//! ## Crate Structure
//!
//! - **`acquisition`**: The per-device `AcquisitionWorker` that waits for grid boundaries,
//!   takes a reading and reconnects after faults.
//! - **`buffer`**: `ReadingBuffer`, the only shared mutable state between workers and the
//!   writer.
//! - **`clock`**: The `Clock` abstraction and the `SamplingGrid` arithmetic.
//! - **`config`**: Figment-based loading and validation of `DaqConfig`.
//! - **`coordinator`**: Ordered startup of workers and writer, and the `Pipeline` handle
//!   used to observe and stop them.
//! - **`data`**: The CSV log (`storage`) and the background `PersistenceWriter`.
//! - **`error`**: The `DaqError` enum for centralized error handling.
//! - **`error_recovery`**: Bounded retry for persistence.
//! - **`hardware`**: Capability traits for sensor tag access, the channel catalogue and the
//!   simulated driver.
//! - **`link`**: `DeviceLink`, the connection state machine for one device.
//! - **`logging`**: `tracing-subscriber` setup.
//! - **`reading`**: The `Reading` record and the CSV column `Schema`.

pub mod acquisition;
pub mod buffer;
pub mod clock;
pub mod config;
pub mod coordinator;
pub mod data;
pub mod error;
pub mod error_recovery;
pub mod hardware;
pub mod link;
pub mod logging;
pub mod reading;
