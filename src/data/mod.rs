//! Persistence of readings: the CSV log and the writer task that feeds it.
pub mod storage;
pub mod writer;
