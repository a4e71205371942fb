//! pirate_radio: FM playback daemon core.
//!
//! Scans a music library into an ordered track list and keeps an external
//! modulator fed with PCM from one transcoder process per track. The CLI in
//! `main.rs` wires these pieces together with signal handling.

pub mod config;
pub mod error;
pub mod library;
pub mod pipeline;
pub mod playlist;
pub mod process;
pub mod shutdown;
pub mod source;
pub mod testing;
pub mod track;
