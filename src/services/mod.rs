//! Image input/output services

pub mod format;
pub mod io;

pub use format::OutputFormatHandler;
pub use io::{ImageIOService, SUPPORTED_INPUT_FORMATS};
