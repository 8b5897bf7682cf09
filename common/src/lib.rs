pub mod buffer2;
pub mod file_format;
pub mod log_setup;
pub mod parallel;
pub mod test_utils;

pub use buffer2::Buffer2;
pub use file_format::{SerdeFormat, SerdeFormatError, SerdeFormatResult};
