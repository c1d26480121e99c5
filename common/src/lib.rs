pub mod json;
pub mod log;
pub mod protocol;
