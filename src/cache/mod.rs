pub mod durable;
pub mod error;
pub mod process;
