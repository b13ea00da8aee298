pub mod clear;
mod dispatch;
pub mod trim;
pub mod usage;

pub use dispatch::dispatch;
