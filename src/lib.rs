pub mod config;
pub mod console;
pub mod error;
pub mod exec;
pub mod launcher;
pub mod logger;
pub mod model;
pub mod ssh;
pub mod transfer;

#[cfg(test)]
mod testing;
