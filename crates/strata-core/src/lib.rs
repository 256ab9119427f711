pub mod action;
pub mod attribute;
pub mod catalog;
pub mod command;
pub mod config;
pub mod error;
pub mod expression;
pub mod filesystem;
pub mod io;
pub mod paths;
pub mod rule;
pub mod service_lock;
pub mod specification;
pub mod study;
pub mod subject;
pub mod types;
pub mod work_queue;

#[cfg(test)]
mod testing;

pub use error::{Result, StrataError};
