#![doc = include_str!("../README.md")]

pub mod audit;
mod common;
pub mod publish;
pub mod service;
pub mod signature;
pub mod store;
pub mod template;
pub mod token;

#[cfg(test)]
mod testing;

pub use common::*;
pub use service::{Backends, ExcerptService, ServiceConfig};
