pub mod config;
pub mod deployment;
pub mod env;
pub mod error;
pub mod graph;
pub mod health;
pub mod io;
pub mod marker;
pub mod restart;
pub mod toggles;
pub mod unit;

pub use error::{Result, StagehandError};
