// Each integration test binary compiles this module and uses a subset.
#![allow(dead_code)]

pub mod clients;
pub mod fixtures;
pub mod stores;

pub use clients::*;
pub use fixtures::*;
pub use stores::*;
