// Copyright (c) 2024 The Latticecoin Core developers
// Licensed under the Apache License, Version 2.0 see LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0 or the MIT license, see
// LICENSE-MIT or http://opensource.org/licenses/MIT

pub mod backend;
mod cache;
mod config;
mod flow;
pub mod tree;

pub use cache::FlowCache;
pub use config::ChainConfig;
pub use flow::{AddBlockResult, BlockFlow, FlowErr};
pub use tree::{BlockState, ChainErr, ChainTree, Reorg, TipUpdate};
