//! Per-peer (network endpoint) shadow state.

use std::collections::HashSet;

#[derive(Debug, Default)]
pub struct Peer {
    pub seq: Option<u32>,
    pub devices: HashSet<u32>,
}

impl Peer {
    pub fn new() -> Self {
        Self::default()
    }
}
