// FaultySet message: a set of POMs proposed as the common blacklist for a GC round.

use std::collections::HashMap;

use covenant_codec::Canonical;
use serde::{Deserialize, Serialize};

use crate::types::{blacklist_canonical, EncodedHash, NodeId, Pom};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FaultySet {
    pub poms: HashMap<NodeId, Pom>,
}

impl Canonical for FaultySet {
    fn canonical_bytes(&self) -> Vec<u8> {
        format!("FS{{POM{{{}}}}}", blacklist_canonical(&self.poms)).into_bytes()
    }
}

pub fn encoded_hash(fs: &FaultySet) -> EncodedHash {
    EncodedHash(covenant_codec::canonical_hash(fs))
}
