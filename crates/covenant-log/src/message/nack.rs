// NACK message: a GC-round participant rejects the proposed FaultySet,
// carrying the POMs it knows about that the proposer did not include.

use std::collections::HashMap;

use covenant_codec::Canonical;
use serde::{Deserialize, Serialize};

use crate::types::{blacklist_canonical, EncodedHash, NodeId, Pom};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Nack {
    pub initiator: NodeId,
    pub hash_of_faulty_set: EncodedHash,
    pub new_poms: HashMap<NodeId, Pom>,
}

impl Canonical for Nack {
    fn canonical_bytes(&self) -> Vec<u8> {
        format!(
            "NACK[{},{},POM{{{}}}]",
            self.initiator,
            self.hash_of_faulty_set,
            blacklist_canonical(&self.new_poms)
        )
        .into_bytes()
    }
}
