// ACK message: a GC-round participant accepts the proposed FaultySet.

use covenant_codec::Canonical;
use serde::{Deserialize, Serialize};

use crate::types::{EncodedHash, NodeId};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Ack {
    pub initiator: NodeId,
    pub hash_of_faulty_set: EncodedHash,
}

impl Canonical for Ack {
    fn canonical_bytes(&self) -> Vec<u8> {
        format!("ACK[{},{}]", self.initiator, self.hash_of_faulty_set).into_bytes()
    }
}
