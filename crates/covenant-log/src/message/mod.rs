// Message: a tagged union with one case per log-entry payload type.
//
// Dispatch for `check`/`handle`/`async_handle` is done by matching in
// `crate::engine` rather than through a trait object -- there is no shared
// behavior beyond the signature, and a match keeps every variant's logic in
// one readable place per spec design note "Polymorphism over messages".

pub mod ack;
pub mod cdl;
pub mod change_mode;
pub mod faulty_set;
pub mod nack;
pub mod update;

pub use ack::Ack;
pub use cdl::Cdl;
pub use change_mode::ChangeMode;
pub use faulty_set::FaultySet;
pub use nack::Nack;
pub use update::Update;

use covenant_codec::Canonical;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Message {
    Update(Update),
    ChangeMode(ChangeMode),
    FaultySet(FaultySet),
    Ack(Ack),
    Nack(Nack),
    Cdl(Cdl),
}

impl Message {
    pub fn kind(&self) -> &'static str {
        match self {
            Message::Update(_) => "Update",
            Message::ChangeMode(_) => "ChangeMode",
            Message::FaultySet(_) => "FaultySet",
            Message::Ack(_) => "Ack",
            Message::Nack(_) => "Nack",
            Message::Cdl(_) => "Cdl",
        }
    }
}

impl Canonical for Message {
    fn canonical_bytes(&self) -> Vec<u8> {
        match self {
            Message::Update(m) => m.canonical_bytes(),
            Message::ChangeMode(m) => m.canonical_bytes(),
            Message::FaultySet(m) => m.canonical_bytes(),
            Message::Ack(m) => m.canonical_bytes(),
            Message::Nack(m) => m.canonical_bytes(),
            Message::Cdl(m) => m.canonical_bytes(),
        }
    }
}
