// covenant-net: everything that moves bytes between nodes. The engine
// (`covenant-log`) only knows how to accept and apply entries handed to it;
// this crate is what hands them over -- the blob transport adaptor, the
// peer-RPC fallback, the anti-entropy exchanger that pulls, and the
// remote-sync worker that pushes.

pub mod adaptor;
pub mod error;
pub mod exchange;
pub mod gossip;
pub mod rpc;
pub mod sync;

pub use adaptor::{Adaptor, InMemoryAdaptor, RemoteStore};
pub use error::NetError;
pub use exchange::Exchanger;
pub use gossip::GossipWorker;
pub use rpc::{RpcClient, RpcServer};
pub use sync::{spawn as spawn_sync_worker, SyncHandle};
