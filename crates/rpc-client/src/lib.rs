//! rpc-client: the reconnecting client socket (spec C6) and the typed
//! client proxy (spec C9), materialized as a generic builder rather than a
//! runtime property-access proxy.

pub mod channel;
pub mod proxy;
pub mod socket;

pub use proxy::{ClientProxy, RouteHandle};
pub use socket::ClientSocket;
