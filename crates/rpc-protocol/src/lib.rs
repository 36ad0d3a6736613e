// rpc-protocol: tagged-JSON codec and wire types shared by the router and
// client. Holds no async runtime dependency — everything here is plain
// data plus synchronous encode/decode.

pub mod codec;
pub mod error;
pub mod wire;

pub use codec::{BigInt, RichValue};
pub use error::{CodecError, HttpError, RpcError};
pub use wire::Frame;
