//! rpc-core: the procedure builder, router, event emitter, pub/sub
//! adapter, and server socket that together implement the RPC framework
//! on top of axum.

pub mod auth;
pub mod broadcaster;
pub mod context;
pub mod defaults;
pub mod dynamic_loader;
pub mod event_emitter;
pub mod procedure;
pub mod pubsub;
pub mod router;
pub mod schema;
pub mod server_socket;
pub mod support;

pub use broadcaster::IoBroadcaster;
pub use context::{Middleware, MiddlewareContext, RequestMeta};
pub use dynamic_loader::{DynamicLoader, ModuleExport};
pub use event_emitter::{EventEmitter, RawChannel};
pub use procedure::{ConnectionHooks, Json, Kind, Procedure, ProcedureBuilder, ProcedureMeta};
pub use pubsub::{HttpStreamPubSub, InProcessPubSub, PubSubAdapter, SubscribeOpts, Subscription};
pub use router::{Mountable, Router};
pub use schema::{serde_schema, Schema, SerdeSchema, ValueValidator};
pub use server_socket::ServerSocket;
