//! # ocg-rpc
//!
//! The request/reply layer joining the gateway and agent processes: JSON
//! bodies behind a u32 big-endian length prefix over a Unix domain socket.
//! The server accepts arbitrary concurrent connections and serves each one
//! serially; the client retries its initial connect until a deadline.

pub mod client;
pub mod frame;
pub mod proto;
pub mod server;

pub use client::RpcClient;
pub use frame::{read_frame, write_frame, MAX_FRAME_BYTES};
pub use proto::{
    ChatArgs, ChatReply, MemoryGetArgs, MemorySearchArgs, MemoryStoreArgs, RpcRequest,
    RpcResponse, StatsReply, ToolResultReply,
};
pub use server::{RpcServer, RpcService};
