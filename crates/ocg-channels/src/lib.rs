//! # ocg-channels
//!
//! The channel adapter layer: a registry of messaging-platform drivers that
//! all speak the same contract (info, initialize, start/stop, send, webhook,
//! health check), plus the standard incoming→agent→outgoing pump. Ships a
//! Telegram webhook driver; the other channel types plug into the same seam.

pub mod adapter;
pub mod telegram;

pub use adapter::{
    Button, ChannelAdapter, ChannelAgent, ChannelDriver, ChannelInfo, ChannelMessage,
    ChannelRegistry, ChannelResult, ChannelType, SendMessageRequest, SendMessageResponse,
};
pub use telegram::TelegramDriver;
