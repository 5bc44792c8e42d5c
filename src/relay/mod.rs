//! Streaming relay: upstream bytes -> frames -> per-session fan-out

pub mod events;
pub mod multiplexer;
pub mod parser;
pub mod upstream;

pub use events::{ChannelKind, Delta, ProviderFrame, StreamEvent};
pub use multiplexer::{Multiplexer, Subscription, SubscriptionHandle};
pub use parser::{FrameParser, frames};
pub use upstream::{ByteStream, CompletionRequest, DashScopeClient, PromptMessage, UpstreamClient};
