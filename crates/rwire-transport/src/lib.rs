pub mod channel;
pub mod chunked;
pub mod error;
pub mod serializer;
pub mod shared;
pub mod terrible;

pub use channel::{channel, channel_from_config, ChannelCommandBuffer, ChannelReceiver};
pub use chunked::ChunkedCommandHandler;
pub use error::TransportError;
pub use serializer::{CommandHandler, CommandSerializer, Deliver};
pub use shared::SharedHandler;
pub use terrible::TerribleCommandBuffer;
