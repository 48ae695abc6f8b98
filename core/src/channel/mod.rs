/// Broadcast channel modules
pub mod authorizer;
pub mod connection;
pub mod manager;
pub mod protocol;
pub mod transport;

pub use authorizer::{ChannelAuth, ChannelAuthorizer, HttpAuthorizer};
pub use connection::{ChannelConnection, ChannelHandle, EventHandler, EventHandlers};
pub use manager::{install_shared, ConnectionManager};
pub use protocol::{ChannelEvent, Frame};
pub use transport::{SocketPipe, Transport, WebSocketTransport};
