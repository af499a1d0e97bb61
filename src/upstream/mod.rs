//! 上行事件：头部、构建、传输接口与发送

pub mod event;
pub mod mock;
pub mod sender;
pub mod transport;

pub use event::{UpstreamHeader, WireEvent};
pub use mock::MockTransport;
pub use sender::{ResultHandler, UpstreamDataSender};
pub use transport::{Ack, StdoutTransport, Transport};
