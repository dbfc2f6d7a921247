//! Transport seam between connections and the WebSocket library
//!
//! Connections only see a boxed sink and stream of tungstenite messages, so
//! tests can drive them with an in-memory transport.

use std::pin::Pin;

use async_trait::async_trait;
use futures_util::{Sink, Stream, StreamExt};
use tokio_tungstenite::{
    connect_async,
    tungstenite::{Error as WsError, Message as WsMessage},
};
use tracing::debug;
use url::Url;

/// Outgoing half of an established transport
pub type WsSink = Pin<Box<dyn Sink<WsMessage, Error = WsError> + Send>>;

/// Incoming half of an established transport
pub type WsSource = Pin<Box<dyn Stream<Item = Result<WsMessage, WsError>> + Send>>;

/// Opens transports for connections
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self, url: &Url) -> Result<(WsSink, WsSource), WsError>;
}

/// Connector backed by `tokio-tungstenite`
#[derive(Debug, Clone, Copy, Default)]
pub struct WsConnector;

#[async_trait]
impl Connector for WsConnector {
    async fn connect(&self, url: &Url) -> Result<(WsSink, WsSource), WsError> {
        let (stream, response) = connect_async(url.as_str()).await?;
        debug!(url = %url, status = %response.status(), "WebSocket handshake complete");

        let (sink, source) = stream.split();
        let sink: WsSink = Box::pin(sink);
        let source: WsSource = Box::pin(source);
        Ok((sink, source))
    }
}
