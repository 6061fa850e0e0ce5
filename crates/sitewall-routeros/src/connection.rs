use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite, BufStream};
use tokio::net::TcpStream;
use tracing::debug;

use crate::protocol::{
    attribute_word, parse_reply, read_sentence, write_sentence, Attributes, ProtocolError, Reply,
};

/// Records and final `!done` attributes of one command.
#[derive(Debug, Default)]
pub struct Response {
    pub records: Vec<Attributes>,
    pub done: Attributes,
}

/// One API session. Commands run strictly one after another.
pub struct Connection<S> {
    stream: S,
}

pub type TcpConnection = Connection<BufStream<TcpStream>>;

impl TcpConnection {
    pub async fn connect(address: &str, timeout: Duration) -> Result<Self, ProtocolError> {
        let stream = tokio::time::timeout(timeout, TcpStream::connect(address))
            .await
            .map_err(|_| ProtocolError::Timeout)??;
        stream.set_nodelay(true)?;
        debug!(address, "Connected to RouterOS API");
        Ok(Self::new(BufStream::new(stream)))
    }
}

impl<S: AsyncRead + AsyncWrite + Unpin> Connection<S> {
    pub fn new(stream: S) -> Self {
        Self { stream }
    }

    /// Plain-text login (RouterOS 6.43 and later).
    pub async fn login(&mut self, username: &str, password: &str) -> Result<(), ProtocolError> {
        let response = self
            .command("/login", &[("name", username), ("password", password)])
            .await?;

        // Pre-6.43 routers answer with an MD5 challenge instead of logging in
        if response.done.contains_key("ret") {
            return Err(ProtocolError::Malformed(
                "router requested challenge login (RouterOS < 6.43 is not supported)".to_string(),
            ));
        }
        Ok(())
    }

    /// Send `path` with `=key=value` attributes and collect the reply.
    ///
    /// A `!trap` is returned as [`ProtocolError::Trap`] once the closing
    /// `!done` has been read, so the session stays usable.
    pub async fn command(
        &mut self,
        path: &str,
        attributes: &[(&str, &str)],
    ) -> Result<Response, ProtocolError> {
        let mut words = Vec::with_capacity(attributes.len() + 1);
        words.push(path.to_string());
        words.extend(attributes.iter().map(|(k, v)| attribute_word(k, v)));
        write_sentence(&mut self.stream, words.as_slice()).await?;

        let mut response = Response::default();
        let mut trap: Option<String> = None;

        loop {
            match parse_reply(read_sentence(&mut self.stream).await?)? {
                Reply::Re(record) => response.records.push(record),
                Reply::Empty => {}
                Reply::Trap(attrs) => {
                    let message = attrs
                        .get("message")
                        .cloned()
                        .unwrap_or_else(|| "unknown error".to_string());
                    if trap.is_none() {
                        trap = Some(message);
                    }
                }
                Reply::Done(attrs) => {
                    response.done = attrs;
                    break;
                }
                Reply::Fatal(message) => return Err(ProtocolError::Fatal(message)),
            }
        }

        match trap {
            Some(message) => Err(ProtocolError::Trap(message)),
            None => Ok(response),
        }
    }
}
