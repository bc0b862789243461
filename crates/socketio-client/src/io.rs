//! Client configuration and builder.

use std::{sync::Arc, time::Duration};

use engineio_client::{Connector, connector::HttpConnector};
use http::{HeaderMap, HeaderName, HeaderValue};
use url::Url;

use crate::{Client, errors::BuilderError};

/// Configuration for a socket.io client
#[derive(Clone)]
pub struct ClientConfig {
    /// The server base url
    pub url: Url,
    /// The path socket.io is mounted on.
    ///
    /// Defaults to `/socket.io/`.
    pub path: String,
    /// The default namespace connected by [`Client::connect`].
    ///
    /// Defaults to `/`.
    pub namespace: String,
    /// Never upgrade away from the polling transport
    pub force_polling: bool,
    /// Connect the websocket directly, skipping the polling handshake
    pub force_websockets: bool,
    /// Replace a healthy engine with a fresh one on every connect
    pub force_new: bool,
    /// Whether an unexpected close triggers the reconnection policy.
    ///
    /// Defaults to `true`.
    pub reconnects: bool,
    /// How many reconnect attempts before giving up, `None` = unbounded.
    ///
    /// Defaults to `None`.
    pub reconnect_attempts: Option<u32>,
    /// The pause before each reconnect attempt.
    ///
    /// Defaults to 10 seconds.
    pub reconnect_wait: Duration,
    /// The deadline for a connection attempt to reach the connected state.
    ///
    /// Defaults to 45 seconds.
    pub connect_timeout: Duration,
    /// Headers attached to every HTTP request and websocket handshake
    pub extra_headers: HeaderMap,
    /// Extra query parameters appended to every url, percent-encoded
    pub connect_params: Vec<(String, String)>,
    /// The transport connector. Defaults to the production
    /// [`HttpConnector`]; tests inject a double here.
    pub connector: Arc<dyn Connector>,
}

impl ClientConfig {
    fn new(url: Url) -> Self {
        Self {
            url,
            path: "/socket.io/".to_owned(),
            namespace: "/".to_owned(),
            force_polling: false,
            force_websockets: false,
            force_new: false,
            reconnects: true,
            reconnect_attempts: None,
            reconnect_wait: Duration::from_secs(10),
            connect_timeout: Duration::from_secs(45),
            extra_headers: HeaderMap::new(),
            connect_params: Vec::new(),
            connector: Arc::new(HttpConnector::new()),
        }
    }
}

/// A builder to create a [`Client`].
///
/// ```no_run
/// # use socketio_client::{ClientBuilder, Value};
/// # async fn doc() -> Result<(), Box<dyn std::error::Error>> {
/// let client = ClientBuilder::new("http://localhost:8087")?
///     .namespace("/admin")
///     .reconnect_attempts(5)
///     .build();
/// let socket = client.socket("/admin");
/// socket.on("message", |args, _ack| println!("message: {args:?}"));
/// client.connect().await?;
/// socket.emit("hello", vec![Value::from("world")])?;
/// # Ok(()) }
/// ```
pub struct ClientBuilder {
    config: ClientConfig,
    cookies: Vec<String>,
}

impl ClientBuilder {
    /// Create a builder for the given server url. The url carries scheme,
    /// host and port; path and query are configured separately.
    pub fn new(url: impl AsRef<str>) -> Result<Self, BuilderError> {
        let url = Url::parse(url.as_ref())?;
        Ok(Self {
            config: ClientConfig::new(url),
            cookies: Vec::new(),
        })
    }

    /// The path socket.io is mounted on.
    ///
    /// Defaults to `/socket.io/`.
    pub fn path(mut self, path: impl Into<String>) -> Self {
        self.config.path = path.into();
        self
    }

    /// The default namespace connected by [`Client::connect`].
    ///
    /// Defaults to `/`.
    pub fn namespace(mut self, ns: impl Into<String>) -> Self {
        let ns = ns.into();
        self.config.namespace = if ns.starts_with('/') {
            ns
        } else {
            format!("/{ns}")
        };
        self
    }

    /// Use `https`/`wss` whatever the url scheme says
    pub fn secure(mut self, secure: bool) -> Self {
        if secure {
            // http(s) -> https is always a valid scheme change
            self.config.url.set_scheme("https").expect("https scheme");
        }
        self
    }

    /// Disable transport negotiation and stay on long-polling
    pub fn force_polling(mut self) -> Self {
        self.config.force_polling = true;
        self
    }

    /// Disable transport negotiation and connect the websocket directly
    pub fn force_websockets(mut self) -> Self {
        self.config.force_websockets = true;
        self
    }

    /// Open a fresh engine on every connect, even when one is already up
    pub fn force_new(mut self) -> Self {
        self.config.force_new = true;
        self
    }

    /// Whether an unexpected close triggers the reconnection policy.
    ///
    /// Defaults to `true`.
    pub fn reconnects(mut self, reconnects: bool) -> Self {
        self.config.reconnects = reconnects;
        self
    }

    /// Bound the number of reconnect attempts. Unbounded by default.
    pub fn reconnect_attempts(mut self, attempts: u32) -> Self {
        self.config.reconnect_attempts = Some(attempts);
        self
    }

    /// The pause before each reconnect attempt.
    ///
    /// Defaults to 10 seconds.
    pub fn reconnect_wait(mut self, wait: Duration) -> Self {
        self.config.reconnect_wait = wait;
        self
    }

    /// The deadline for a connection attempt to reach the connected state.
    ///
    /// Defaults to 45 seconds.
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.config.connect_timeout = timeout;
        self
    }

    /// Attach a header to every HTTP request and websocket handshake
    pub fn extra_header(
        mut self,
        name: impl AsRef<str>,
        value: impl AsRef<str>,
    ) -> Result<Self, BuilderError> {
        let name = HeaderName::try_from(name.as_ref())
            .map_err(|err| BuilderError::InvalidHeader(err.to_string()))?;
        let value = HeaderValue::try_from(value.as_ref())
            .map_err(|err| BuilderError::InvalidHeader(err.to_string()))?;
        self.config.extra_headers.append(name, value);
        Ok(self)
    }

    /// Attach a cookie to every HTTP request and websocket handshake
    pub fn cookie(mut self, cookie: impl Into<String>) -> Self {
        self.cookies.push(cookie.into());
        self
    }

    /// Append an extra query parameter to every url
    pub fn connect_param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.config
            .connect_params
            .push((key.into(), value.into()));
        self
    }

    /// Replace the transport connector, e.g. with a test double
    pub fn connector(mut self, connector: Arc<dyn Connector>) -> Self {
        self.config.connector = connector;
        self
    }

    /// Build the client. It does not connect anything yet.
    pub fn build(mut self) -> Client {
        if !self.cookies.is_empty() {
            let joined = self.cookies.join("; ");
            if let Ok(value) = HeaderValue::try_from(joined) {
                self.config
                    .extra_headers
                    .insert(http::header::COOKIE, value);
            }
        }
        Client::new(self.config)
    }
}

impl std::fmt::Debug for ClientConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientConfig")
            .field("url", &self.url.as_str())
            .field("path", &self.path)
            .field("namespace", &self.namespace)
            .field("reconnects", &self.reconnects)
            .field("reconnect_attempts", &self.reconnect_attempts)
            .finish()
    }
}
