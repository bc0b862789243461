use http::HeaderMap;
use url::Url;

use crate::ENGINE_IO_VERSION;

/// Configuration of one engine session.
///
/// This is assembled by the socket.io client builder; the engine itself
/// only reads it.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// The server base url (`http` or `https` scheme)
    pub url: Url,
    /// The path the engine is mounted on, defaults to `/socket.io/`
    pub path: String,
    /// Never upgrade away from the polling transport
    pub force_polling: bool,
    /// Open the websocket directly, without a polling handshake
    pub force_websockets: bool,
    /// Headers attached to every HTTP request and websocket handshake
    pub extra_headers: HeaderMap,
    /// User supplied query parameters appended to every url
    pub connect_params: Vec<(String, String)>,
}

impl EngineConfig {
    pub fn new(url: Url) -> Self {
        Self {
            url,
            path: "/socket.io/".to_owned(),
            force_polling: false,
            force_websockets: false,
            extra_headers: HeaderMap::new(),
            connect_params: Vec::new(),
        }
    }

    /// The polling url for the current session
    pub(crate) fn polling_url(&self, sid: Option<&str>) -> Url {
        let mut url = self.url.clone();
        url.set_path(&self.path);
        self.append_query(&mut url, "polling", sid);
        url.query_pairs_mut().append_pair("b64", "1");
        url
    }

    /// The websocket url for the current session
    pub(crate) fn ws_url(&self, sid: Option<&str>) -> Url {
        let mut url = self.url.clone();
        let scheme = match url.scheme() {
            "https" | "wss" => "wss",
            _ => "ws",
        };
        // http(s) -> ws(s) is always a valid scheme change
        url.set_scheme(scheme).expect("ws scheme");
        url.set_path(&self.path);
        self.append_query(&mut url, "websocket", sid);
        url
    }

    fn append_query(&self, url: &mut Url, transport: &str, sid: Option<&str>) {
        let mut version_buf = itoa::Buffer::new();
        let mut pairs = url.query_pairs_mut();
        pairs.append_pair("EIO", version_buf.format(ENGINE_IO_VERSION));
        pairs.append_pair("transport", transport);
        if let Some(sid) = sid {
            pairs.append_pair("sid", sid);
        }
        for (key, value) in &self.connect_params {
            pairs.append_pair(key, value);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> EngineConfig {
        EngineConfig::new(Url::parse("http://localhost:8087").unwrap())
    }

    #[test]
    fn polling_url_query() {
        let url = config().polling_url(None);
        assert_eq!(url.path(), "/socket.io/");
        assert_eq!(
            url.query().unwrap(),
            "EIO=3&transport=polling&b64=1"
        );

        let url = config().polling_url(Some("abc123"));
        assert_eq!(
            url.query().unwrap(),
            "EIO=3&transport=polling&sid=abc123&b64=1"
        );
    }

    #[test]
    fn ws_url_scheme_and_query() {
        let url = config().ws_url(Some("abc"));
        assert_eq!(url.scheme(), "ws");
        assert_eq!(url.query().unwrap(), "EIO=3&transport=websocket&sid=abc");

        let mut secure = config();
        secure.url = Url::parse("https://example.com").unwrap();
        assert_eq!(secure.ws_url(None).scheme(), "wss");
    }

    #[test]
    fn connect_params_are_percent_encoded() {
        let mut config = config();
        config
            .connect_params
            .push(("token".to_owned(), "a b&c".to_owned()));
        let url = config.polling_url(None);
        assert!(url.query().unwrap().contains("token=a+b%26c"));
    }
}
