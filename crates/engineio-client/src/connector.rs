//! Production [`Connector`] implementation over `reqwest` (polling) and
//! `tokio-tungstenite` (websocket).

use futures_util::{SinkExt, StreamExt, future};
use http::HeaderMap;
use tokio_tungstenite::tungstenite::{self, client::IntoClientRequest};
use url::Url;

use crate::{
    errors::TransportError,
    transport::{BoxFuture, BoxWsSink, BoxWsStream, Connector, PollRequest, PollResponse, WsFrame},
};

/// A [`Connector`] backed by a shared [`reqwest::Client`] and
/// [`tokio_tungstenite::connect_async`].
#[derive(Debug, Clone, Default)]
pub struct HttpConnector {
    client: reqwest::Client,
}

impl HttpConnector {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Connector for HttpConnector {
    fn request(&self, req: PollRequest) -> BoxFuture<Result<PollResponse, TransportError>> {
        let client = self.client.clone();
        Box::pin(async move {
            let mut builder = client.request(req.method, req.url).headers(req.headers);
            if let Some(body) = req.body {
                builder = builder
                    .header(http::header::CONTENT_TYPE, "text/plain;charset=UTF-8")
                    .body(body);
            }
            let res = builder
                .send()
                .await
                .map_err(|err| TransportError::Http(err.to_string()))?;
            let status = res.status().as_u16();
            let body = res
                .text()
                .await
                .map_err(|err| TransportError::Http(err.to_string()))?;
            Ok(PollResponse { status, body })
        })
    }

    fn ws_connect(
        &self,
        url: Url,
        headers: HeaderMap,
    ) -> BoxFuture<Result<(BoxWsSink, BoxWsStream), TransportError>> {
        Box::pin(async move {
            let mut request = url
                .as_str()
                .into_client_request()
                .map_err(|err| TransportError::Ws(err.to_string()))?;
            request.headers_mut().extend(headers);

            let (ws, _res) = tokio_tungstenite::connect_async(request)
                .await
                .map_err(|err| TransportError::Ws(err.to_string()))?;
            let (sink, stream) = ws.split();

            let sink = sink
                .with(|frame: WsFrame| {
                    future::ready(Ok::<_, tungstenite::Error>(match frame {
                        WsFrame::Text(text) => tungstenite::Message::Text(text.into()),
                        WsFrame::Binary(data) => tungstenite::Message::Binary(data),
                    }))
                })
                .sink_map_err(|err: tungstenite::Error| TransportError::Ws(err.to_string()));

            let stream = stream.filter_map(|msg| {
                future::ready(match msg {
                    Ok(tungstenite::Message::Text(text)) => {
                        Some(Ok(WsFrame::Text(text.as_str().to_owned())))
                    }
                    Ok(tungstenite::Message::Binary(data)) => Some(Ok(WsFrame::Binary(data))),
                    Ok(tungstenite::Message::Close(_)) => Some(Err(TransportError::Closed)),
                    // Control frames are handled by tungstenite itself
                    Ok(_) => None,
                    Err(err) => Some(Err(TransportError::Ws(err.to_string()))),
                })
            });

            Ok((
                Box::pin(sink) as BoxWsSink,
                Box::pin(stream) as BoxWsStream,
            ))
        })
    }
}
