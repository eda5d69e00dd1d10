use crate::notify::ConnectionRegistry;
use futures::{SinkExt, StreamExt};
use log::{info, warn};
use std::net::SocketAddr;
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::tungstenite;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http::StatusCode;
use tokio_tungstenite::tungstenite::protocol::Message;

/// Accepts websocket clients forever. Each client names itself with `?user_id=<owner>`.
pub async fn serve(listener: TcpListener, registry: ConnectionRegistry) -> std::io::Result<()> {
    info!("websocket notifier listening on {}", listener.local_addr()?);
    loop {
        let (stream, peer) = listener.accept().await?;
        let registry = registry.clone();
        tokio::spawn(accept_connection(peer, stream, registry));
    }
}

async fn accept_connection(peer: SocketAddr, stream: TcpStream, registry: ConnectionRegistry) {
    if let Err(e) = handle_connection(peer, stream, registry).await {
        match e {
            tungstenite::Error::ConnectionClosed
            | tungstenite::Error::Protocol(_)
            | tungstenite::Error::Utf8 => (),
            err => warn!("websocket error for {}: {}", peer, err),
        }
    }
}

pub(crate) fn owner_from_query(query: Option<&str>) -> Option<String> {
    query?
        .split('&')
        .filter_map(|pair| pair.split_once('='))
        .find(|(k, _)| *k == "user_id")
        .and_then(|(_, v)| urlencoding::decode(&v.replace('+', " ")).ok().map(|d| d.into_owned()))
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

async fn handle_connection(
    peer: SocketAddr,
    stream: TcpStream,
    registry: ConnectionRegistry,
) -> Result<(), tungstenite::Error> {
    let mut owner = None;
    let check = |req: &Request, resp: Response| -> Result<Response, ErrorResponse> {
        match owner_from_query(req.uri().query()) {
            Some(o) => {
                owner = Some(o);
                Ok(resp)
            }
            None => {
                let mut err = ErrorResponse::new(Some("missing user_id query parameter".into()));
                *err.status_mut() = StatusCode::BAD_REQUEST;
                Err(err)
            }
        }
    };
    let ws = tokio_tungstenite::accept_hdr_async(stream, check).await?;
    let Some(owner) = owner else {
        return Ok(());
    };

    info!("websocket connected: {} as {}", peer, owner);
    let (id, mut rx) = registry.register(&owner).await;
    let (mut sink, mut incoming) = ws.split();

    let result = async {
        loop {
            tokio::select! {
                out = rx.recv() => match out {
                    Some(text) => sink.send(Message::Text(text)).await?,
                    // replaced by a newer connection for the same owner
                    None => {
                        let _ = sink.send(Message::Close(None)).await;
                        break;
                    }
                },
                msg = incoming.next() => match msg {
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {}
                    Some(Err(e)) => return Err(e),
                },
            }
        }
        Ok::<(), tungstenite::Error>(())
    }
    .await;

    registry.unregister(&owner, id).await;
    info!("websocket disconnected: {} ({})", peer, owner);
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn owner_comes_from_query() {
        assert_eq!(owner_from_query(Some("user_id=u1")).as_deref(), Some("u1"));
        assert_eq!(
            owner_from_query(Some("a=b&user_id=u2&c=d")).as_deref(),
            Some("u2")
        );
        assert_eq!(owner_from_query(Some("user_id=")), None);
        assert_eq!(owner_from_query(None), None);
    }

    #[test]
    fn owner_is_percent_decoded() {
        assert_eq!(
            owner_from_query(Some("user_id=a%40b.com")).as_deref(),
            Some("a@b.com")
        );
        assert_eq!(
            owner_from_query(Some("user_id=jane+doe")).as_deref(),
            Some("jane doe")
        );
        assert_eq!(owner_from_query(Some("user_id=%FF")), None);
    }

    #[tokio::test]
    async fn forwards_registry_messages_as_text_frames() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let registry = ConnectionRegistry::new();
        tokio::spawn(serve(listener, registry.clone()));

        let (mut client, _) =
            tokio_tungstenite::connect_async(format!("ws://{addr}/?user_id=owner-1"))
                .await
                .unwrap();

        for _ in 0..50 {
            if registry.is_connected("owner-1").await {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        }
        assert!(registry.send("owner-1", "{\"event\":\"x\"}".into()).await);

        let msg = client.next().await.unwrap().unwrap();
        assert_eq!(msg, Message::Text("{\"event\":\"x\"}".into()));
    }

    #[tokio::test]
    async fn rejects_handshake_without_owner() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(serve(listener, ConnectionRegistry::new()));

        let res = tokio_tungstenite::connect_async(format!("ws://{addr}/")).await;
        assert!(res.is_err());
    }
}
