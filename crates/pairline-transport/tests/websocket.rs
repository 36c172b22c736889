//! Integration tests for the WebSocket listener connection.
//!
//! These tests spin up a real axum server and a tokio-tungstenite client
//! to verify that frames actually cross the network. The server side
//! echoes whatever it receives through the `Connection` trait, so one
//! round trip exercises both `recv` and `send`.

#[cfg(feature = "websocket")]
mod websocket {
    use std::net::SocketAddr;

    use axum::extract::ws::WebSocketUpgrade;
    use axum::response::Response;
    use axum::routing::get;
    use axum::Router;
    use futures_util::{SinkExt, StreamExt};
    use pairline_transport::{Connection, WebSocketConnection};
    use tokio_tungstenite::tungstenite::Message;

    async fn echo(ws: WebSocketUpgrade) -> Response {
        ws.on_upgrade(|socket| async move {
            let conn = WebSocketConnection::new(socket);
            while let Ok(Some(frame)) = conn.recv().await {
                if frame == b"bye" {
                    let _ = conn.close().await;
                    break;
                }
                let _ = conn.send(&frame).await;
            }
        })
    }

    /// Binds to port 0 so parallel tests never collide.
    async fn spawn_server() -> SocketAddr {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("should bind");
        let addr = listener.local_addr().expect("bound address");
        let app = Router::new().route("/ws", get(echo));
        tokio::spawn(async move {
            axum::serve(listener, app).await.expect("server runs");
        });
        addr
    }

    #[tokio::test]
    async fn test_websocket_text_round_trip() {
        let addr = spawn_server().await;
        let (mut client, _) =
            tokio_tungstenite::connect_async(format!("ws://{addr}/ws"))
                .await
                .expect("client should connect");

        client
            .send(Message::Text(r#"{"type":"ping"}"#.into()))
            .await
            .unwrap();

        let reply = client.next().await.unwrap().unwrap();
        // Valid UTF-8 goes back out as a text frame.
        assert!(reply.is_text());
        assert_eq!(reply.to_text().unwrap(), r#"{"type":"ping"}"#);
    }

    #[tokio::test]
    async fn test_websocket_binary_frame_is_received_as_bytes() {
        let addr = spawn_server().await;
        let (mut client, _) =
            tokio_tungstenite::connect_async(format!("ws://{addr}/ws"))
                .await
                .unwrap();

        client
            .send(Message::Binary(vec![0xff, 0xfe].into()))
            .await
            .unwrap();

        let reply = client.next().await.unwrap().unwrap();
        assert!(reply.is_binary());
        assert_eq!(reply.into_data().to_vec(), vec![0xff, 0xfe]);
    }

    #[tokio::test]
    async fn test_websocket_server_close_ends_client_stream() {
        let addr = spawn_server().await;
        let (mut client, _) =
            tokio_tungstenite::connect_async(format!("ws://{addr}/ws"))
                .await
                .unwrap();

        client.send(Message::Text("bye".into())).await.unwrap();

        // The server closes; the client sees a close frame or end of stream.
        match client.next().await {
            Some(Ok(Message::Close(_))) | None => {}
            other => panic!("expected close, got {other:?}"),
        }
    }
}
