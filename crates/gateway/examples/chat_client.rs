//! Minimal chat client: connect, join a room, send a message, print traffic.
//!
//! Usage: chat_client <token> [room]

use futures::{SinkExt, StreamExt};
use tokio_tungstenite::{connect_async, tungstenite::Message};

#[tokio::main]
async fn main() {
    let mut args = std::env::args().skip(1);
    let token = args.next().expect("usage: chat_client <token> [room]");
    let room = args.next().unwrap_or_else(|| "room1".to_string());

    let url = std::env::var("GATEWAY_URL").unwrap_or_else(|_| "ws://localhost:8082".to_string());
    let url = format!("{}/ws?token={}", url, token);

    println!("Connecting to {}", url);
    let (ws, response) = connect_async(&url).await.expect("connect failed");
    println!("Connected, status: {:?}", response.status());

    let (mut write, mut read) = ws.split();

    write
        .send(Message::Text(
            format!(r#"{{"type":"join","target":"{}"}}"#, room).into(),
        ))
        .await
        .expect("join failed");

    write
        .send(Message::Text(
            format!(r#"{{"type":"send","body":"hello from chat_client","target":"{}"}}"#, room)
                .into(),
        ))
        .await
        .expect("send failed");

    while let Some(msg) = read.next().await {
        match msg {
            Ok(Message::Text(text)) => println!("<- {}", text),
            Ok(Message::Close(frame)) => {
                println!("closed: {:?}", frame);
                break;
            }
            Ok(_) => {}
            Err(e) => {
                eprintln!("error: {:?}", e);
                break;
            }
        }
    }
}
