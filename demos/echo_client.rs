//! Interactive chat client: each stdin line becomes a JSON chat message.
//!
//! Run `cargo run --example echo_server` first, then `cargo run --example echo_client`.

use tokio::io::{AsyncBufReadExt, BufReader};
use wirews::{client, ChatMessage, MessageKind};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    simple_logger::init_with_level(log::Level::Info)?;

    let mut ws = client::connect("ws://127.0.0.1:4443/".parse()?).await?;
    println!("connected; type a message, ctrl-d to quit");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        let payload = serde_json::to_vec(&ChatMessage {
            role: "user".to_owned(),
            content: line,
        })?;
        ws.send(MessageKind::Text, payload).await?;

        match ws.next_message().await? {
            Some(reply) => println!("<- {}", reply.as_text().unwrap_or("<binary>")),
            None => break,
        }
    }

    ws.close().await?;
    Ok(())
}
