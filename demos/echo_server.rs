//! Chat server on port 4443: logs each JSON chat message and acknowledges it.
//!
//! Run with `cargo run --example echo_server`, then connect with `echo_client`.

use wirews::{ChatEcho, Listener};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    simple_logger::init_with_level(log::Level::Debug)?;

    let listener = Listener::bind("127.0.0.1:4443").await?;
    listener.serve(ChatEcho).await?;
    Ok(())
}
