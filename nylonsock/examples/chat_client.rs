//! Chat client for the `chat_server` example.
//!
//! Run with: `cargo run --example chat_client -- <host> [port]`
//!
//! Commands: `/name <name>`, `/join <room>`, `/quit`. Any other line is sent
//! to the current room.

use nylonsock::prelude::*;
use std::io::BufRead;

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let mut args = std::env::args().skip(1);
    let Some(host) = args.next() else {
        eprintln!("usage: chat_client <host> [port]");
        std::process::exit(2);
    };
    let port = match args.next() {
        Some(arg) => arg.parse()?,
        None => 3490,
    };

    let mut client: Client<()> = Client::connect(&host, port)?;
    client.on("msgRecv", |data, _| match data.as_str() {
        Ok(text) => println!("{}", text),
        Err(_) => println!("<{} bytes of binary data>", data.len()),
    });
    client.on_signal(DISCONNECT_EVENT, |_| println!("server closed the connection"));
    client.start()?;

    for line in std::io::stdin().lock().lines() {
        let line = line?;
        if !client.status() || line == "/quit" {
            break;
        }

        let sent = if let Some(name) = line.strip_prefix("/name ") {
            client.emit("setName", name)
        } else if let Some(room) = line.strip_prefix("/join ") {
            client.emit("joinRoom", room)
        } else {
            client.emit("msgSend", line.as_str())
        };
        if let Err(e) = sent {
            eprintln!("send failed: {}", e);
        }
    }

    client.stop();
    Ok(())
}
