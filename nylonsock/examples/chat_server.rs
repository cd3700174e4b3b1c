//! Room-based chat server.
//!
//! Run with: `cargo run --example chat_server -- [port]`
//!
//! Clients send `setName` and `joinRoom` to describe themselves and `msgSend`
//! to talk. Messages are relayed as `msgRecv` to everyone in the sender's
//! room. Lines typed on stdin are broadcast to every room as announcements.

use nylonsock::prelude::*;
use std::io::BufRead;

/// Per-connection chat state.
#[derive(Debug, Default)]
struct Member {
    usrname: String,
    room: String,
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let port = match std::env::args().nth(1) {
        Some(arg) => arg.parse()?,
        None => 3490,
    };

    let mut server: Server<Member> = ServerBuilder::new().port(port).build()?;
    let handle = server.handle();

    server.on_connect(move |conn| {
        tracing::info!(connection_id = conn.id(), "new member from {:?}", conn.peer_addr());
        conn.state_mut().usrname = format!("guest{}", conn.id());
        conn.state_mut().room = "lobby".to_string();

        conn.on("setName", |data, conn| {
            if let Ok(name) = data.as_str() {
                conn.state_mut().usrname = name.trim().to_string();
                let reply = format!("you are now {}", conn.state().usrname);
                let _ = conn.emit("msgRecv", reply);
            }
        });

        conn.on("joinRoom", |data, conn| {
            if let Ok(room) = data.as_str() {
                conn.state_mut().room = room.trim().to_string();
                let reply = format!("joined room {}", conn.state().room);
                let _ = conn.emit("msgRecv", reply);
            }
        });

        let relay = handle.clone();
        conn.on("msgSend", move |data, conn| {
            let Ok(text) = data.as_str() else {
                return;
            };
            let line = format!("[{}] {}: {}", conn.state().room, conn.state().usrname, text);
            let room = conn.state().room.clone();
            if let Err(e) = relay.emit_if("msgRecv", line, move |other| other.state().room == room) {
                tracing::warn!("dropping chat line: {}", e);
            }
        });

        conn.on_signal(DISCONNECT_EVENT, |conn| {
            tracing::info!("{} left", conn.state().usrname);
        });
    });

    server.start()?;
    println!("Chat server listening on {}", server.local_addr());
    println!("Type a line to announce it, or an empty line to quit");

    for line in std::io::stdin().lock().lines() {
        let line = line?;
        if line.is_empty() {
            break;
        }
        server.emit("msgRecv", format!("[announcement] {}", line))?;
        for event in server.handle().poll_events() {
            tracing::debug!("{:?}", event);
        }
        println!("{} member(s) online", server.count());
    }

    server.stop();
    Ok(())
}
