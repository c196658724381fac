//! Interactive chat loop: server events to stdout, stdin lines to the server.

use crate::input::{parse_line, Input};
use anyhow::{Context, Result};
use tcpchat_client::{ChatClient, ClientEvent};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{debug, info};

pub async fn run(addr: &str, username: &str) -> Result<()> {
    let mut client = ChatClient::connect(addr, username)
        .await
        .with_context(|| format!("failed to join {addr} as '{username}'"))?;
    println!("connected to {addr} as {username} (/w <user> <msg>, /users, /quit)");

    let mut stdin = BufReader::new(tokio::io::stdin()).lines();

    loop {
        tokio::select! {
            event = client.next_event() => match event {
                Some(event) => print_event(&event),
                None => {
                    println!("server closed the connection");
                    return Ok(());
                }
            },
            line = stdin.next_line() => {
                let Some(line) = line.context("failed to read stdin")? else {
                    debug!("stdin closed");
                    break;
                };
                match parse_line(&line) {
                    Input::Chat(body) => client.send_chat(&body).await?,
                    Input::Whisper { to, body } => client.whisper(&to, &body).await?,
                    Input::Users => {
                        // Show what we have; the server may also answer.
                        println!("* online: {}", client.users().join(", "));
                        client.request_users().await?;
                    }
                    Input::Usage(hint) => println!("{hint}"),
                    Input::Nothing => {}
                    Input::Quit => break,
                }
            }
        }
    }

    client.disconnect().await?;
    info!("left chat");
    Ok(())
}

fn print_event(event: &ClientEvent) {
    match event {
        // The full list follows every join/leave; printing both is noise.
        ClientEvent::Users(users) => debug!(?users, "user list updated"),
        other => println!("{other}"),
    }
}
