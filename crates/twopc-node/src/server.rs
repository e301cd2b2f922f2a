//! # server
//!
//! why: accept protocol messages from other nodes over tcp
//! relations: receiving end of TcpTransport, dispatches to any MessageHandler
//! what: serve() accept loop, one task and one message per connection

use crate::transport::MessageHandler;
use std::io;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::time::timeout;
use tracing::{debug, error, info, warn};
use twopc_core::Message;

/// longest line accepted, newline included
pub const MAX_LINE_BYTES: u64 = 1024;

/// how long a peer gets to deliver its line
pub const READ_TIMEOUT: Duration = Duration::from_secs(10);

/// Serve connections until the task is dropped or aborted
pub async fn serve(listener: TcpListener, handler: Arc<dyn MessageHandler>) -> io::Result<()> {
    let addr = listener.local_addr()?;
    info!(addr = %addr, "protocol server started");

    loop {
        match listener.accept().await {
            Ok((stream, peer)) => {
                let handler = Arc::clone(&handler);
                tokio::spawn(async move {
                    if let Err(e) = handle_connection(stream, handler).await {
                        warn!(peer = %peer, error = %e, "connection error");
                    }
                });
            }
            Err(e) => {
                error!(error = %e, "failed to accept connection");
            }
        }
    }
}

async fn handle_connection(stream: TcpStream, handler: Arc<dyn MessageHandler>) -> io::Result<()> {
    let (reader, mut writer) = stream.into_split();
    let mut reader = BufReader::new(reader.take(MAX_LINE_BYTES));
    let mut line = String::new();

    match timeout(READ_TIMEOUT, reader.read_line(&mut line)).await {
        Ok(Ok(0)) => return Ok(()),
        Ok(Ok(_)) => {}
        Ok(Err(e)) => return Err(e),
        Err(_) => {
            warn!("no complete line before read timeout; dropping connection");
            return Ok(());
        }
    }
    if !line.ends_with('\n') {
        warn!(bytes = line.len(), "line too long or unterminated; dropping connection");
        return Ok(());
    }

    let message: Message = match line.parse() {
        Ok(message) => message,
        Err(e) => {
            // no state change, just drop the connection
            warn!(error = %e, line = %line.trim(), "malformed message dropped");
            return Ok(());
        }
    };
    debug!(message = %message, "received");

    if let Some(reply) = handler.handle(message).await {
        writer.write_all(reply.encode().as_bytes()).await?;
    }
    writer.shutdown().await
}
