use crate::broadcast::BroadcastHub;
use crate::control::{Command, EngineFlags};
use anyhow::{Context, Result};
use log::{error, info, warn};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Mutex;

/// Observer transport: accepts connections, streams broadcast frames out
/// as NDJSON lines, and reads control commands back on the same socket.
pub async fn run(addr: String, hub: BroadcastHub, flags: Arc<Mutex<EngineFlags>>) -> Result<()> {
    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind observer listener on {}", addr))?;
    info!("Observer channel listening on {}", addr);

    loop {
        match listener.accept().await {
            Ok((stream, peer)) => {
                info!("Observer connected: {}", peer);
                let hub = hub.clone();
                let flags = Arc::clone(&flags);
                tokio::spawn(async move {
                    if let Err(e) = handle_observer(stream, hub, flags).await {
                        warn!("Observer {} connection ended: {}", peer, e);
                    } else {
                        info!("Observer disconnected: {}", peer);
                    }
                });
            }
            Err(e) => {
                error!("Failed to accept observer connection: {}", e);
            }
        }
    }
}

async fn handle_observer(
    stream: TcpStream,
    hub: BroadcastHub,
    flags: Arc<Mutex<EngineFlags>>,
) -> Result<()> {
    // The attach guard keeps the hub's observer count honest; it detaches
    // on drop whichever way the connection ends.
    let mut observer = hub.attach();

    let (reader, mut writer) = stream.into_split();
    let mut reader = BufReader::new(reader);
    let mut line_buffer = String::new();

    loop {
        tokio::select! {
            frame = observer.recv() => {
                match frame {
                    Some(line) => {
                        writer.write_all(line.as_bytes()).await?;
                        writer.write_all(b"\n").await?;
                        writer.flush().await?;
                    }
                    None => break,
                }
            }

            result = reader.read_line(&mut line_buffer) => {
                match result {
                    Ok(0) => break,
                    Ok(_) => {
                        if let Some(command) = Command::parse(&line_buffer) {
                            flags.lock().await.apply(command);
                        }
                        line_buffer.clear();
                    }
                    Err(e) => return Err(e.into()),
                }
            }
        }
    }

    Ok(())
}
