use anyhow::{Context, Result};
use avc_control::CommandGateway;
use avc_proto::{ClientMessage, CommandReply, Envelope};
use bytes::Bytes;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, watch};
use tracing::{info, warn};

use crate::broadcast::{Broadcaster, Observer, TARGET};

/// One TCP connection per observer, newline-delimited JSON both ways.
pub struct ObserverServer {
    listener: TcpListener,
    broadcaster: Arc<Broadcaster>,
    gateway: CommandGateway,
}

impl ObserverServer {
    pub async fn bind(addr: &str, broadcaster: Arc<Broadcaster>, gateway: CommandGateway) -> Result<Self> {
        let listener = TcpListener::bind(addr).await.with_context(|| format!("bind observer listener {}", addr))?;
        Ok(Self { listener, broadcaster, gateway })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        self.listener.local_addr().context("observer listener address")
    }

    /// Accepts observers until `shutdown` is set. Open connections wind down
    /// when the broadcaster is closed.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) -> Result<()> {
        info!("observer server listening on {}", self.local_addr()?);
        loop {
            tokio::select! {
                accepted = self.listener.accept() => {
                    let (stream, peer) = match accepted {
                        Ok(a) => a,
                        Err(e) => {
                            warn!("observer accept failed: {}", e);
                            continue;
                        }
                    };
                    let Some(observer) = self.broadcaster.attach() else {
                        break;
                    };
                    let broadcaster = self.broadcaster.clone();
                    let gateway = self.gateway.clone();
                    tokio::spawn(async move {
                        let id = observer.id;
                        info!("observer {} connected from {}", id, peer);
                        if let Err(e) = serve(stream, observer, gateway).await {
                            warn!(target: TARGET, "observer {}: {:#}", id, e);
                        }
                        broadcaster.detach(id);
                        info!("observer {} disconnected", id);
                    });
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
        info!("observer server stopped accepting");
        Ok(())
    }
}

async fn serve(stream: TcpStream, observer: Observer, gateway: CommandGateway) -> Result<()> {
    let (rd, wr) = stream.into_split();
    let (reply_tx, reply_rx) = mpsc::channel::<Bytes>(8);
    tokio::select! {
        r = write_loop(wr, observer, reply_rx) => r,
        r = read_loop(rd, gateway, reply_tx) => r,
    }
}

// Ends when the observer queue is dropped (slow consumer or shutdown).
async fn write_loop(mut wr: OwnedWriteHalf, mut observer: Observer, mut replies: mpsc::Receiver<Bytes>) -> Result<()> {
    loop {
        let frame = tokio::select! {
            f = observer.rx.recv() => f,
            r = replies.recv() => r,
        };
        let Some(frame) = frame else {
            break;
        };
        wr.write_all(&frame).await.context("write frame")?;
    }
    wr.shutdown().await.ok();
    Ok(())
}

async fn read_loop(rd: OwnedReadHalf, gateway: CommandGateway, replies: mpsc::Sender<Bytes>) -> Result<()> {
    let mut lines = BufReader::new(rd).lines();
    while let Some(line) = lines.next_line().await.context("read command line")? {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let reply = match serde_json::from_str::<ClientMessage>(line) {
            Ok(ClientMessage::Command(req)) => gateway.execute(&req).await,
            Err(e) => CommandReply::rejected(format!("unrecognized message: {}", e)),
        };
        let frame = Envelope::response(&reply)?.to_line()?;
        if replies.send(Bytes::from(frame)).await.is_err() {
            break;
        }
    }
    Ok(())
}
