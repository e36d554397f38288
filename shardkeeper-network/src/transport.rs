//! Length-delimited, `bincode`-framed RPC transport over TCP (spec §6).
//!
//! Chosen over a full RPC framework: it reaches for `tokio_util::codec` the way the
//! rest of this lineage's networking does, without pulling in gRPC or a P2P mesh stack
//! this core has no other use for.

use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio_util::codec::{Framed, LengthDelimitedCodec};
use tokio_util::sync::CancellationToken;

use crate::envelope::{RpcRequest, RpcResponse};

/// Implemented by whichever side of a process owns request dispatch (bounded
/// concurrency and routing live in the implementor, not in the transport).
#[async_trait::async_trait]
pub trait RequestHandler: Send + Sync {
    async fn handle(&self, request: RpcRequest) -> RpcResponse;
}

fn codec() -> LengthDelimitedCodec {
    LengthDelimitedCodec::builder().max_frame_length(128 * 1024 * 1024).new_codec()
}

/// Sends one request and waits for one response, with a caller-supplied deadline
/// (spec §5: "Every outbound RPC carries a deadline").
pub async fn send_request(addr: &str, request: &RpcRequest, deadline: Duration) -> anyhow::Result<RpcResponse> {
    tokio::time::timeout(deadline, send_request_inner(addr, request))
        .await
        .map_err(|_| anyhow::anyhow!("RPC to {addr} timed out after {deadline:?}"))?
}

async fn send_request_inner(addr: &str, request: &RpcRequest) -> anyhow::Result<RpcResponse> {
    let stream = TcpStream::connect(addr).await?;
    let mut framed = Framed::new(stream, codec());

    let encoded = bincode::serialize(request)?;
    framed.send(encoded.into()).await?;

    let frame = framed
        .next()
        .await
        .ok_or_else(|| anyhow::anyhow!("connection to {addr} closed before a response arrived"))??;
    Ok(bincode::deserialize(&frame)?)
}

/// Runs the accept loop until `cancel` fires. Each accepted connection is handled on
/// its own task; the handler itself is responsible for bounding concurrency (spec
/// §4.1: "a single request-processing pool sized for expected concurrency").
pub async fn serve(bind_addr: &str, handler: Arc<dyn RequestHandler>, cancel: CancellationToken) -> anyhow::Result<()> {
    let listener = TcpListener::bind(bind_addr).await?;
    tracing::info!(bind_addr, "RPC transport listening");

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                tracing::info!(bind_addr, "RPC transport shutting down");
                return Ok(());
            }
            accepted = listener.accept() => {
                let (stream, peer) = accepted?;
                let handler = handler.clone();
                tokio::spawn(async move {
                    if let Err(e) = serve_connection(stream, handler).await {
                        tracing::debug!(%peer, error = %e, "RPC connection ended with error");
                    }
                });
            }
        }
    }
}

async fn serve_connection(stream: TcpStream, handler: Arc<dyn RequestHandler>) -> anyhow::Result<()> {
    let mut framed = Framed::new(stream, codec());

    while let Some(frame) = framed.next().await {
        let frame = frame?;
        let request: RpcRequest = match bincode::deserialize(&frame) {
            Ok(r) => r,
            Err(e) => {
                let response = RpcResponse::Error(format!("malformed request: {e}"));
                framed.send(bincode::serialize(&response)?.into()).await?;
                continue;
            }
        };
        let response = handler.handle(request).await;
        framed.send(bincode::serialize(&response)?.into()).await?;
    }
    Ok(())
}
