use crate::dashboard::Dashboard;
use crate::router;
use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use std::path::Path;
use std::sync::Arc;
use tokio::net::UnixListener;
use tokio::sync::broadcast;
use tokio_util::codec::{FramedRead, FramedWrite, LengthDelimitedCodec};
use visu_core::ipc::{VisuRequest, VisuResponse};

/// Serve dashboard requests over a Unix socket until shutdown fires.
///
/// Frames are a 4-byte little-endian length prefix followed by a MessagePack
/// `VisuRequest`; each request gets exactly one `VisuResponse` frame.
pub async fn run_unix_server(
    socket_path: &str,
    dashboard: Arc<Dashboard>,
    mut shutdown: broadcast::Receiver<()>,
) -> anyhow::Result<()> {
    if Path::new(socket_path).exists() {
        std::fs::remove_file(socket_path)?;
    }

    let listener = UnixListener::bind(socket_path)?;
    tracing::info!("IPC Server listening on {}", socket_path);

    loop {
        tokio::select! {
            res = listener.accept() => {
                let (stream, _) = res?;
                let dashboard = Arc::clone(&dashboard);
                tokio::spawn(async move {
                    let (read, write) = stream.into_split();
                    let le_codec = || LengthDelimitedCodec::builder().little_endian().new_codec();
                    let mut framed_read = FramedRead::new(read, le_codec());
                    let mut framed_write = FramedWrite::new(write, le_codec());

                    while let Some(frame) = framed_read.next().await {
                        let bytes_mut = match frame {
                            Ok(b) => b,
                            Err(e) => {
                                tracing::error!("Frame error: {}", e);
                                break;
                            }
                        };

                        let response = match rmp_serde::from_slice::<VisuRequest>(&bytes_mut) {
                            Ok(request) => router::handle_request(request, &dashboard).await,
                            Err(e) => VisuResponse::err(format!("Deserialization error: {}", e)),
                        };

                        match rmp_serde::to_vec_named(&response) {
                            Ok(resp_bytes) => {
                                if let Err(e) = framed_write.send(Bytes::from(resp_bytes)).await {
                                    tracing::error!("Failed to send response: {}", e);
                                    break;
                                }
                            }
                            Err(e) => {
                                tracing::error!("Failed to serialize response: {}", e);
                                break;
                            }
                        }
                    }
                });
            }
            _ = shutdown.recv() => {
                tracing::info!("Shutting down IPC server...");
                break;
            }
        }
    }

    if Path::new(socket_path).exists() {
        std::fs::remove_file(socket_path)?;
    }

    Ok(())
}
