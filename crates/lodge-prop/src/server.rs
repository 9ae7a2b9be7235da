//! TCP server for the propagation protocol.

use std::io;
use std::sync::Arc;

use lodge_proto::{read_frame, write_frame, FrameError, PropRequest, PropResponse};
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, info};

use crate::Propagator;

/// Applies one request to `backend`.
pub async fn dispatch(backend: &dyn Propagator, request: PropRequest) -> PropResponse {
    let result = match request {
        PropRequest::Get {
            path,
            access_token,
            force_creation,
        } => backend
            .get(&path, &access_token, force_creation)
            .await
            .map(|record| PropResponse::Record { record }),
        PropRequest::Put { path, access_token } => backend
            .put(&path, &access_token)
            .await
            .map(|_| PropResponse::Ack),
        PropRequest::Mv {
            src,
            dst,
            access_token,
        } => backend
            .mv(&src, &dst, &access_token)
            .await
            .map(|_| PropResponse::Ack),
        PropRequest::Rm { path, access_token } => backend
            .rm(&path, &access_token)
            .await
            .map(|_| PropResponse::Ack),
    };

    result.unwrap_or_else(|e| PropResponse::Error {
        code: e.code(),
        message: e.to_string(),
    })
}

/// Serves `backend` on `listener` until accepting fails.
pub async fn serve(listener: TcpListener, backend: Arc<dyn Propagator>) -> io::Result<()> {
    info!(addr = %listener.local_addr()?, "Propagation service listening");

    loop {
        let (stream, peer) = listener.accept().await?;
        let backend = Arc::clone(&backend);

        tokio::spawn(async move {
            if let Err(e) = handle_connection(stream, backend).await {
                debug!(peer = %peer, error = %e, "Propagation connection ended with error");
            }
        });
    }
}

async fn handle_connection(
    mut stream: TcpStream,
    backend: Arc<dyn Propagator>,
) -> Result<(), FrameError> {
    while let Some(request) = read_frame::<_, PropRequest>(&mut stream).await? {
        let op = request.name();
        let response = dispatch(backend.as_ref(), request).await;
        debug!(op, "Propagation request handled");
        write_frame(&mut stream, &response).await?;
    }
    Ok(())
}
