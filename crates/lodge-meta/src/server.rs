//! TCP server for the client-facing protocol.

use std::io;
use std::sync::Arc;

use lodge_proto::{read_frame, write_frame, ErrorCode, FrameError, Request, Response, MAX_FRAME_SIZE};
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, info, warn};

use crate::executor::Executor;

/// Serves `executor` on `listener` until accepting fails.
///
/// Each connection carries a sequence of request frames, each answered by
/// one response frame.
pub async fn serve(listener: TcpListener, executor: Arc<Executor>) -> io::Result<()> {
    info!(addr = %listener.local_addr()?, "Metadata service listening");

    loop {
        let (stream, peer) = listener.accept().await?;
        let executor = Arc::clone(&executor);
        debug!(peer = %peer, "Accepted connection");

        tokio::spawn(async move {
            if let Err(e) = handle_connection(stream, executor).await {
                debug!(peer = %peer, error = %e, "Connection ended with error");
            }
        });
    }
}

async fn handle_connection(mut stream: TcpStream, executor: Arc<Executor>) -> Result<(), FrameError> {
    stream.set_nodelay(true)?;

    while let Some(request) = read_frame::<_, Request>(&mut stream).await? {
        let response = executor.handle(request).await;

        // Oversized frames are rejected before any byte is written, so the
        // stream can still carry the error.
        match write_frame(&mut stream, &response).await {
            Err(FrameError::TooLarge(size)) => {
                warn!(size, limit = MAX_FRAME_SIZE, "Response exceeds frame limit");
                let error = Response::Error {
                    code: ErrorCode::Internal,
                    message: format!(
                        "response of {} bytes exceeds the {} byte frame limit",
                        size, MAX_FRAME_SIZE
                    ),
                };
                write_frame(&mut stream, &error).await?;
            }
            result => result?,
        }
    }
    Ok(())
}
