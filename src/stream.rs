//! Stream workers: one task per data connection.

use crate::client::RunEvent;
use crate::counter::ByteCounter;
use crate::Error;
use log::{debug, warn};
use std::io;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Size of one payload chunk.
pub(crate) const PAYLOAD_CHUNK: usize = 2048;

/// Marker byte tagging the start of every payload chunk.
pub(crate) const PAYLOAD_SENTINEL: u8 = 0x1f;

/// Floods `conn` with payload chunks until the connection stops accepting
/// writes or the run is cancelled.
///
/// Each successful write adds the written length to `counter`. A write that
/// would block suspends until the connection is writable again and then
/// retries the same chunk. Failures are reported on `events`; cancellation
/// exits quietly since the orchestrator initiated it.
pub(crate) async fn run_stream_worker<W>(
    id: usize,
    mut conn: W,
    counter: ByteCounter,
    events: mpsc::UnboundedSender<RunEvent>,
    cancel: CancellationToken,
) where
    W: AsyncWrite + Unpin,
{
    let mut chunk = [0u8; PAYLOAD_CHUNK];
    chunk[0] = PAYLOAD_SENTINEL;

    loop {
        tokio::select! {
            biased;

            _ = cancel.cancelled() => {
                debug!("stream {id}: cancelled");
                return;
            }
            written = conn.write(&chunk) => match written {
                Ok(0) => {
                    warn!("stream {id}: connection closed for send");
                    let closed = io::Error::new(
                        io::ErrorKind::WriteZero,
                        format!("stream {id}: connection closed for send"),
                    );
                    let _ = events.send(RunEvent::StreamClosed {
                        stream: id,
                        error: Error::Io(closed),
                    });
                    return;
                }
                Ok(n) => counter.add(n as u64),
                Err(e) => {
                    warn!("stream {id}: write failed: {e}");
                    let _ = events.send(RunEvent::StreamClosed {
                        stream: id,
                        error: e.into(),
                    });
                    return;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncReadExt;

    #[tokio::test]
    async fn test_worker_writes_tagged_chunks() {
        let (write_side, mut read_side) = tokio::io::duplex(64 * 1024);
        let counter = ByteCounter::new();
        let (events_tx, _events) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();

        let worker = tokio::spawn(run_stream_worker(
            0,
            write_side,
            counter.clone(),
            events_tx,
            cancel.clone(),
        ));

        let mut buf = vec![0u8; PAYLOAD_CHUNK];
        read_side.read_exact(&mut buf).await.unwrap();
        assert_eq!(buf[0], PAYLOAD_SENTINEL);

        cancel.cancel();
        worker.await.unwrap();
        assert!(counter.total() >= PAYLOAD_CHUNK as u64);
    }

    #[tokio::test]
    async fn test_worker_reports_closed_connection() {
        let (write_side, read_side) = tokio::io::duplex(1024);
        // Closing the read side makes every subsequent write fail.
        drop(read_side);

        let counter = ByteCounter::new();
        let (events_tx, mut events) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();

        let worker = tokio::spawn(run_stream_worker(
            3,
            write_side,
            counter,
            events_tx,
            cancel,
        ));

        let event = events.recv().await.unwrap();
        match event {
            RunEvent::StreamClosed { stream, .. } => assert_eq!(stream, 3),
            other => panic!("expected StreamClosed, got {other:?}"),
        }
        worker.await.unwrap();
    }

    #[tokio::test]
    async fn test_worker_exits_on_cancellation() {
        let (write_side, _read_side) = tokio::io::duplex(1024);
        let counter = ByteCounter::new();
        let (events_tx, mut events) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();
        cancel.cancel();

        run_stream_worker(0, write_side, counter.clone(), events_tx, cancel).await;

        assert_eq!(counter.total(), 0);
        assert!(events.try_recv().is_err());
    }
}
