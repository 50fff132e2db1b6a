//! Duplicate one input stream into independent readers.
//!
//! A pump task reads the source once and hands every chunk to one writer task
//! per pipe over an unbounded channel, so a reader that falls behind holds its
//! backlog in memory instead of stalling the rest. End of input, or a read
//! error, closes every pipe once its backlog is written. A reader that goes
//! away is dropped from the set without disturbing the others.

use std::sync::Arc;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt, DuplexStream};
use tokio::sync::mpsc;
use tokio::task::{JoinHandle, JoinSet};
use tracing::debug;

/// Buffer held by each pipe before its writer waits for the reader.
const PIPE_CAPACITY: usize = 64 * 1024;

const CHUNK_SIZE: usize = 8 * 1024;

type Chunk = Arc<[u8]>;

/// Split `source` into `count` readers that each see the full input.
///
/// Aborting the returned handle stops the pump and every writer.
pub fn tee<R>(source: R, count: usize) -> (Vec<DuplexStream>, JoinHandle<()>)
where
    R: AsyncRead + Send + Unpin + 'static,
{
    let mut writers = JoinSet::new();
    let mut senders = Vec::with_capacity(count);
    let mut readers = Vec::with_capacity(count);
    for index in 0..count {
        let (writer, reader) = tokio::io::duplex(PIPE_CAPACITY);
        let (tx, rx) = mpsc::unbounded_channel();
        writers.spawn(drain(index, rx, writer));
        senders.push(Some(tx));
        readers.push(reader);
    }

    let pump = tokio::spawn(async move {
        pump(source, senders).await;
        while writers.join_next().await.is_some() {}
    });
    (readers, pump)
}

async fn pump<R>(mut source: R, mut senders: Vec<Option<mpsc::UnboundedSender<Chunk>>>)
where
    R: AsyncRead + Send + Unpin,
{
    let mut buf = vec![0u8; CHUNK_SIZE];
    loop {
        let n = match source.read(&mut buf).await {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) => {
                debug!(error = %e, "Input source failed; closing all readers");
                break;
            }
        };

        let chunk: Chunk = Arc::from(&buf[..n]);
        for slot in &mut senders {
            let closed = match slot {
                Some(tx) => tx.send(Arc::clone(&chunk)).is_err(),
                None => false,
            };
            if closed {
                *slot = None;
            }
        }
        if senders.iter().all(Option::is_none) {
            break;
        }
    }
}

/// Write every chunk for one reader, then close its pipe.
async fn drain(index: usize, mut chunks: mpsc::UnboundedReceiver<Chunk>, mut writer: DuplexStream) {
    while let Some(chunk) = chunks.recv().await {
        if let Err(e) = writer.write_all(&chunk).await {
            debug!(reader = index, error = %e, "Reader closed; dropping its input");
            return;
        }
    }
    let _ = writer.shutdown().await;
}
