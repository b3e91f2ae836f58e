//! TCP intake of newline-delimited JSON log records.

use std::net::SocketAddr;

use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, warn};

use crate::record::LogRecord;

/// Longest accepted record line, newline excluded.
pub const MAX_RECORD_BYTES: usize = 256 * 1024;

pub struct LogSource {
    listener: TcpListener,
    max_record_bytes: usize,
}

impl LogSource {
    pub async fn bind(addr: SocketAddr) -> std::io::Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        Ok(Self {
            listener,
            max_record_bytes: MAX_RECORD_BYTES,
        })
    }

    /// A shipper sending a longer line is disconnected.
    pub fn with_max_record_bytes(mut self, max: usize) -> Self {
        self.max_record_bytes = max;
        self
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Accept shippers until shutdown signal. Each connection is one
    /// ordered stream; records are forwarded in arrival order and the
    /// reader waits while the queue is full.
    pub async fn run(self, records: mpsc::Sender<LogRecord>, mut shutdown: watch::Receiver<bool>) {
        if let Ok(addr) = self.listener.local_addr() {
            info!(%addr, "log source listening");
        }
        loop {
            tokio::select! {
                accepted = self.listener.accept() => {
                    match accepted {
                        Ok((stream, peer)) => {
                            debug!(%peer, "log shipper connected");
                            let records = records.clone();
                            let shutdown = shutdown.clone();
                            let max = self.max_record_bytes;
                            tokio::spawn(async move {
                                read_stream(stream, max, records, shutdown).await;
                                debug!(%peer, "log shipper disconnected");
                            });
                        }
                        Err(e) => error!(error = %e, "log source accept failed"),
                    }
                }
                _ = shutdown.changed() => {
                    info!("log source shutting down");
                    break;
                }
            }
        }
    }
}

enum Line {
    Record(String),
    TooLong,
    Eof,
}

/// Read one newline-terminated line, buffering at most `max` bytes of it.
async fn next_line<R>(reader: &mut R, buf: &mut Vec<u8>, max: usize) -> std::io::Result<Line>
where
    R: AsyncBufRead + Unpin,
{
    buf.clear();
    let limit = max as u64 + 1;
    let n = (&mut *reader).take(limit).read_until(b'\n', buf).await?;
    if n == 0 {
        return Ok(Line::Eof);
    }
    if buf.last() == Some(&b'\n') {
        buf.pop();
        if buf.last() == Some(&b'\r') {
            buf.pop();
        }
    } else if buf.len() > max {
        return Ok(Line::TooLong);
    }
    Ok(Line::Record(String::from_utf8_lossy(buf).into_owned()))
}

async fn read_stream(
    stream: TcpStream,
    max: usize,
    records: mpsc::Sender<LogRecord>,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut reader = BufReader::new(stream);
    let mut buf = Vec::new();
    loop {
        let line = tokio::select! {
            line = next_line(&mut reader, &mut buf, max) => line,
            _ = shutdown.changed() => return,
        };
        let line = match line {
            Ok(Line::Record(line)) => line,
            Ok(Line::Eof) => return,
            Ok(Line::TooLong) => {
                warn!(max, "log record exceeds size limit, dropping connection");
                return;
            }
            Err(e) => {
                warn!(error = %e, "log stream read failed");
                return;
            }
        };
        if line.trim().is_empty() {
            continue;
        }
        let record: LogRecord = match serde_json::from_str(&line) {
            Ok(record) => record,
            Err(e) => {
                warn!(error = %e, "skipping unparseable log record");
                continue;
            }
        };
        if records.send(record).await.is_err() {
            return;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncWriteExt;

    #[tokio::test]
    async fn forwards_records_in_order_and_skips_garbage() {
        let source = LogSource::bind("127.0.0.1:0".parse().unwrap()).await.unwrap();
        let addr = source.local_addr().unwrap();
        let (tx, mut rx) = mpsc::channel(8);
        let (stop, shutdown) = watch::channel(false);
        let server = tokio::spawn(source.run(tx, shutdown));

        let mut client = TcpStream::connect(addr).await.unwrap();
        client
            .write_all(
                b"{\"log\":\"first\",\"kubernetes\":{\"pod_name\":\"a\"}}\n\
                  not json\n\
                  \n\
                  {\"log\":\"second\",\"kubernetes\":{\"pod_name\":\"b\"}}\n",
            )
            .await
            .unwrap();

        let first = rx.recv().await.unwrap();
        let second = rx.recv().await.unwrap();
        assert_eq!(first.log, "first");
        assert_eq!(second.log, "second");
        assert_eq!(second.kubernetes.pod_name, "b");

        stop.send(true).unwrap();
        tokio::time::timeout(std::time::Duration::from_secs(2), server)
            .await
            .expect("source should stop")
            .unwrap();
    }

    #[tokio::test]
    async fn oversized_line_drops_the_connection() {
        let source = LogSource::bind("127.0.0.1:0".parse().unwrap())
            .await
            .unwrap()
            .with_max_record_bytes(64);
        let addr = source.local_addr().unwrap();
        let (tx, mut rx) = mpsc::channel(8);
        let (_stop, shutdown) = watch::channel(false);
        tokio::spawn(source.run(tx, shutdown));

        let mut client = TcpStream::connect(addr).await.unwrap();
        client
            .write_all(b"{\"log\":\"ok\",\"kubernetes\":{\"pod_name\":\"a\"}}\n")
            .await
            .unwrap();
        assert_eq!(rx.recv().await.unwrap().log, "ok");

        // No newline ever arrives; the source must stop buffering.
        client.write_all(&[b'x'; 1024]).await.unwrap();
        // Either a clean EOF or a reset, as long as it ends.
        let mut rest = Vec::new();
        let _ = tokio::time::timeout(
            std::time::Duration::from_secs(2),
            client.read_to_end(&mut rest),
        )
        .await
        .expect("connection should be closed");
        assert!(rest.is_empty());
        assert!(rx.try_recv().is_err());
    }
}
