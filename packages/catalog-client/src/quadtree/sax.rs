//! Streaming (SAX-style) parser for unbounded partition listings
//! (spec §1, §4.5).
//!
//! A `{"partitions": [ {...}, {...}, ... ]}` response can run to hundreds
//! of megabytes for a fully-partitioned layer. Rather than buffering the
//! whole body and running `serde_json::from_slice`, this scans the byte
//! stream incrementally, emitting one [`Partition`] at a time onto a
//! bounded channel -- the consumer's read rate throttles the producer.

use bytes::{Bytes, BytesMut};
use catalog_core::{ApiError, Partition};
use futures_util::Stream;
use futures_util::StreamExt;
use tokio::sync::mpsc;
use tracing::warn;

/// Feeds `body` (a stream of raw byte chunks) into the SAX-style scanner,
/// sending each decoded [`Partition`] on `sender`. Backpressure comes from
/// `sender.send(..).await` blocking when the consumer is behind.
pub async fn stream_partitions<S, E>(mut body: S, sender: mpsc::Sender<Result<Partition, ApiError>>)
where
    S: Stream<Item = Result<Bytes, E>> + Unpin,
    E: std::fmt::Display,
{
    let mut scanner = ObjectScanner::new();
    loop {
        match body.next().await {
            Some(Ok(chunk)) => {
                for object in scanner.feed(&chunk) {
                    let decoded = serde_json::from_slice::<Partition>(&object)
                        .map_err(|err| ApiError::invalid_argument(format!("malformed partition record: {err}")));
                    if sender.send(decoded).await.is_err() {
                        return;
                    }
                }
            }
            Some(Err(err)) => {
                warn!(%err, "partition stream read error");
                let _ = sender
                    .send(Err(ApiError::new(catalog_core::ErrorKind::NetworkConnection, -1, err.to_string())))
                    .await;
                return;
            }
            None => return,
        }
    }
}

/// Incremental scanner that extracts complete top-level JSON objects from
/// inside the first array it encounters (the `partitions` array), tracking
/// brace depth and string/escape state across chunk boundaries.
struct ObjectScanner {
    buffer: BytesMut,
    in_array: bool,
    depth: u32,
    in_string: bool,
    escaped: bool,
    object_start: Option<usize>,
    scan_pos: usize,
}

impl ObjectScanner {
    fn new() -> Self {
        Self {
            buffer: BytesMut::new(),
            in_array: false,
            depth: 0,
            in_string: false,
            escaped: false,
            object_start: None,
            scan_pos: 0,
        }
    }

    /// Feeds a chunk and returns every complete JSON object recognized so
    /// far, draining consumed bytes from the internal buffer.
    fn feed(&mut self, chunk: &[u8]) -> Vec<Bytes> {
        self.buffer.extend_from_slice(chunk);
        let mut out = Vec::new();

        while self.scan_pos < self.buffer.len() {
            let byte = self.buffer[self.scan_pos];

            if self.in_string {
                if self.escaped {
                    self.escaped = false;
                } else if byte == b'\\' {
                    self.escaped = true;
                } else if byte == b'"' {
                    self.in_string = false;
                }
                self.scan_pos += 1;
                continue;
            }

            match byte {
                b'"' => self.in_string = true,
                b'[' if !self.in_array => self.in_array = true,
                b'{' => {
                    if self.depth == 0 {
                        self.object_start = Some(self.scan_pos);
                    }
                    self.depth += 1;
                }
                b'}' => {
                    if self.depth > 0 {
                        self.depth -= 1;
                        if self.depth == 0 {
                            if let Some(start) = self.object_start.take() {
                                out.push(Bytes::copy_from_slice(&self.buffer[start..=self.scan_pos]));
                            }
                        }
                    }
                }
                b']' if self.in_array && self.depth == 0 => {
                    self.in_array = false;
                }
                _ => {}
            }
            self.scan_pos += 1;
        }

        // Compact: drop everything up to the last completed object (or,
        // lacking one, up to an in-progress object's start) to bound memory.
        let keep_from = self.object_start.unwrap_or(self.scan_pos);
        if keep_from > 0 {
            let _ = self.buffer.split_to(keep_from);
            self.scan_pos -= keep_from;
            if let Some(start) = self.object_start.as_mut() {
                *start -= keep_from;
            }
        }

        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::stream;

    #[tokio::test]
    async fn streams_partitions_split_across_chunks() {
        let body = br#"{"partitions":[{"partition":"p1","dataHandle":"h1","version":1},{"partition":"p2","dataHandle":"h2","version":1}]}"#;
        let mid = body.len() / 2;
        let chunks: Vec<Result<Bytes, std::io::Error>> =
            vec![Ok(Bytes::copy_from_slice(&body[..mid])), Ok(Bytes::copy_from_slice(&body[mid..]))];
        let (tx, mut rx) = mpsc::channel(8);
        stream_partitions(stream::iter(chunks), tx).await;

        let mut ids = Vec::new();
        while let Some(result) = rx.recv().await {
            ids.push(result.unwrap().partition_id);
        }
        assert_eq!(ids, vec!["p1".to_string(), "p2".to_string()]);
    }

    #[tokio::test]
    async fn propagates_malformed_record_as_error() {
        let body = br#"{"partitions":[{"not_a_partition": true}]}"#;
        let chunks: Vec<Result<Bytes, std::io::Error>> = vec![Ok(Bytes::copy_from_slice(body))];
        let (tx, mut rx) = mpsc::channel(8);
        stream_partitions(stream::iter(chunks), tx).await;
        assert!(rx.recv().await.unwrap().is_err());
    }
}
