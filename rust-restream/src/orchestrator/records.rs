//! Record splitting for encoder output.
//!
//! ffmpeg redraws its progress line with a bare `\r` and may go the whole
//! broadcast without a `\n`. Splitting on both delimiters as bytes arrive
//! keeps each record available as soon as it is terminated.

use std::io;

use tokio::io::{AsyncRead, AsyncReadExt, BufReader};

const CHUNK_SIZE: usize = 4096;

/// Yields trimmed, non-empty records delimited by `\n` or `\r`.
pub struct RecordReader<R> {
    reader: BufReader<R>,
    pending: Vec<u8>,
    chunk: Box<[u8; CHUNK_SIZE]>,
}

impl<R> RecordReader<R>
where
    R: AsyncRead + Unpin,
{
    pub fn new(reader: R) -> Self {
        Self {
            reader: BufReader::new(reader),
            pending: Vec::new(),
            chunk: Box::new([0u8; CHUNK_SIZE]),
        }
    }

    /// Next record, or `None` at EOF. Invalid UTF-8 is replaced lossily.
    pub async fn next_record(&mut self) -> io::Result<Option<String>> {
        loop {
            while let Some(end) = self.pending.iter().position(|b| is_delimiter(*b)) {
                let record = take_record(&mut self.pending, end);
                if !record.is_empty() {
                    return Ok(Some(record));
                }
            }

            let n = self.reader.read(&mut self.chunk[..]).await?;
            if n == 0 {
                let end = self.pending.len();
                let record = take_record(&mut self.pending, end);
                return Ok((!record.is_empty()).then_some(record));
            }
            self.pending.extend_from_slice(&self.chunk[..n]);
        }
    }
}

fn is_delimiter(b: u8) -> bool {
    b == b'\n' || b == b'\r'
}

/// Remove `pending[..end]` plus any delimiters that follow it.
fn take_record(pending: &mut Vec<u8>, end: usize) -> String {
    let record = String::from_utf8_lossy(&pending[..end]).trim().to_string();
    let skip = pending[end..].iter().take_while(|b| is_delimiter(**b)).count();
    pending.drain(..end + skip);
    record
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncWriteExt;

    #[tokio::test]
    async fn test_splits_on_both_delimiters() {
        let input: &[u8] = b"\r\none\rtwo\nthree\r\n\r\n  \rfour";
        let mut reader = RecordReader::new(input);
        let mut records = Vec::new();
        while let Some(record) = reader.next_record().await.unwrap() {
            records.push(record);
        }
        assert_eq!(records, vec!["one", "two", "three", "four"]);
    }

    #[tokio::test]
    async fn test_carriage_return_record_available_before_eof() {
        let (mut tx, rx) = tokio::io::duplex(256);
        let mut reader = RecordReader::new(rx);

        tx.write_all(b"frame=1\rframe=2\r").await.unwrap();
        assert_eq!(reader.next_record().await.unwrap().as_deref(), Some("frame=1"));
        assert_eq!(reader.next_record().await.unwrap().as_deref(), Some("frame=2"));

        drop(tx);
        assert_eq!(reader.next_record().await.unwrap(), None);
    }
}
