//! Line streams over child process output (non-UTF8-safe).
//!
//! The agent's output is expected to be UTF-8, but a stray invalid byte must
//! not end log processing the way `BufReader::lines()` would. Lines are read
//! as bytes and decoded lossily.

use futures_util::stream::{self, BoxStream, StreamExt};
use std::io;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};

/// Stream of decoded output lines. An `Err` item ends the stream.
pub type LineStream = BoxStream<'static, io::Result<String>>;

/// Decode one async reader into a stream of lines without their terminators.
pub fn line_stream(reader: impl AsyncRead + Unpin + Send + 'static) -> LineStream {
    stream::unfold(Some(BufReader::new(reader)), |state| async move {
        let mut reader = state?;
        let mut buf: Vec<u8> = Vec::with_capacity(1024);

        match reader.read_until(b'\n', &mut buf).await {
            Ok(0) => None,
            Ok(_) => {
                if buf.last() == Some(&b'\n') {
                    buf.pop();
                    if buf.last() == Some(&b'\r') {
                        buf.pop();
                    }
                }
                let line = String::from_utf8_lossy(&buf).into_owned();
                Some((Ok(line), Some(reader)))
            }
            Err(e) => Some((Err(e), None)),
        }
    })
    .boxed()
}

/// Interleave stdout and stderr into one stream, the way a shell `2>&1`
/// redirect would. Lines from each source keep their relative order.
pub fn merged_output(
    stdout: impl AsyncRead + Unpin + Send + 'static,
    stderr: impl AsyncRead + Unpin + Send + 'static,
) -> LineStream {
    stream::select(line_stream(stdout), line_stream(stderr)).boxed()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_splits_and_trims_line_endings() {
        let input: &[u8] = b"lvl=INFO msg=one\r\nlvl=INFO msg=two\nlast";
        let lines: Vec<String> = line_stream(input)
            .map(|line| line.unwrap())
            .collect()
            .await;
        assert_eq!(lines, vec!["lvl=INFO msg=one", "lvl=INFO msg=two", "last"]);
    }

    #[tokio::test]
    async fn test_invalid_utf8_is_replaced() {
        let input: &[u8] = b"msg=\xff\xfe ok\n";
        let lines: Vec<String> = line_stream(input)
            .map(|line| line.unwrap())
            .collect()
            .await;
        assert_eq!(lines.len(), 1);
        assert!(lines[0].ends_with(" ok"));
        assert!(lines[0].contains('\u{FFFD}'));
    }

    #[tokio::test]
    async fn test_merged_output_keeps_all_lines() {
        let stdout: &[u8] = b"a1\na2\n";
        let stderr: &[u8] = b"b1\n";
        let mut lines: Vec<String> = merged_output(stdout, stderr)
            .map(|line| line.unwrap())
            .collect()
            .await;

        let a_order: Vec<_> = lines.iter().filter(|l| l.starts_with('a')).cloned().collect();
        assert_eq!(a_order, vec!["a1", "a2"]);
        lines.sort();
        assert_eq!(lines, vec!["a1", "a2", "b1"]);
    }
}
