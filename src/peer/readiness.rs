//! Readiness detection: scan sidecar output for the "listening" marker.
//!
//! A single reader task merges stdout and stderr line by line, forwards every
//! line to the log at debug level, and fires a one-shot signal on the first
//! line containing the marker. The reader keeps draining output after that
//! until both streams close or the task is aborted; closing the pipes early
//! would kill the sidecar with SIGPIPE on its next write.
//!
//! Lines are split on raw bytes and decoded lossily, so output that is not
//! valid UTF-8 never stops the reader.

use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio_stream::wrappers::SplitStream;
use tokio_stream::StreamExt;

/// Fires once when the marker is seen. Resolves to an error if the output
/// closed without a match.
pub type ReadySignal = oneshot::Receiver<()>;

/// Handle to the background output reader.
#[derive(Debug)]
pub struct OutputReader {
    task: JoinHandle<()>,
}

impl OutputReader {
    /// Stop forwarding output.
    pub fn abort(&self) {
        self.task.abort();
    }

    /// Abort the reader and wait for it to finish.
    pub async fn stop(self) {
        self.task.abort();
        let _ = self.task.await;
    }

    #[cfg(test)]
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

/// Start watching `stdout` and `stderr` for a line containing `marker`.
pub fn watch<O, E>(stdout: O, stderr: E, marker: String, pid: u32) -> (OutputReader, ReadySignal)
where
    O: AsyncRead + Unpin + Send + 'static,
    E: AsyncRead + Unpin + Send + 'static,
{
    let (tx, rx) = oneshot::channel();
    let task = tokio::spawn(forward_lines(stdout, stderr, marker, pid, tx));
    (OutputReader { task }, rx)
}

async fn forward_lines<O, E>(
    stdout: O,
    stderr: E,
    marker: String,
    pid: u32,
    ready: oneshot::Sender<()>,
) where
    O: AsyncRead + Unpin,
    E: AsyncRead + Unpin,
{
    let mut ready = Some(ready);
    let mut lines = SplitStream::new(BufReader::new(stdout).split(b'\n'))
        .merge(SplitStream::new(BufReader::new(stderr).split(b'\n')));

    while let Some(line) = lines.next().await {
        let raw = match line {
            Ok(raw) => raw,
            Err(e) => {
                tracing::debug!(pid, error = %e, "sidecar output read failed");
                break;
            }
        };
        let line = decode_line(&raw);
        tracing::debug!(pid, "[peer-sidecar] {line}");
        if line.contains(&marker) {
            if let Some(tx) = ready.take() {
                tracing::debug!(pid, "sidecar announced readiness");
                let _ = tx.send(());
            }
        }
    }
    tracing::debug!(pid, "sidecar output closed");
}

/// Decode one output line, replacing invalid UTF-8 and dropping a trailing `\r`.
fn decode_line(raw: &[u8]) -> String {
    let raw = raw.strip_suffix(b"\r").unwrap_or(raw);
    String::from_utf8_lossy(raw).into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::io::AsyncWriteExt;

    const MARKER: &str = "Listening on https://";

    #[tokio::test]
    async fn test_marker_on_stdout_fires_signal() {
        let stdout: &[u8] = b"booting\n[peer] Listening on https://127.0.0.1:4443/x\n";
        let stderr: &[u8] = b"";
        let (reader, ready) = watch(stdout, stderr, MARKER.to_string(), 1);
        assert!(ready.await.is_ok());
        reader.stop().await;
    }

    #[tokio::test]
    async fn test_marker_on_stderr_fires_signal() {
        let stdout: &[u8] = b"noise\n";
        let stderr: &[u8] = b"Listening on https://localhost:9000\n";
        let (_reader, ready) = watch(stdout, stderr, MARKER.to_string(), 1);
        assert!(ready.await.is_ok());
    }

    #[tokio::test]
    async fn test_no_marker_drops_signal_at_end_of_output() {
        let stdout: &[u8] = b"starting\ncrashed: missing certificate\n";
        let stderr: &[u8] = b"Traceback\n";
        let (reader, ready) = watch(stdout, stderr, MARKER.to_string(), 1);
        assert!(ready.await.is_err());
        tokio::time::timeout(Duration::from_secs(1), async {
            while !reader.is_finished() {
                tokio::task::yield_now().await;
            }
        })
        .await
        .unwrap();
    }

    #[test]
    fn test_decode_line_is_lossy() {
        assert_eq!(decode_line(b"plain"), "plain");
        assert_eq!(decode_line(b"crlf\r"), "crlf");
        assert_eq!(decode_line(b"boot \xff ok"), "boot \u{FFFD} ok");
    }

    #[tokio::test]
    async fn test_invalid_utf8_does_not_stop_reader() {
        let stdout: &[u8] = b"boot \xff\xfe\nListening on https://127.0.0.1:4443/x\n";
        let (reader, ready) = watch(stdout, &b""[..], MARKER.to_string(), 1);
        assert!(ready.await.is_ok());
        reader.stop().await;
    }

    #[tokio::test]
    async fn test_invalid_utf8_after_readiness_keeps_draining() {
        let (mut writer, stdout) = tokio::io::duplex(64);
        let (_stderr_writer, stderr) = tokio::io::duplex(64);
        let (reader, ready) = watch(stdout, stderr, MARKER.to_string(), 1);

        writer.write_all(b"Listening on https://x\n").await.unwrap();
        tokio::time::timeout(Duration::from_secs(1), ready)
            .await
            .unwrap()
            .unwrap();

        // More than the pipe holds: only succeeds if the reader keeps draining
        for _ in 0..64 {
            let write = writer.write_all(b"\xc3\x28 garbage\n");
            tokio::time::timeout(Duration::from_secs(1), write)
                .await
                .unwrap()
                .unwrap();
        }
        assert!(!reader.is_finished());
        reader.stop().await;
    }

    #[tokio::test]
    async fn test_repeated_marker_is_harmless() {
        let stdout: &[u8] =
            b"Listening on https://a\nListening on https://b\nListening on https://c\n";
        let (reader, ready) = watch(stdout, &b""[..], MARKER.to_string(), 1);
        assert!(ready.await.is_ok());
        reader.stop().await;
    }

    #[tokio::test]
    async fn test_reader_keeps_running_after_readiness() {
        let (mut writer, stdout) = tokio::io::duplex(1024);
        let (_stderr_writer, stderr) = tokio::io::duplex(64);
        let (reader, ready) = watch(stdout, stderr, MARKER.to_string(), 1);

        writer
            .write_all(b"Listening on https://127.0.0.1:1\n")
            .await
            .unwrap();
        tokio::time::timeout(Duration::from_secs(1), ready)
            .await
            .unwrap()
            .unwrap();

        writer.write_all(b"still serving\n").await.unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!reader.is_finished());

        reader.stop().await;
    }

    #[tokio::test]
    async fn test_signal_pending_while_output_open() {
        let (mut writer, stdout) = tokio::io::duplex(1024);
        let (_stderr_writer, stderr) = tokio::io::duplex(64);
        let (reader, ready) = watch(stdout, stderr, MARKER.to_string(), 1);

        writer.write_all(b"warming up\n").await.unwrap();
        let waited = tokio::time::timeout(Duration::from_millis(50), ready).await;
        assert!(waited.is_err(), "signal must not fire without the marker");

        reader.stop().await;
    }
}
