//! Output capture: demultiplexes an exec's combined stream into tagged lines.
//!
//! Three tasks cooperate per job. The demux task copies frames into one of two
//! in-memory pipes and closes both when the source ends; one consumer per pipe
//! reads complete lines and writes them to the caller's sink. The first task to
//! fail decides the result. Order is kept within a stream, not across streams.

use console::Style;
use futures::StreamExt;
use futures::future::try_join3;
use serde::{Deserialize, Serialize};
use stagehand_core::{Error, ExecOutput, Job, OutputChunk, Result};
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader, DuplexStream};

const PIPE_CAPACITY: usize = 64 * 1024;

/// How captured lines are rendered into the sinks.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    /// `[stage/job] line`, stderr lines marked.
    #[default]
    Tagged,
    /// The bare line.
    Plain,
}

/// Renders one captured line for a given job.
#[derive(Debug, Clone)]
pub struct LineFormatter {
    tag: String,
    format: OutputFormat,
    error_style: Option<Style>,
}

impl LineFormatter {
    pub fn new(stage: &str, job: &str, format: OutputFormat, color: bool) -> Self {
        Self {
            tag: format!("[{}/{}]", stage, job),
            format,
            error_style: color.then(|| Style::new().red().force_styling(true)),
        }
    }

    pub fn for_job(job: &Job, format: OutputFormat, color: bool) -> Self {
        Self::new(job.stage(), job.name(), format, color)
    }

    pub fn stdout_line(&self, line: &str) -> String {
        match self.format {
            OutputFormat::Plain => format!("{}\n", line),
            OutputFormat::Tagged => format!("{} {}\n", self.tag, line),
        }
    }

    pub fn stderr_line(&self, line: &str) -> String {
        match (self.format, &self.error_style) {
            (OutputFormat::Plain, _) => format!("{}\n", line),
            (OutputFormat::Tagged, Some(style)) => {
                format!("{}\n", style.apply_to(format!("{} {}", self.tag, line)))
            }
            (OutputFormat::Tagged, None) => format!("{} [stderr] {}\n", self.tag, line),
        }
    }
}

/// Line counts of one capture.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CaptureStats {
    pub stdout_lines: u64,
    pub stderr_lines: u64,
}

/// Drain `output` into the two sinks, line by line.
pub async fn capture_output<O, E>(
    output: ExecOutput,
    formatter: &LineFormatter,
    stdout: &mut O,
    stderr: &mut E,
) -> Result<CaptureStats>
where
    O: AsyncWrite + Unpin,
    E: AsyncWrite + Unpin,
{
    let (out_writer, out_reader) = tokio::io::duplex(PIPE_CAPACITY);
    let (err_writer, err_reader) = tokio::io::duplex(PIPE_CAPACITY);

    let (_, stdout_lines, stderr_lines) = try_join3(
        demux(output, out_writer, err_writer),
        forward_lines(out_reader, stdout, |line| formatter.stdout_line(line)),
        forward_lines(err_reader, stderr, |line| formatter.stderr_line(line)),
    )
    .await?;

    Ok(CaptureStats {
        stdout_lines,
        stderr_lines,
    })
}

async fn demux(
    mut output: ExecOutput,
    mut stdout: DuplexStream,
    mut stderr: DuplexStream,
) -> Result<()> {
    let copied = async {
        while let Some(chunk) = output.next().await {
            match chunk? {
                OutputChunk::Stdout(bytes) => stdout.write_all(&bytes).await.map_err(pipe_error)?,
                OutputChunk::Stderr(bytes) => stderr.write_all(&bytes).await.map_err(pipe_error)?,
            }
        }
        Ok(())
    }
    .await;

    // Closing the writers is the end-of-output signal for both consumers.
    let _ = stdout.shutdown().await;
    let _ = stderr.shutdown().await;
    copied
}

async fn forward_lines<R, W, F>(reader: R, sink: &mut W, render: F) -> Result<u64>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
    F: Fn(&str) -> String,
{
    let mut reader = BufReader::new(reader);
    let mut buf = Vec::new();
    let mut count = 0u64;

    loop {
        buf.clear();
        let read = reader
            .read_until(b'\n', &mut buf)
            .await
            .map_err(|e| Error::OutputStream(format!("Failed to read job output: {}", e)))?;
        if read == 0 {
            break;
        }

        let line = String::from_utf8_lossy(trim_line_ending(&buf));
        sink.write_all(render(&line).as_bytes())
            .await
            .map_err(sink_error)?;
        count += 1;
    }

    sink.flush().await.map_err(sink_error)?;
    Ok(count)
}

fn trim_line_ending(line: &[u8]) -> &[u8] {
    let line = line.strip_suffix(b"\n").unwrap_or(line);
    line.strip_suffix(b"\r").unwrap_or(line)
}

fn pipe_error(e: std::io::Error) -> Error {
    Error::OutputStream(format!("Failed to demultiplex job output: {}", e))
}

fn sink_error(e: std::io::Error) -> Error {
    Error::OutputStream(format!("Failed to write job output: {}", e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::stream;
    use pretty_assertions::assert_eq;
    use std::pin::Pin;
    use std::task::{Context, Poll};

    fn chunks(items: Vec<Result<OutputChunk>>) -> ExecOutput {
        Box::pin(stream::iter(items))
    }

    fn out(s: &str) -> Result<OutputChunk> {
        Ok(OutputChunk::Stdout(s.as_bytes().to_vec()))
    }

    fn err(s: &str) -> Result<OutputChunk> {
        Ok(OutputChunk::Stderr(s.as_bytes().to_vec()))
    }

    fn plain() -> LineFormatter {
        LineFormatter::new("build", "compile", OutputFormat::Plain, false)
    }

    #[tokio::test]
    async fn test_splits_streams() {
        let mut stdout = Vec::new();
        let mut stderr = Vec::new();

        let stats = capture_output(
            chunks(vec![out("hello\n"), err("oops\n"), out("world\n")]),
            &plain(),
            &mut stdout,
            &mut stderr,
        )
        .await
        .unwrap();

        assert_eq!(String::from_utf8(stdout).unwrap(), "hello\nworld\n");
        assert_eq!(String::from_utf8(stderr).unwrap(), "oops\n");
        assert_eq!(
            stats,
            CaptureStats {
                stdout_lines: 2,
                stderr_lines: 1
            }
        );
    }

    #[tokio::test]
    async fn test_reassembles_lines_across_frames() {
        let mut stdout = Vec::new();
        let mut stderr = Vec::new();

        capture_output(
            chunks(vec![out("hel"), out("lo\r\nwor"), out("ld")]),
            &plain(),
            &mut stdout,
            &mut stderr,
        )
        .await
        .unwrap();

        assert_eq!(String::from_utf8(stdout).unwrap(), "hello\nworld\n");
        assert!(stderr.is_empty());
    }

    #[tokio::test]
    async fn test_tagged_format() {
        let formatter = LineFormatter::new("test", "unit", OutputFormat::Tagged, false);
        let mut stdout = Vec::new();
        let mut stderr = Vec::new();

        capture_output(
            chunks(vec![out("ok\n"), err("bad\n")]),
            &formatter,
            &mut stdout,
            &mut stderr,
        )
        .await
        .unwrap();

        assert_eq!(String::from_utf8(stdout).unwrap(), "[test/unit] ok\n");
        assert_eq!(String::from_utf8(stderr).unwrap(), "[test/unit] [stderr] bad\n");
    }

    #[test]
    fn test_colored_stderr_line() {
        let formatter = LineFormatter::new("test", "unit", OutputFormat::Tagged, true);
        assert_eq!(
            formatter.stderr_line("bad"),
            "\u{1b}[31m[test/unit] bad\u{1b}[0m\n"
        );
        assert_eq!(formatter.stdout_line("ok"), "[test/unit] ok\n");
    }

    #[tokio::test]
    async fn test_invalid_utf8_is_replaced() {
        let mut stdout = Vec::new();
        let mut stderr = Vec::new();

        capture_output(
            chunks(vec![Ok(OutputChunk::Stdout(vec![b'a', 0xff, b'b', b'\n']))]),
            &plain(),
            &mut stdout,
            &mut stderr,
        )
        .await
        .unwrap();

        assert_eq!(String::from_utf8(stdout).unwrap(), "a\u{fffd}b\n");
    }

    #[tokio::test]
    async fn test_stream_error_wins() {
        let mut stdout = Vec::new();
        let mut stderr = Vec::new();

        let result = capture_output(
            chunks(vec![
                out("partial\n"),
                Err(Error::OutputStream("connection reset".to_string())),
            ]),
            &plain(),
            &mut stdout,
            &mut stderr,
        )
        .await;

        assert!(matches!(result, Err(Error::OutputStream(_))));
    }

    struct BrokenSink;

    impl AsyncWrite for BrokenSink {
        fn poll_write(
            self: Pin<&mut Self>,
            _cx: &mut Context<'_>,
            _buf: &[u8],
        ) -> Poll<std::io::Result<usize>> {
            Poll::Ready(Err(std::io::Error::new(
                std::io::ErrorKind::BrokenPipe,
                "sink closed",
            )))
        }

        fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
            Poll::Ready(Ok(()))
        }

        fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
            Poll::Ready(Ok(()))
        }
    }

    #[tokio::test]
    async fn test_sink_failure_surfaces() {
        let mut stdout = BrokenSink;
        let mut stderr = Vec::new();

        let result = capture_output(
            chunks(vec![out("hello\n")]),
            &plain(),
            &mut stdout,
            &mut stderr,
        )
        .await;

        match result {
            Err(Error::OutputStream(message)) => assert!(message.contains("sink closed")),
            other => panic!("expected OutputStream error, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_output_larger_than_pipe() {
        let line = "x".repeat(1000);
        let frames: Vec<Result<OutputChunk>> =
            (0..200).map(|_| out(&format!("{}\n", line))).collect();
        let mut stdout = Vec::new();
        let mut stderr = Vec::new();

        let stats = capture_output(chunks(frames), &plain(), &mut stdout, &mut stderr)
            .await
            .unwrap();

        assert_eq!(stats.stdout_lines, 200);
        assert_eq!(stdout.len(), 200 * 1001);
    }
}
