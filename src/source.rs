//! Line sources and the per-file ingestion worker.
//!
//! A [`LineSource`] yields lines from some input; [`FileTail`] follows a file
//! on disk. A [`FileWorker`] parses each line with its configured format and
//! hands the resulting message to the event buffer, or for one-shot bulk
//! reads, straight to the transport.

use std::io::SeekFrom;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::fs::File;
use tokio::io::{AsyncBufReadExt, AsyncSeekExt, BufReader};
use tracing::{debug, info};

use crate::config::InputFile;
use crate::delivery::DirectSender;
use crate::error::Result;
use crate::message::Severity;
use crate::parser::ParserRegistry;
use crate::reporter::Reporter;

/// Delay between end-of-file checks while tailing.
pub const TAIL_POLL_INTERVAL: Duration = Duration::from_millis(250);

/// Pause before retrying a file that could not be opened or read.
pub const FILE_REOPEN_INTERVAL: Duration = Duration::from_secs(60);

/// Something that produces lines of text.
#[async_trait]
pub trait LineSource: Send {
    /// Next line without its terminator, or `None` once the source is exhausted.
    ///
    /// An error does not end the source; callers may keep reading after it.
    async fn next_line(&mut self) -> Option<Result<String>>;
}

/// Follows a file, yielding complete lines as they are written.
pub struct FileTail {
    path: PathBuf,
    reader: BufReader<File>,
    position: u64,
    read_all: bool,
    poll_interval: Duration,
    pending: Vec<u8>,
    failed: bool,
}

impl FileTail {
    /// Open `path`.
    ///
    /// With `read_all` the file is read from the start and the source ends at
    /// end of file; otherwise reading starts at the current end and follows
    /// new writes indefinitely.
    pub async fn open(path: impl AsRef<Path>, read_all: bool) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let mut file = File::open(&path).await?;
        let position = if read_all {
            0
        } else {
            file.seek(SeekFrom::End(0)).await?
        };

        Ok(Self {
            path,
            reader: BufReader::new(file),
            position,
            read_all,
            poll_interval: TAIL_POLL_INTERVAL,
            pending: Vec::new(),
            failed: false,
        })
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn take_line(&mut self) -> String {
        let line = String::from_utf8_lossy(&self.pending)
            .trim_end_matches(|c: char| c == '\n' || c == '\r')
            .to_string();
        self.pending.clear();
        line
    }

    /// Reopen the file at the last position read, after a read error.
    async fn reopen(&mut self) -> Result<()> {
        let mut file = File::open(&self.path).await?;
        file.seek(SeekFrom::Start(self.position)).await?;
        self.reader = BufReader::new(file);
        self.failed = false;
        info!(path = %self.path.display(), position = self.position, "File reopened");
        Ok(())
    }

    /// Start over from the beginning if the file shrank below our position.
    async fn check_truncation(&mut self) -> Result<()> {
        let Ok(metadata) = tokio::fs::metadata(&self.path).await else {
            return Ok(());
        };
        if metadata.len() < self.position {
            info!(path = %self.path.display(), "File truncated, reading from start");
            self.reader.seek(SeekFrom::Start(0)).await?;
            self.position = 0;
            self.pending.clear();
        }
        Ok(())
    }
}

#[async_trait]
impl LineSource for FileTail {
    async fn next_line(&mut self) -> Option<Result<String>> {
        if self.failed {
            if let Err(e) = self.reopen().await {
                return Some(Err(e));
            }
        }
        loop {
            match self.reader.read_until(b'\n', &mut self.pending).await {
                Err(e) => {
                    self.failed = true;
                    return Some(Err(e.into()));
                }
                Ok(0) => {
                    if self.read_all {
                        return (!self.pending.is_empty()).then(|| Ok(self.take_line()));
                    }
                    if let Err(e) = self.check_truncation().await {
                        self.failed = true;
                        return Some(Err(e));
                    }
                    tokio::time::sleep(self.poll_interval).await;
                }
                Ok(n) => {
                    self.position += n as u64;
                    if self.pending.ends_with(b"\n") {
                        return Some(Ok(self.take_line()));
                    }
                }
            }
        }
    }
}

/// Ingests one configured input file.
pub struct FileWorker {
    input: InputFile,
    registry: Arc<ParserRegistry>,
    reporter: Arc<Reporter>,
    direct: DirectSender,
}

impl FileWorker {
    pub fn new(
        input: InputFile,
        registry: Arc<ParserRegistry>,
        reporter: Arc<Reporter>,
        direct: DirectSender,
    ) -> Self {
        Self {
            input,
            registry,
            reporter,
            direct,
        }
    }

    /// Open the file (retrying until it exists) and process it.
    pub async fn run(self) {
        if !self.registry.check_format(&self.input.format) {
            self.reporter.report(
                Severity::Error,
                &format!(
                    "Unknown format {} for {}",
                    self.input.format,
                    self.input.path.display()
                ),
                "",
            );
            return;
        }

        let mut source = loop {
            match FileTail::open(&self.input.path, self.input.read_all).await {
                Ok(source) => break source,
                Err(e) => {
                    self.reporter.report(
                        Severity::Error,
                        &format!("Unable to open {}: {}", self.input.path.display(), e),
                        "",
                    );
                    tokio::time::sleep(FILE_REOPEN_INTERVAL).await;
                }
            }
        };

        self.reporter.report(
            Severity::Info,
            &format!(
                "Processing {} as {}",
                self.input.path.display(),
                self.input.format
            ),
            "",
        );
        let forwarded = self.process(&mut source).await;

        if self.input.read_all {
            self.reporter.report(
                Severity::Info,
                &format!(
                    "Finished reading {}, {} lines forwarded",
                    self.input.path.display(),
                    forwarded
                ),
                "",
            );
        }
    }

    /// Consume `source` until it ends; returns the lines forwarded.
    ///
    /// Read errors are reported and reading resumes after [`FILE_REOPEN_INTERVAL`].
    pub async fn process<S>(&self, source: &mut S) -> usize
    where
        S: LineSource + ?Sized,
    {
        let mut forwarded = 0;
        while let Some(line) = source.next_line().await {
            match line {
                Ok(line) => {
                    if self.handle_line(&line).await {
                        forwarded += 1;
                    }
                }
                Err(e) => {
                    self.reporter.report(
                        Severity::Error,
                        &format!("Error reading {}: {}", self.input.path.display(), e),
                        "",
                    );
                    tokio::time::sleep(FILE_REOPEN_INTERVAL).await;
                }
            }
        }
        forwarded
    }

    /// Parse and forward one line. Unparseable lines are reported and dropped.
    pub async fn handle_line(&self, line: &str) -> bool {
        let line = line.trim();
        if line.is_empty() {
            return false;
        }

        let mut message = match self.registry.parse(line, &self.input.format) {
            Ok(message) => message,
            Err(e) => {
                self.reporter.report(
                    Severity::Warning,
                    &format!("Error parsing {} line: {}", self.input.format, e),
                    line,
                );
                return false;
            }
        };
        message.insert("_log_file", self.input.path.display().to_string());
        message.extend_from(self.reporter.static_fields());

        let payload = match message.to_bytes() {
            Ok(payload) => payload,
            Err(e) => {
                self.reporter.report(
                    Severity::Error,
                    &format!("Error encoding message: {}", e),
                    line,
                );
                return false;
            }
        };

        if self.input.read_all {
            self.direct.send(&payload).await;
        } else {
            self.reporter.submit(payload);
        }
        debug!(path = %self.input.path.display(), "Line forwarded");
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::EventBuffer;
    use crate::message::{FieldValue, Message};
    use crate::parser::builtin::FORMAT_COMBINED;
    use crate::reconnect;
    use crate::transport::Transport;
    use bytes::Bytes;
    use std::collections::VecDeque;
    use std::io::{Seek, Write};
    use std::sync::Mutex;
    use tokio::time::timeout;

    const POLL: Duration = Duration::from_millis(10);

    struct VecSource(VecDeque<&'static str>);

    #[async_trait]
    impl LineSource for VecSource {
        async fn next_line(&mut self) -> Option<Result<String>> {
            self.0.pop_front().map(|line| Ok(line.to_string()))
        }
    }

    /// Fails on the first read, then yields its lines.
    struct FailingOnceSource {
        failed: bool,
        lines: VecDeque<&'static str>,
    }

    #[async_trait]
    impl LineSource for FailingOnceSource {
        async fn next_line(&mut self) -> Option<Result<String>> {
            if !self.failed {
                self.failed = true;
                let err = std::io::Error::new(std::io::ErrorKind::Other, "input/output error");
                return Some(Err(err.into()));
            }
            self.lines.pop_front().map(|line| Ok(line.to_string()))
        }
    }

    #[derive(Default)]
    struct RecordingTransport {
        sent: Mutex<Vec<Bytes>>,
    }

    #[async_trait]
    impl Transport for RecordingTransport {
        async fn open(&self) -> Result<()> {
            Ok(())
        }

        async fn send(&self, payload: &Bytes) -> Result<()> {
            self.sent.lock().unwrap().push(payload.clone());
            Ok(())
        }

        fn destination(&self) -> &str {
            "test-queue"
        }
    }

    fn worker(format: &str, read_all: bool) -> (FileWorker, Arc<RecordingTransport>) {
        let mut fields = Message::new();
        fields.insert("_site", "dc1");
        let reporter = Arc::new(Reporter::new(
            "collector01",
            "10.0.0.1",
            fields,
            Arc::new(EventBuffer::new(64)),
        ));
        let registry = Arc::new(ParserRegistry::with_builtins("collector01").unwrap());
        let transport = Arc::new(RecordingTransport::default());
        let (handle, _requests) = reconnect::channel(4);
        let input = InputFile {
            path: PathBuf::from("/var/log/apache2/access.log"),
            format: format.to_string(),
            read_all,
        };
        let worker = FileWorker::new(
            input,
            registry,
            reporter,
            DirectSender::new(transport.clone(), handle),
        );
        (worker, transport)
    }

    fn drain(reporter: &Reporter) -> Vec<Message> {
        std::iter::from_fn(|| reporter.buffer().try_dequeue())
            .map(|p| Message::from_json_slice(&p).unwrap())
            .collect()
    }

    #[tokio::test]
    async fn test_read_all_yields_every_line() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "first\r\nsecond\nthird").unwrap();
        file.flush().unwrap();

        let mut tail = FileTail::open(file.path(), true).await.unwrap();
        let mut lines = Vec::new();
        while let Some(line) = tail.next_line().await {
            lines.push(line.unwrap());
        }
        assert_eq!(lines, vec!["first", "second", "third"]);
    }

    #[tokio::test]
    async fn test_tail_skips_existing_content() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "old line").unwrap();
        file.flush().unwrap();

        let mut tail = FileTail::open(file.path(), false)
            .await
            .unwrap()
            .with_poll_interval(POLL);

        write!(file, "new ").unwrap();
        file.flush().unwrap();
        writeln!(file, "line").unwrap();
        file.flush().unwrap();

        let line = timeout(Duration::from_secs(2), tail.next_line())
            .await
            .expect("tail should see appended line")
            .unwrap()
            .unwrap();
        assert_eq!(line, "new line");
    }

    #[tokio::test]
    async fn test_tail_restarts_after_truncation() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        let mut tail = FileTail::open(file.path(), false)
            .await
            .unwrap()
            .with_poll_interval(POLL);

        writeln!(file, "a fairly long first line").unwrap();
        file.flush().unwrap();
        let first = timeout(Duration::from_secs(2), tail.next_line()).await.unwrap();
        assert_eq!(first.unwrap().unwrap(), "a fairly long first line");

        let handle = file.as_file_mut();
        handle.set_len(0).unwrap();
        handle.seek(std::io::SeekFrom::Start(0)).unwrap();
        writeln!(handle, "short").unwrap();
        handle.flush().unwrap();

        let next = timeout(Duration::from_secs(2), tail.next_line()).await.unwrap();
        assert_eq!(next.unwrap().unwrap(), "short");
    }

    #[tokio::test]
    async fn test_open_missing_file_fails() {
        let dir = tempfile::tempdir().unwrap();
        let result = FileTail::open(dir.path().join("absent.log"), false).await;
        assert!(matches!(result, Err(crate::error::Error::Io(_))));
    }

    #[tokio::test]
    async fn test_worker_buffers_parsed_lines() {
        let (worker, transport) = worker(FORMAT_COMBINED, false);
        let mut source = VecSource(VecDeque::from(vec![
            r#"127.0.0.1 - bob [10/Oct/2023:13:55:36 -0700] "GET /x HTTP/1.1" 200 512 "-" "curl/8.0""#,
            "   ",
            "garbage",
        ]));

        assert_eq!(worker.process(&mut source).await, 1);
        assert!(transport.sent.lock().unwrap().is_empty());

        let messages = drain(&worker.reporter);
        assert_eq!(messages.len(), 2);

        let parsed = &messages[0];
        assert_eq!(parsed.get_str("_user"), Some("bob"));
        assert_eq!(parsed.get("_http_status"), Some(&FieldValue::Int(200)));
        assert_eq!(parsed.get_str("_log_file"), Some("/var/log/apache2/access.log"));
        assert_eq!(parsed.get_str("_site"), Some("dc1"));

        let warning = &messages[1];
        assert_eq!(warning.get_str("_via_proto"), Some("internal_gelf"));
        assert_eq!(warning.get("level"), Some(&FieldValue::Int(4)));
        assert_eq!(warning.get_str("full_message"), Some("garbage"));
    }

    #[tokio::test]
    async fn test_read_all_worker_sends_directly() {
        let (worker, transport) = worker("text", true);
        let mut source = VecSource(VecDeque::from(vec!["one", "two"]));

        assert_eq!(worker.process(&mut source).await, 2);
        assert!(worker.reporter.buffer().is_empty());

        let sent = transport.sent.lock().unwrap();
        assert_eq!(sent.len(), 2);
        let first = Message::from_json_slice(&sent[0]).unwrap();
        assert_eq!(first.get_str("short_message"), Some("one"));
        assert_eq!(first.get_str("_original_format"), Some("PlainText"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_worker_resumes_after_read_error() {
        let (worker, _) = worker("text", false);
        let mut source = FailingOnceSource {
            failed: false,
            lines: VecDeque::from(vec!["after one", "after two"]),
        };

        let started = tokio::time::Instant::now();
        assert_eq!(worker.process(&mut source).await, 2);
        assert!(started.elapsed() >= FILE_REOPEN_INTERVAL);

        let messages = drain(&worker.reporter);
        assert_eq!(messages.len(), 3);
        assert!(messages[0]
            .get_str("short_message")
            .unwrap()
            .starts_with("Error reading /var/log/apache2/access.log"));
        assert_eq!(messages[1].get_str("short_message"), Some("after one"));
        assert_eq!(messages[2].get_str("short_message"), Some("after two"));
    }

    #[tokio::test]
    async fn test_tail_reopens_after_failure() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "kept").unwrap();
        file.flush().unwrap();

        let mut tail = FileTail::open(file.path(), false)
            .await
            .unwrap()
            .with_poll_interval(POLL);
        tail.failed = true;

        writeln!(file, "after reopen").unwrap();
        file.flush().unwrap();

        let line = timeout(Duration::from_secs(2), tail.next_line())
            .await
            .expect("reopened tail should see appended line")
            .unwrap()
            .unwrap();
        assert_eq!(line, "after reopen");
        assert!(!tail.failed);
    }

    #[tokio::test]
    async fn test_run_unknown_format_reports() {
        let (worker, _) = worker("no-such-format", false);
        let reporter = worker.reporter.clone();
        worker.run().await;

        let messages = drain(&reporter);
        assert_eq!(messages.len(), 1);
        assert!(messages[0]
            .get_str("short_message")
            .unwrap()
            .starts_with("Unknown format no-such-format"));
    }
}
