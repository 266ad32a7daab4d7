//! Host I/O seams for the effect runtime.
//!
//! The evaluator never touches stdout, stdin, or the filesystem directly;
//! it goes through these traits so hosts and tests can capture, replay, or
//! deny I/O. `StdPrint` writes to the process stdout, `CollectStringPrint`
//! captures output for tests, `NoPrint` swallows it.

use std::io::{BufRead, Write as _};

/// Output sink for the `IO` effect's print operations.
pub trait PrintWriter {
    /// Writes one already-formatted chunk, without adding a newline.
    fn stdout_write(&mut self, output: &str);

    /// Writes a single terminator character (usually `\n`).
    fn stdout_push(&mut self, end: char);
}

/// Default writer: process stdout, flushed per line.
#[derive(Debug, Default)]
pub struct StdPrint;

impl PrintWriter for StdPrint {
    fn stdout_write(&mut self, output: &str) {
        let mut stdout = std::io::stdout().lock();
        let _ = stdout.write_all(output.as_bytes());
    }

    fn stdout_push(&mut self, end: char) {
        let mut stdout = std::io::stdout().lock();
        let mut buffer = [0u8; 4];
        let _ = stdout.write_all(end.encode_utf8(&mut buffer).as_bytes());
        if end == '\n' {
            let _ = stdout.flush();
        }
    }
}

/// Collects all output into a string. Useful for tests and for capturing
/// program output programmatically.
#[derive(Debug, Default)]
pub struct CollectStringPrint(String);

impl CollectStringPrint {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn output(&self) -> &str {
        &self.0
    }

    #[must_use]
    pub fn into_output(self) -> String {
        self.0
    }
}

impl PrintWriter for CollectStringPrint {
    fn stdout_write(&mut self, output: &str) {
        self.0.push_str(output);
    }

    fn stdout_push(&mut self, end: char) {
        self.0.push(end);
    }
}

/// Ignores all output.
#[derive(Debug, Default)]
pub struct NoPrint;

impl PrintWriter for NoPrint {
    fn stdout_write(&mut self, _output: &str) {}

    fn stdout_push(&mut self, _end: char) {}
}

/// Input source for `readLine`.
pub trait InputReader {
    /// Reads one line, without its trailing newline. `None` on EOF.
    fn read_line(&mut self) -> Option<String>;
}

/// Reads from process stdin.
#[derive(Debug, Default)]
pub struct StdInput;

impl InputReader for StdInput {
    fn read_line(&mut self) -> Option<String> {
        let mut line = String::new();
        let stdin = std::io::stdin();
        match stdin.lock().read_line(&mut line) {
            Ok(0) | Err(_) => None,
            Ok(_) => {
                while line.ends_with('\n') || line.ends_with('\r') {
                    line.pop();
                }
                Some(line)
            }
        }
    }
}

/// Serves pre-queued lines; `None` when exhausted.
#[derive(Debug, Default)]
pub struct QueueInput {
    lines: std::collections::VecDeque<String>,
}

impl QueueInput {
    #[must_use]
    pub fn new(lines: impl IntoIterator<Item = String>) -> Self {
        Self {
            lines: lines.into_iter().collect(),
        }
    }
}

impl InputReader for QueueInput {
    fn read_line(&mut self) -> Option<String> {
        self.lines.pop_front()
    }
}

/// Filesystem seam for the `FS` effect.
pub trait FileSystem {
    fn read(&mut self, path: &std::path::Path) -> Result<String, String>;
    fn write(&mut self, path: &std::path::Path, contents: &str) -> Result<(), String>;
    fn exists(&mut self, path: &std::path::Path) -> bool;
}

/// The real filesystem.
#[derive(Debug, Default)]
pub struct RealFs;

impl FileSystem for RealFs {
    fn read(&mut self, path: &std::path::Path) -> Result<String, String> {
        std::fs::read_to_string(path).map_err(|e| e.to_string())
    }

    fn write(&mut self, path: &std::path::Path, contents: &str) -> Result<(), String> {
        std::fs::write(path, contents).map_err(|e| e.to_string())
    }

    fn exists(&mut self, path: &std::path::Path) -> bool {
        path.exists()
    }
}

/// In-memory filesystem that records every call, so tests can assert that
/// a denied operation never reached the filesystem at all.
#[derive(Debug, Default)]
pub struct MockFs {
    pub files: std::collections::BTreeMap<String, String>,
    pub calls: Vec<String>,
}

impl MockFs {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_file(mut self, path: &str, contents: &str) -> Self {
        self.files.insert(path.to_owned(), contents.to_owned());
        self
    }
}

impl FileSystem for MockFs {
    fn read(&mut self, path: &std::path::Path) -> Result<String, String> {
        let key = path.to_string_lossy().into_owned();
        self.calls.push(format!("read {key}"));
        self.files.get(&key).cloned().ok_or_else(|| format!("{key}: not found"))
    }

    fn write(&mut self, path: &std::path::Path, contents: &str) -> Result<(), String> {
        let key = path.to_string_lossy().into_owned();
        self.calls.push(format!("write {key}"));
        self.files.insert(key, contents.to_owned());
        Ok(())
    }

    fn exists(&mut self, path: &std::path::Path) -> bool {
        let key = path.to_string_lossy().into_owned();
        self.calls.push(format!("exists {key}"));
        self.files.contains_key(&key)
    }
}

/// HTTP seam for the `Net` effect. The core ships no real client; hosts
/// plug one in, and the default refuses with a clear message.
pub trait HttpClient {
    fn get(&mut self, url: &str) -> Result<String, String>;
}

/// Default client: refuses every request.
#[derive(Debug, Default)]
pub struct NoHttp;

impl HttpClient for NoHttp {
    fn get(&mut self, url: &str) -> Result<String, String> {
        Err(format!("no HTTP client configured for `{url}`"))
    }
}

/// Canned responses by URL, for tests.
#[derive(Debug, Default)]
pub struct MockHttp {
    pub responses: std::collections::BTreeMap<String, String>,
    pub calls: Vec<String>,
}

impl HttpClient for MockHttp {
    fn get(&mut self, url: &str) -> Result<String, String> {
        self.calls.push(url.to_owned());
        self.responses.get(url).cloned().ok_or_else(|| format!("{url}: no response"))
    }
}
