//! Transport-noise interception.
//!
//! The wire transport library chatters on the raw console (session churn,
//! prekey uploads, receipt handling). Instead of patching global output
//! functions, the transport's internal logger is handed a [`ConsoleOutput`]
//! implementation; [`NoiseFilter`] wraps the real console, redirects matched
//! lines to a rotating file channel, and can be restored for clean shutdown.

use std::{
    fs::{self, File, OpenOptions},
    io::Write,
    path::PathBuf,
    sync::Mutex,
};

use chrono::Utc;

use crate::Result;

/// Raw four-severity console surface (log/error/warn/info).
pub trait ConsoleOutput: Send + Sync {
    fn log(&self, line: &str);
    fn error(&self, line: &str);
    fn warn(&self, line: &str);
    fn info(&self, line: &str);
}

/// Direct passthrough to the process stdio.
pub struct StdConsole;

impl ConsoleOutput for StdConsole {
    fn log(&self, line: &str) {
        println!("{line}");
    }

    fn error(&self, line: &str) {
        eprintln!("{line}");
    }

    fn warn(&self, line: &str) {
        eprintln!("{line}");
    }

    fn info(&self, line: &str) {
        println!("{line}");
    }
}

/// Substrings that mark a line as transport-internal verbose logging.
pub const NOISE_MARKERS: &[&str] = &[
    "Session",
    "prekey",
    "Closing",
    "Checking",
    "Recursive",
    "buffering",
    "recv",
    "msgRetryCounterMap",
    "decoding",
    "writing history",
    "read receipt",
    "presence",
    "encrypted",
    "identity",
    "ephemeral",
    "HandshakeMessage",
];

struct RotState {
    file: File,
    size: u64,
    seq: u64,
}

/// Append-only log file that rotates once it exceeds a size bound.
///
/// Rotation closes the current file only after the timestamped rename, so no
/// accepted write is ever lost across the boundary.
pub struct RotatingLogFile {
    path: PathBuf,
    max_bytes: u64,
    state: Mutex<RotState>,
}

impl RotatingLogFile {
    pub fn open(path: impl Into<PathBuf>, max_bytes: u64) -> Result<Self> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        let size = file.metadata()?.len();
        Ok(Self {
            path,
            max_bytes,
            state: Mutex::new(RotState { file, size, seq: 0 }),
        })
    }

    pub fn write_line(&self, line: &str) -> Result<()> {
        let mut st = self.lock();
        if st.size > self.max_bytes {
            self.rotate(&mut st)?;
        }
        writeln!(st.file, "{line}")?;
        st.size += line.len() as u64 + 1;
        Ok(())
    }

    /// Interval hook: rotate now if the file has grown past the bound.
    pub fn check_rotation(&self) -> Result<()> {
        let mut st = self.lock();
        if st.size > self.max_bytes {
            self.rotate(&mut st)?;
        }
        Ok(())
    }

    pub fn flush(&self) -> Result<()> {
        self.lock().file.flush()?;
        Ok(())
    }

    fn rotate(&self, st: &mut RotState) -> Result<()> {
        st.file.flush()?;

        let stem = self
            .path
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("verbose");
        // The sequence number keeps names unique (and lexically ordered) even
        // when several rotations land in the same millisecond.
        let ts = Utc::now().format("%Y-%m-%dT%H-%M-%S%.3fZ");
        let rotated = self
            .path
            .with_file_name(format!("{stem}-{ts}-{:04}.log", st.seq));
        st.seq += 1;
        fs::rename(&self.path, &rotated)?;

        st.file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        st.size = 0;
        Ok(())
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, RotState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Classifying wrapper around a [`ConsoleOutput`].
///
/// Matched lines go to the rotating channel tagged with severity and
/// timestamp and never reach the wrapped console; everything else passes
/// through unchanged. [`NoiseFilter::restore`] closes the channel and turns
/// the filter into a pure passthrough.
pub struct NoiseFilter {
    markers: Vec<String>,
    channel: Mutex<Option<RotatingLogFile>>,
    inner: Box<dyn ConsoleOutput>,
}

impl NoiseFilter {
    pub fn install(inner: Box<dyn ConsoleOutput>, channel: RotatingLogFile) -> Self {
        Self::with_markers(inner, channel, NOISE_MARKERS.iter().map(|s| s.to_string()))
    }

    pub fn with_markers(
        inner: Box<dyn ConsoleOutput>,
        channel: RotatingLogFile,
        markers: impl IntoIterator<Item = String>,
    ) -> Self {
        Self {
            markers: markers.into_iter().collect(),
            channel: Mutex::new(Some(channel)),
            inner,
        }
    }

    fn is_noise(&self, line: &str) -> bool {
        self.markers.iter().any(|m| line.contains(m.as_str()))
    }

    fn dispatch(&self, severity: &str, line: &str, passthrough: impl FnOnce(&str)) {
        if self.is_noise(line) {
            let guard = self.channel.lock().unwrap_or_else(|e| e.into_inner());
            if let Some(channel) = guard.as_ref() {
                let ts = Utc::now().to_rfc3339();
                let _ = channel.write_line(&format!("[{ts}] [{severity}] {line}"));
                return;
            }
        }
        passthrough(line);
    }

    pub fn check_rotation(&self) -> Result<()> {
        let guard = self.channel.lock().unwrap_or_else(|e| e.into_inner());
        match guard.as_ref() {
            Some(channel) => channel.check_rotation(),
            None => Ok(()),
        }
    }

    /// Return to pre-interception behavior and flush/close the channel.
    ///
    /// Must run before process exit (including on interrupt signals).
    pub fn restore(&self) -> Result<()> {
        let mut guard = self.channel.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(channel) = guard.take() {
            channel.flush()?;
        }
        Ok(())
    }
}

impl ConsoleOutput for NoiseFilter {
    fn log(&self, line: &str) {
        self.dispatch("LOG", line, |l| self.inner.log(l));
    }

    fn error(&self, line: &str) {
        self.dispatch("ERROR", line, |l| self.inner.error(l));
    }

    fn warn(&self, line: &str) {
        self.dispatch("WARN", line, |l| self.inner.warn(l));
    }

    fn info(&self, line: &str) {
        self.dispatch("INFO", line, |l| self.inner.info(l));
    }
}

impl std::fmt::Debug for NoiseFilter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NoiseFilter")
            .field("markers", &self.markers.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    fn tmp_dir(prefix: &str) -> PathBuf {
        let ts = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or(Duration::from_secs(0))
            .as_nanos();
        let pid = std::process::id();
        let dir = PathBuf::from(format!("/tmp/{prefix}-{pid}-{ts}"));
        fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[derive(Default)]
    struct RecordingConsole {
        lines: Mutex<Vec<(String, String)>>,
    }

    impl RecordingConsole {
        fn seen(&self) -> Vec<(String, String)> {
            self.lines.lock().unwrap().clone()
        }

        fn push(&self, sev: &str, line: &str) {
            self.lines
                .lock()
                .unwrap()
                .push((sev.to_string(), line.to_string()));
        }
    }

    impl ConsoleOutput for Arc<RecordingConsole> {
        fn log(&self, line: &str) {
            self.push("log", line);
        }
        fn error(&self, line: &str) {
            self.push("error", line);
        }
        fn warn(&self, line: &str) {
            self.push("warn", line);
        }
        fn info(&self, line: &str) {
            self.push("info", line);
        }
    }

    fn filter_with(dir: &PathBuf, max_bytes: u64) -> (NoiseFilter, Arc<RecordingConsole>) {
        let console = Arc::new(RecordingConsole::default());
        let channel = RotatingLogFile::open(dir.join("verbose.log"), max_bytes).unwrap();
        let filter = NoiseFilter::install(Box::new(console.clone()), channel);
        (filter, console)
    }

    #[test]
    fn prekey_lines_are_redirected_and_never_reach_console() {
        let dir = tmp_dir("wab-noise");
        let (filter, console) = filter_with(&dir, 10 * 1024 * 1024);

        filter.log("uploading prekey bundle 17");
        filter.info("bot ready");

        assert_eq!(console.seen(), vec![("info".to_string(), "bot ready".to_string())]);

        let written = fs::read_to_string(dir.join("verbose.log")).unwrap();
        assert!(written.contains("[LOG] uploading prekey bundle 17"));
        assert!(!written.contains("bot ready"));
    }

    #[test]
    fn severity_tag_tracks_original_console_function() {
        let dir = tmp_dir("wab-noise-sev");
        let (filter, _console) = filter_with(&dir, 10 * 1024 * 1024);

        filter.error("Closing open session in favor of incoming");
        filter.warn("decoding failed, retrying");

        let written = fs::read_to_string(dir.join("verbose.log")).unwrap();
        assert!(written.contains("[ERROR] Closing open session"));
        assert!(written.contains("[WARN] decoding failed"));
    }

    #[test]
    fn restore_returns_passthrough_and_closes_channel() {
        let dir = tmp_dir("wab-noise-restore");
        let (filter, console) = filter_with(&dir, 10 * 1024 * 1024);

        filter.log("prekey one");
        filter.restore().unwrap();
        filter.log("prekey two");

        // After restore, even matched lines pass through.
        assert_eq!(console.seen(), vec![("log".to_string(), "prekey two".to_string())]);

        let written = fs::read_to_string(dir.join("verbose.log")).unwrap();
        assert!(written.contains("prekey one"));
        assert!(!written.contains("prekey two"));
    }

    #[test]
    fn rotation_renames_then_reopens_without_losing_bytes() {
        let dir = tmp_dir("wab-rot");
        let channel = RotatingLogFile::open(dir.join("verbose.log"), 64).unwrap();

        let mut expected = String::new();
        for i in 0..12 {
            let line = format!("line-{i:02} aaaaaaaaaaaaaaaa");
            channel.write_line(&line).unwrap();
            expected.push_str(&line);
            expected.push('\n');
        }
        channel.flush().unwrap();

        let mut rotated: Vec<PathBuf> = fs::read_dir(&dir)
            .unwrap()
            .filter_map(|e| e.ok().map(|e| e.path()))
            .filter(|p| {
                let name = p.file_name().unwrap().to_string_lossy().to_string();
                name.starts_with("verbose-") && name.ends_with(".log")
            })
            .collect();
        rotated.sort();
        assert!(!rotated.is_empty(), "expected at least one rotated file");

        let mut all = String::new();
        for p in &rotated {
            all.push_str(&fs::read_to_string(p).unwrap());
        }
        all.push_str(&fs::read_to_string(dir.join("verbose.log")).unwrap());
        assert_eq!(all, expected);
    }

    #[test]
    fn unmatched_lines_pass_through_unchanged() {
        let dir = tmp_dir("wab-noise-pass");
        let (filter, console) = filter_with(&dir, 10 * 1024 * 1024);

        filter.log("hello world");
        filter.error("real failure");

        assert_eq!(
            console.seen(),
            vec![
                ("log".to_string(), "hello world".to_string()),
                ("error".to_string(), "real failure".to_string()),
            ]
        );
        let written = fs::read_to_string(dir.join("verbose.log")).unwrap();
        assert!(written.is_empty());
    }
}
