//! Subprocess sessions speaking the line protocol.

use anyhow::{Context, Result};
use std::ffi::OsString;
use std::io::{BufRead, BufReader, ErrorKind, Read, Write};
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};
use tracing::{debug, warn};

/// Request that ends a session.
pub const EXIT_REQUEST: &str = "(exit)";

/// One strictly request/response conversation with the optimizer.
pub trait Session: Send {
    /// Write one request line and flush it.
    fn send(&mut self, request: &str) -> Result<()>;

    /// Read one response line without its terminator; `None` once output ends.
    fn read_line(&mut self) -> Result<Option<String>>;

    /// Send `(exit)`, drain whatever output remains, and release the session.
    /// Returns the drained output.
    fn close(self: Box<Self>) -> Result<String>;
}

/// Opens sessions configured for a platform.
pub trait SessionLauncher: Send + Sync {
    fn open(&self, platform: &str) -> Result<Box<dyn Session>>;
}

/// Launches `<program> <args...> --platform <platform>` with piped stdio.
#[derive(Debug, Clone)]
pub struct ProcessLauncher {
    program: OsString,
    args: Vec<OsString>,
}

impl ProcessLauncher {
    pub fn new(program: impl Into<OsString>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
        }
    }

    pub fn arg(mut self, arg: impl Into<OsString>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<OsString>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }
}

impl SessionLauncher for ProcessLauncher {
    fn open(&self, platform: &str) -> Result<Box<dyn Session>> {
        let mut child = Command::new(&self.program)
            .args(&self.args)
            .arg("--platform")
            .arg(platform)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .spawn()
            .with_context(|| format!("failed to launch optimizer {:?}", self.program))?;

        let stdin = child.stdin.take().context("optimizer stdin unavailable")?;
        let stdout = child.stdout.take().context("optimizer stdout unavailable")?;
        debug!(platform, pid = child.id(), "opened optimizer session");

        Ok(Box::new(ProcessSession {
            child,
            stdin: Some(stdin),
            stdout: BufReader::new(stdout),
            closed: false,
        }))
    }
}

struct ProcessSession {
    child: Child,
    stdin: Option<ChildStdin>,
    stdout: BufReader<ChildStdout>,
    closed: bool,
}

impl ProcessSession {
    fn shutdown(&mut self) -> Result<String> {
        self.closed = true;
        if let Some(mut stdin) = self.stdin.take() {
            let sent = writeln!(stdin, "{}", EXIT_REQUEST).and_then(|_| stdin.flush());
            match sent {
                // the optimizer may already have exited on its own
                Err(e) if e.kind() == ErrorKind::BrokenPipe => {}
                other => other.context("sending exit request")?,
            }
        }

        let mut rest = String::new();
        self.stdout
            .read_to_string(&mut rest)
            .context("draining optimizer output")?;

        let status = self.child.wait().context("waiting for optimizer")?;
        if !status.success() {
            warn!(%status, "optimizer exited unsuccessfully");
        }
        Ok(rest)
    }
}

impl Session for ProcessSession {
    fn send(&mut self, request: &str) -> Result<()> {
        let stdin = self
            .stdin
            .as_mut()
            .context("optimizer session already closed")?;
        writeln!(stdin, "{}", request).context("writing optimizer request")?;
        stdin.flush().context("flushing optimizer request")?;
        Ok(())
    }

    fn read_line(&mut self) -> Result<Option<String>> {
        let mut line = String::new();
        let read = self
            .stdout
            .read_line(&mut line)
            .context("reading optimizer response")?;
        if read == 0 {
            return Ok(None);
        }
        Ok(Some(line.trim_end_matches(&['\n', '\r'][..]).to_string()))
    }

    fn close(mut self: Box<Self>) -> Result<String> {
        self.shutdown()
    }
}

impl Drop for ProcessSession {
    fn drop(&mut self) {
        if self.closed {
            return;
        }
        if let Err(e) = self.shutdown() {
            warn!(error = %e, "optimizer session teardown failed; killing process");
            let _ = self.child.kill();
            let _ = self.child.wait();
        }
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    #[test]
    fn process_session_round_trip() -> Result<()> {
        // `cat` echoes each request and exits once stdin closes.
        let launcher = ProcessLauncher::new("sh").args(["-c", "cat"]);
        let mut session = launcher.open("python")?;
        session.send("(cost x)")?;
        assert_eq!(session.read_line()?.as_deref(), Some("(cost x)"));
        let rest = session.close()?;
        assert_eq!(rest.trim(), EXIT_REQUEST);
        Ok(())
    }

    #[test]
    fn launcher_passes_platform_flag() -> Result<()> {
        let launcher = ProcessLauncher::new("sh").args(["-c", "echo \"$@\"", "sh"]);
        let mut session = launcher.open("c")?;
        assert_eq!(session.read_line()?.as_deref(), Some("--platform c"));
        session.close()?;
        Ok(())
    }

    #[test]
    fn missing_program_is_an_error() {
        let launcher = ProcessLauncher::new("/nonexistent/optimizer-binary");
        assert!(launcher.open("python").is_err());
    }
}
