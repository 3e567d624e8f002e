//! In-process stand-in for the optimizer, for tests and offline replay.
//!
//! A [`ScriptedLauncher`] answers every request with the lines returned by a
//! handler closure and keeps a transcript of what was sent.

use crate::session::{Session, SessionLauncher, EXIT_REQUEST};
use anyhow::Result;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

type Handler = dyn Fn(&str, &str) -> Result<Vec<String>> + Send + Sync;

/// One request as seen by the scripted optimizer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Exchange {
    pub session: usize,
    pub platform: String,
    pub request: String,
}

#[derive(Clone)]
pub struct ScriptedLauncher {
    handler: Arc<Handler>,
    transcript: Arc<Mutex<Vec<Exchange>>>,
    sessions: Arc<AtomicUsize>,
}

impl ScriptedLauncher {
    /// `handler(platform, request)` returns the response lines for `request`.
    /// It is not consulted for `(exit)`.
    pub fn new<F>(handler: F) -> Self
    where
        F: Fn(&str, &str) -> Result<Vec<String>> + Send + Sync + 'static,
    {
        Self {
            handler: Arc::new(handler),
            transcript: Arc::new(Mutex::new(Vec::new())),
            sessions: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn requests(&self) -> Vec<Exchange> {
        self.transcript.lock().clone()
    }

    /// Number of requests whose command is `command`, e.g. `"sample"`.
    pub fn count(&self, command: &str) -> usize {
        let prefix = format!("({} ", command);
        self.transcript
            .lock()
            .iter()
            .filter(|exchange| exchange.request.starts_with(&prefix))
            .count()
    }

    pub fn sessions_opened(&self) -> usize {
        self.sessions.load(Ordering::SeqCst)
    }
}

impl SessionLauncher for ScriptedLauncher {
    fn open(&self, platform: &str) -> Result<Box<dyn Session>> {
        let id = self.sessions.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(ScriptedSession {
            id,
            platform: platform.to_string(),
            handler: Arc::clone(&self.handler),
            transcript: Arc::clone(&self.transcript),
            pending: VecDeque::new(),
        }))
    }
}

struct ScriptedSession {
    id: usize,
    platform: String,
    handler: Arc<Handler>,
    transcript: Arc<Mutex<Vec<Exchange>>>,
    pending: VecDeque<String>,
}

impl ScriptedSession {
    fn record(&self, request: &str) {
        self.transcript.lock().push(Exchange {
            session: self.id,
            platform: self.platform.clone(),
            request: request.to_string(),
        });
    }
}

impl Session for ScriptedSession {
    fn send(&mut self, request: &str) -> Result<()> {
        self.record(request);
        let lines = (self.handler)(&self.platform, request)?;
        self.pending.extend(lines);
        Ok(())
    }

    fn read_line(&mut self) -> Result<Option<String>> {
        Ok(self.pending.pop_front())
    }

    fn close(mut self: Box<Self>) -> Result<String> {
        self.record(EXIT_REQUEST);
        let rest: Vec<String> = self.pending.drain(..).collect();
        Ok(rest.join("\n"))
    }
}
