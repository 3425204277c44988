//! Scripted in-memory collaborators for unit tests.

use std::collections::{HashSet, VecDeque};
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::StreamExt;
use futures_util::stream::{self, BoxStream};
use tokio_util::sync::CancellationToken;

use crate::process::{ExitInfo, ProcessClient, ProcessError, ProcessHandle};
use crate::sink::{AppendError, CreateError, LogDestination, LogEvent, SequenceToken, SinkClient};

struct AppendCall {
    token: Option<SequenceToken>,
    events: Vec<LogEvent>,
}

#[derive(Default)]
pub struct FakeSink {
    groups: Mutex<HashSet<String>>,
    streams: Mutex<HashSet<(String, String)>>,
    unreachable: bool,
    create_calls: AtomicUsize,
    responses: Mutex<VecDeque<Result<Option<SequenceToken>, AppendError>>>,
    appends: Mutex<Vec<AppendCall>>,
}

impl FakeSink {
    pub fn with_group(self, group: &str) -> Self {
        self.groups.lock().unwrap().insert(group.to_string());
        self
    }

    pub fn unreachable(mut self) -> Self {
        self.unreachable = true;
        self
    }

    pub fn with_tokens<const N: usize>(self, tokens: [&str; N]) -> Self {
        self.with_responses(
            tokens
                .into_iter()
                .map(|t| Ok(Some(SequenceToken::new(t))))
                .collect(),
        )
    }

    pub fn with_responses(self, responses: Vec<Result<Option<SequenceToken>, AppendError>>) -> Self {
        *self.responses.lock().unwrap() = responses.into();
        self
    }

    pub fn has_group(&self, group: &str) -> bool {
        self.groups.lock().unwrap().contains(group)
    }

    pub fn has_stream(&self, group: &str, stream: &str) -> bool {
        self.streams
            .lock()
            .unwrap()
            .contains(&(group.to_string(), stream.to_string()))
    }

    pub fn create_calls(&self) -> usize {
        self.create_calls.load(Ordering::SeqCst)
    }

    pub fn append_calls(&self) -> usize {
        self.appends.lock().unwrap().len()
    }

    pub fn tokens_sent(&self) -> Vec<Option<SequenceToken>> {
        self.appends
            .lock()
            .unwrap()
            .iter()
            .map(|call| call.token.clone())
            .collect()
    }

    pub fn messages(&self) -> Vec<String> {
        self.appends
            .lock()
            .unwrap()
            .iter()
            .flat_map(|call| call.events.iter().map(|e| e.message.clone()))
            .collect()
    }

    pub fn timestamps(&self) -> Vec<i64> {
        self.appends
            .lock()
            .unwrap()
            .iter()
            .flat_map(|call| call.events.iter().map(|e| e.timestamp_ms))
            .collect()
    }
}

#[async_trait]
impl SinkClient for FakeSink {
    async fn create_group(&self, name: &str) -> Result<(), CreateError> {
        self.create_calls.fetch_add(1, Ordering::SeqCst);
        if self.unreachable {
            return Err(CreateError::Fatal("endpoint unreachable".to_string()));
        }
        if self.groups.lock().unwrap().insert(name.to_string()) {
            Ok(())
        } else {
            Err(CreateError::AlreadyExists)
        }
    }

    async fn create_stream(&self, group: &str, name: &str) -> Result<(), CreateError> {
        self.create_calls.fetch_add(1, Ordering::SeqCst);
        if self.unreachable {
            return Err(CreateError::Fatal("endpoint unreachable".to_string()));
        }
        if self
            .streams
            .lock()
            .unwrap()
            .insert((group.to_string(), name.to_string()))
        {
            Ok(())
        } else {
            Err(CreateError::AlreadyExists)
        }
    }

    async fn append(
        &self,
        _destination: &LogDestination,
        events: Vec<LogEvent>,
        token: Option<&SequenceToken>,
    ) -> Result<Option<SequenceToken>, AppendError> {
        let mut appends = self.appends.lock().unwrap();
        appends.push(AppendCall {
            token: token.cloned(),
            events,
        });
        let n = appends.len();
        self.responses
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Ok(Some(SequenceToken::new(format!("t{n}")))))
    }
}

/// What the fake runtime does once the scripted chunks run out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamEnd {
    Close,
    Hang,
}

pub struct FakeProcess {
    run_result: Mutex<Option<Result<ProcessHandle, ProcessError>>>,
    chunks: Mutex<Vec<Result<Bytes, ProcessError>>>,
    stream_end: StreamEnd,
    cancel_after: Option<(usize, CancellationToken)>,
    wait_result: Mutex<Option<Result<ExitInfo, ProcessError>>>,
    remove_fails: bool,
    run_calls: AtomicUsize,
    wait_calls: AtomicUsize,
    remove_calls: AtomicUsize,
}

impl Default for FakeProcess {
    fn default() -> Self {
        Self {
            run_result: Mutex::new(Some(Ok(ProcessHandle::new("c0ffee")))),
            chunks: Mutex::new(Vec::new()),
            stream_end: StreamEnd::Close,
            cancel_after: None,
            wait_result: Mutex::new(Some(Ok(ExitInfo { status_code: 0 }))),
            remove_fails: false,
            run_calls: AtomicUsize::new(0),
            wait_calls: AtomicUsize::new(0),
            remove_calls: AtomicUsize::new(0),
        }
    }
}

impl FakeProcess {
    pub fn with_lines(self, lines: &[&str]) -> Self {
        *self.chunks.lock().unwrap() = lines
            .iter()
            .map(|l| Ok(Bytes::from(format!("{l}\n"))))
            .collect();
        self
    }

    pub fn with_chunks(self, chunks: Vec<Result<Bytes, ProcessError>>) -> Self {
        *self.chunks.lock().unwrap() = chunks;
        self
    }

    pub fn with_run_result(self, result: Result<ProcessHandle, ProcessError>) -> Self {
        *self.run_result.lock().unwrap() = Some(result);
        self
    }

    pub fn with_wait_result(self, result: Result<ExitInfo, ProcessError>) -> Self {
        *self.wait_result.lock().unwrap() = Some(result);
        self
    }

    pub fn hanging(mut self) -> Self {
        self.stream_end = StreamEnd::Hang;
        self
    }

    /// Cancels `token` as soon as `n` chunks have been handed out.
    pub fn cancel_after(mut self, n: usize, token: CancellationToken) -> Self {
        self.cancel_after = Some((n, token));
        self
    }

    pub fn failing_remove(mut self) -> Self {
        self.remove_fails = true;
        self
    }

    pub fn run_calls(&self) -> usize {
        self.run_calls.load(Ordering::SeqCst)
    }

    pub fn wait_calls(&self) -> usize {
        self.wait_calls.load(Ordering::SeqCst)
    }

    pub fn remove_calls(&self) -> usize {
        self.remove_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ProcessClient for FakeProcess {
    async fn run(&self, _image: &str, _command: &str) -> Result<ProcessHandle, ProcessError> {
        self.run_calls.fetch_add(1, Ordering::SeqCst);
        self.run_result
            .lock()
            .unwrap()
            .take()
            .unwrap_or_else(|| Err(ProcessError::Transport("already started".to_string())))
    }

    fn output_stream<'a>(
        &'a self,
        _handle: &'a ProcessHandle,
    ) -> BoxStream<'a, Result<Bytes, ProcessError>> {
        let chunks = std::mem::take(&mut *self.chunks.lock().unwrap());
        let cancel_after = self.cancel_after.clone();
        let scripted = stream::iter(chunks.into_iter().enumerate().map(move |(i, chunk)| {
            if let Some((n, token)) = &cancel_after {
                if i + 1 == *n {
                    token.cancel();
                }
            }
            chunk
        }));
        match self.stream_end {
            StreamEnd::Close => scripted.boxed(),
            StreamEnd::Hang => scripted.chain(stream::pending()).boxed(),
        }
    }

    async fn wait(&self, _handle: &ProcessHandle) -> Result<ExitInfo, ProcessError> {
        self.wait_calls.fetch_add(1, Ordering::SeqCst);
        self.wait_result
            .lock()
            .unwrap()
            .take()
            .unwrap_or_else(|| Err(ProcessError::Transport("already waited".to_string())))
    }

    async fn remove(&self, _handle: &ProcessHandle) -> Result<(), ProcessError> {
        self.remove_calls.fetch_add(1, Ordering::SeqCst);
        if self.remove_fails {
            return Err(ProcessError::Transport("daemon went away".to_string()));
        }
        Ok(())
    }
}
