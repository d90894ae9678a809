//! Stream framing and the decode loop shared by every adapter.
//!
//! Adapters hand a framed byte source and a [`FrameHandler`] to [`spawn_decode_loop`],
//! which runs on its own task and pushes normalized [`Chunk`]s into a bounded channel.
//! The caller reads them back as a [`ChunkStream`].

use std::collections::VecDeque;
use std::future::{Future, pending};
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;

use futures_core::Stream;
use futures_util::StreamExt;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::error::LLMError;
use crate::http::HttpBodyStream;
use crate::types::{Chunk, CompletionRequest, UsageAccumulator};

/// Number of chunks buffered between a decode loop and its consumer.
pub const CHUNK_CHANNEL_CAPACITY: usize = 8;

/// Stream of normalized chunks handed to callers.
///
/// At most one item is terminal (`Ok` with `is_terminal`) or an `Err`; nothing follows it.
pub type ChunkStream = Pin<Box<dyn Stream<Item = Result<Chunk, LLMError>> + Send>>;

/// Standardized SSE event yielded by [`StreamDecoder`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamEvent {
    /// Raw `data:` payload emitted by the provider.
    Data(String),
    /// Terminal marker reported via `[DONE]`.
    Done,
}

/// Normalizes provider SSE feeds into [`StreamEvent`] values.
///
/// Only `data:` fields are kept; `event:`, `id:` and `:` keep-alive comment lines are
/// dropped. Multi-line data fields are joined with `\n` as the SSE format requires.
pub struct StreamDecoder {
    body: HttpBodyStream,
    buffer: Vec<u8>,
    data_lines: Vec<Vec<u8>>,
    pending: VecDeque<Result<StreamEvent, LLMError>>,
    provider: &'static str,
    stream_closed: bool,
    done_received: bool,
}

impl StreamDecoder {
    /// Wraps a raw HTTP body stream and prepares it for SSE decoding.
    pub fn new(body: HttpBodyStream, provider: &'static str) -> Self {
        Self {
            body,
            buffer: Vec::new(),
            data_lines: Vec::new(),
            pending: VecDeque::new(),
            provider,
            stream_closed: false,
            done_received: false,
        }
    }

    fn handle_line(&mut self, line: Vec<u8>) {
        if let Some(rest) = line.strip_prefix(b"data:") {
            let data = rest.strip_prefix(b" ").unwrap_or(rest);
            self.data_lines.push(data.to_vec());
        }
    }

    fn flush_event(&mut self) -> Result<(), LLMError> {
        if self.data_lines.is_empty() {
            return Ok(());
        }

        let joined = self.data_lines.drain(..).collect::<Vec<_>>().join(&b'\n');
        if joined.iter().all(u8::is_ascii_whitespace) {
            return Ok(());
        }

        let data = String::from_utf8(joined).map_err(|err| {
            LLMError::decode(self.provider, format!("invalid UTF-8 in stream chunk: {err}"))
        })?;

        if data.trim() == "[DONE]" {
            if !self.done_received {
                self.done_received = true;
                self.pending.push_back(Ok(StreamEvent::Done));
            }
        } else {
            self.pending.push_back(Ok(StreamEvent::Data(data)));
        }

        Ok(())
    }
}

/// Splits the next `\n`-terminated line off the buffer, dropping the line ending.
fn drain_line(buffer: &mut Vec<u8>) -> Option<Vec<u8>> {
    buffer.iter().position(|b| *b == b'\n').map(|pos| {
        let mut line: Vec<u8> = buffer.drain(..=pos).collect();
        line.pop();
        if line.last() == Some(&b'\r') {
            line.pop();
        }
        line
    })
}

impl Stream for StreamDecoder {
    type Item = Result<StreamEvent, LLMError>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();

        if let Some(event) = this.pending.pop_front() {
            return Poll::Ready(Some(event));
        }

        if this.done_received {
            return Poll::Ready(None);
        }

        loop {
            if this.stream_closed {
                if !this.buffer.is_empty() {
                    let line = std::mem::take(&mut this.buffer);
                    this.handle_line(line);
                }
                if let Err(err) = this.flush_event() {
                    return Poll::Ready(Some(Err(err)));
                }
                return Poll::Ready(this.pending.pop_front());
            }

            match this.body.as_mut().poll_next(cx) {
                Poll::Ready(Some(Ok(bytes))) => {
                    this.buffer.extend_from_slice(&bytes);
                    while let Some(line) = drain_line(&mut this.buffer) {
                        if line.is_empty() {
                            if let Err(err) = this.flush_event() {
                                return Poll::Ready(Some(Err(err)));
                            }
                        } else {
                            this.handle_line(line);
                        }
                    }
                    if let Some(event) = this.pending.pop_front() {
                        return Poll::Ready(Some(event));
                    }
                }
                Poll::Ready(Some(Err(err))) => return Poll::Ready(Some(Err(err))),
                Poll::Ready(None) => this.stream_closed = true,
                Poll::Pending => return Poll::Pending,
            }
        }
    }
}

/// Splits a newline-delimited body into non-blank lines.
///
/// A trailing line without a final newline is still yielded once the body ends.
pub struct LineDecoder {
    body: HttpBodyStream,
    buffer: Vec<u8>,
    pending: VecDeque<String>,
    provider: &'static str,
    stream_closed: bool,
}

impl LineDecoder {
    pub fn new(body: HttpBodyStream, provider: &'static str) -> Self {
        Self {
            body,
            buffer: Vec::new(),
            pending: VecDeque::new(),
            provider,
            stream_closed: false,
        }
    }

    fn push_line(&mut self, line: Vec<u8>) -> Result<(), LLMError> {
        let text = String::from_utf8(line).map_err(|err| {
            LLMError::decode(self.provider, format!("invalid UTF-8 in stream line: {err}"))
        })?;
        let trimmed = text.trim();
        if !trimmed.is_empty() {
            self.pending.push_back(trimmed.to_string());
        }
        Ok(())
    }
}

impl Stream for LineDecoder {
    type Item = Result<String, LLMError>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();

        loop {
            if let Some(line) = this.pending.pop_front() {
                return Poll::Ready(Some(Ok(line)));
            }
            if this.stream_closed {
                if this.buffer.is_empty() {
                    return Poll::Ready(None);
                }
                let rest = std::mem::take(&mut this.buffer);
                if let Err(err) = this.push_line(rest) {
                    return Poll::Ready(Some(Err(err)));
                }
                continue;
            }

            match this.body.as_mut().poll_next(cx) {
                Poll::Ready(Some(Ok(bytes))) => {
                    this.buffer.extend_from_slice(&bytes);
                    while let Some(line) = drain_line(&mut this.buffer) {
                        if let Err(err) = this.push_line(line) {
                            return Poll::Ready(Some(Err(err)));
                        }
                    }
                }
                Poll::Ready(Some(Err(err))) => return Poll::Ready(Some(Err(err))),
                Poll::Ready(None) => this.stream_closed = true,
                Poll::Pending => return Poll::Pending,
            }
        }
    }
}

/// Cancellation and deadline signals attached to one call.
#[derive(Debug, Clone, Default)]
pub(crate) struct Interrupt {
    cancellation: Option<CancellationToken>,
    deadline: Option<Instant>,
}

impl Interrupt {
    /// Starts the request's deadline clock now.
    pub(crate) fn for_request(request: &CompletionRequest) -> Self {
        Self {
            cancellation: request.cancellation.clone(),
            deadline: request.deadline.map(|limit| Instant::now() + limit),
        }
    }

    /// Time left before the deadline, handed to the transport as its timeout.
    pub(crate) fn remaining(&self) -> Option<Duration> {
        self.deadline
            .map(|deadline| deadline.saturating_duration_since(Instant::now()))
    }

    /// Resolves with the abort error once the call is cancelled or its deadline passes.
    pub(crate) async fn triggered(&self) -> LLMError {
        let cancelled = async {
            match &self.cancellation {
                Some(token) => token.cancelled().await,
                None => pending::<()>().await,
            }
        };
        let expired = async {
            match self.deadline {
                Some(deadline) => tokio::time::sleep_until(deadline).await,
                None => pending::<()>().await,
            }
        };
        tokio::select! {
            _ = cancelled => LLMError::aborted("request cancelled"),
            _ = expired => LLMError::aborted("deadline exceeded"),
        }
    }

    /// Runs `future` unless the call is interrupted first.
    pub(crate) async fn guard<T, F>(&self, future: F) -> Result<T, LLMError>
    where
        F: Future<Output = Result<T, LLMError>>,
    {
        tokio::select! {
            biased;
            err = self.triggered() => Err(err),
            result = future => result,
        }
    }
}

/// What one framing unit contributed to the stream.
#[derive(Debug, Default, PartialEq, Eq)]
pub(crate) struct Decoded {
    pub(crate) text: Option<String>,
    pub(crate) done: bool,
}

impl Decoded {
    /// Pure metadata or noise: nothing is emitted.
    pub(crate) fn skip() -> Self {
        Self::default()
    }

    /// A text delta; empty strings are treated as no text.
    pub(crate) fn text(text: impl Into<String>) -> Self {
        let text = text.into();
        Self {
            text: (!text.is_empty()).then_some(text),
            done: false,
        }
    }

    pub(crate) fn done() -> Self {
        Self {
            text: None,
            done: true,
        }
    }

    pub(crate) fn finishing(mut self, done: bool) -> Self {
        self.done = self.done || done;
        self
    }

    fn into_chunk(self, provider: &'static str, usage: &UsageAccumulator) -> Option<Chunk> {
        match (self.text, self.done) {
            (text, true) => Some(Chunk::terminal(
                provider,
                text.unwrap_or_default(),
                usage.total(),
            )),
            (Some(text), false) => Some(Chunk::delta(provider, text, usage.snapshot())),
            (None, false) => None,
        }
    }
}

/// Provider-specific state machine driven by [`spawn_decode_loop`].
pub(crate) trait FrameHandler: Send + 'static {
    /// One framing unit: an SSE event, an NDJSON line or an iterator item.
    type Frame: Send + 'static;

    /// Interprets a frame, folding any usage counters into the handler's accumulator.
    fn handle(&mut self, frame: Self::Frame) -> Result<Decoded, LLMError>;

    /// Called when input ends. Anything but a done step is reported as
    /// [`LLMError::StreamClosed`].
    fn finish(&mut self) -> Result<Decoded, LLMError> {
        Ok(Decoded::skip())
    }

    fn usage(&self) -> &UsageAccumulator;
}

/// Default end-of-input behaviour for backends that send an explicit done signal.
pub(crate) fn closed_before_done(provider: &'static str) -> LLMError {
    LLMError::StreamClosed {
        message: format!("{provider} stream ended without a completion signal"),
    }
}

/// Spawns the producer task for one stream and returns its consumer side.
///
/// The task reads one frame at a time, stops after the first terminal chunk or error,
/// suspends while the channel is full, and exits as soon as the consumer is dropped.
/// Cancellation and deadline expiry end the stream with an [`LLMError::Aborted`] item.
pub(crate) fn spawn_decode_loop<S, H>(
    provider: &'static str,
    frames: S,
    handler: H,
    interrupt: Interrupt,
) -> ChunkStream
where
    S: Stream<Item = Result<H::Frame, LLMError>> + Send + 'static,
    H: FrameHandler,
{
    let (tx, rx) = mpsc::channel(CHUNK_CHANNEL_CAPACITY);
    tokio::spawn(run_decode_loop(provider, frames, handler, interrupt, tx));
    Box::pin(ChunkReceiver { rx })
}

async fn run_decode_loop<S, H>(
    provider: &'static str,
    frames: S,
    mut handler: H,
    interrupt: Interrupt,
    tx: mpsc::Sender<Result<Chunk, LLMError>>,
) where
    S: Stream<Item = Result<H::Frame, LLMError>> + Send + 'static,
    H: FrameHandler,
{
    let mut frames = Box::pin(frames);
    tracing::debug!(provider, "decode loop started");

    loop {
        let next = tokio::select! {
            biased;
            err = interrupt.triggered() => {
                tracing::debug!(provider, error = %err, "decode loop interrupted");
                emit(&tx, Err(err), &interrupt).await;
                return;
            }
            next = frames.next() => next,
        };

        let input_ended = next.is_none();
        let step = match next {
            Some(Ok(frame)) => handler.handle(frame),
            Some(Err(err)) => Err(err),
            None => handler.finish().and_then(|decoded| {
                if decoded.done {
                    Ok(decoded)
                } else {
                    Err(closed_before_done(provider))
                }
            }),
        };

        match step {
            Ok(decoded) => {
                if let Some(chunk) = decoded.into_chunk(provider, handler.usage()) {
                    let terminal = chunk.is_terminal;
                    if !emit(&tx, Ok(chunk), &interrupt).await {
                        return;
                    }
                    if terminal {
                        tracing::debug!(provider, "decode loop finished");
                        return;
                    }
                }
                if input_ended {
                    return;
                }
            }
            Err(err) => {
                tracing::warn!(provider, error = %err, "stream terminated with error");
                emit(&tx, Err(err), &interrupt).await;
                return;
            }
        }
    }
}

/// Sends one item, waiting for room in the channel.
///
/// Returns `false` when the stream must stop: the consumer went away, or the call was
/// interrupted while waiting, in which case the abort error replaces the pending item.
/// The abort error is only delivered when the channel has room; an idle consumer
/// never keeps the producer alive.
async fn emit(
    tx: &mpsc::Sender<Result<Chunk, LLMError>>,
    item: Result<Chunk, LLMError>,
    interrupt: &Interrupt,
) -> bool {
    let is_error = item.is_err();
    tokio::select! {
        biased;
        sent = tx.send(item) => sent.is_ok() && !is_error,
        err = interrupt.triggered() => {
            if tx.try_send(Err(err)).is_err() {
                tracing::debug!("abort item dropped, consumer is not reading");
            }
            false
        }
    }
}

struct ChunkReceiver {
    rx: mpsc::Receiver<Result<Chunk, LLMError>>,
}

impl Stream for ChunkReceiver {
    type Item = Result<Chunk, LLMError>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.get_mut().rx.poll_recv(cx)
    }
}
