//! Server-sent-events plumbing shared by the provider decoders.
//!
//! Splits a raw byte stream into lines (on bytes, so multi-byte UTF-8 split
//! across network chunks survives), hands each line to a provider-specific
//! [`SseDecoder`] and re-emits the decoded [`CompletionEvent`]s as a
//! [`CompletionStream`].

use std::collections::VecDeque;
use std::fmt::Display;
use std::pin::Pin;

use futures::{Stream, StreamExt};

use crate::error::{AgentError, Result};
use crate::llm::types::{CompletionEvent, CompletionStream};

/// Provider-specific decoding of SSE lines into completion events.
pub trait SseDecoder: Send + 'static {
    /// Feed one line (without its trailing newline).
    fn feed_line(&mut self, line: &str) -> Result<Vec<CompletionEvent>>;

    /// Whether the provider signalled the end of the message.
    fn is_done(&self) -> bool;

    /// Flush anything still buffered once the stream is over.  Called exactly
    /// once, after [`is_done`](Self::is_done) turns true or the bytes run out.
    fn finish(&mut self) -> Result<Vec<CompletionEvent>>;
}

/// Turn a byte stream into a stream of completion events using `decoder`.
pub fn decode_stream<S, B, E, D>(bytes: S, decoder: D) -> CompletionStream
where
    S: Stream<Item = std::result::Result<B, E>> + Send + 'static,
    B: AsRef<[u8]> + Send + 'static,
    E: Display + Send + 'static,
    D: SseDecoder,
{
    let state = DecodeState {
        bytes: Box::pin(bytes),
        buffer: Vec::new(),
        decoder,
        pending: VecDeque::new(),
        finished: false,
    };

    Box::pin(futures::stream::unfold(state, |mut st| async move {
        loop {
            if let Some(item) = st.pending.pop_front() {
                return Some((item, st));
            }
            if st.finished {
                return None;
            }

            match st.bytes.next().await {
                Some(Ok(chunk)) => {
                    st.buffer.extend_from_slice(chunk.as_ref());
                    st.drain_lines();
                }
                Some(Err(e)) => st.fail(AgentError::LlmStreamError {
                    reason: format!("stream read error: {e}"),
                }),
                None => {
                    if !st.buffer.is_empty() {
                        let tail = std::mem::take(&mut st.buffer);
                        st.process_line(&tail);
                    }
                    if !st.finished {
                        st.complete();
                    }
                }
            }
        }
    }))
}

struct DecodeState<S, D> {
    bytes: Pin<Box<S>>,
    buffer: Vec<u8>,
    decoder: D,
    pending: VecDeque<Result<CompletionEvent>>,
    finished: bool,
}

impl<S, D: SseDecoder> DecodeState<S, D> {
    fn drain_lines(&mut self) {
        while !self.finished {
            let Some(newline) = self.buffer.iter().position(|b| *b == b'\n') else {
                break;
            };
            let line: Vec<u8> = self.buffer.drain(..=newline).collect();
            self.process_line(&line[..newline]);
        }
    }

    fn process_line(&mut self, raw: &[u8]) {
        let line = match std::str::from_utf8(raw) {
            Ok(line) => line.trim_end_matches('\r'),
            Err(e) => {
                self.fail(AgentError::LlmStreamError {
                    reason: format!("invalid UTF-8 in stream: {e}"),
                });
                return;
            }
        };

        match self.decoder.feed_line(line) {
            Ok(events) => self.pending.extend(events.into_iter().map(Ok)),
            Err(e) => {
                self.fail(e);
                return;
            }
        }

        if self.decoder.is_done() {
            self.complete();
        }
    }

    fn complete(&mut self) {
        self.finished = true;
        match self.decoder.finish() {
            Ok(events) => self.pending.extend(events.into_iter().map(Ok)),
            Err(e) => self.pending.push_back(Err(e)),
        }
    }

    fn fail(&mut self, error: AgentError) {
        self.finished = true;
        self.pending.push_back(Err(error));
    }
}
