//! Scripted instrument channel for exercising the controller without hardware.
//!
//! Every channel built from the same [`Transcript`] appends to one shared,
//! ordered command log, so cross-instrument ordering (e.g. "source zeroed
//! before the generator steps") can be asserted directly. Replies are queued
//! per query string and consumed in order.

use std::cell::RefCell;
use std::collections::{HashMap, VecDeque};
use std::rc::Rc;

use crate::channel::InstrumentChannel;
use crate::error::{Result, SweepError};

/// One command as seen on the bus.
#[derive(Debug, Clone, PartialEq)]
pub struct Command {
    pub channel: String,
    pub text: String,
}

/// Shared, ordered log of every command written by a set of mock channels.
#[derive(Debug, Clone, Default)]
pub struct Transcript(Rc<RefCell<Vec<Command>>>);

impl Transcript {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.0.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.borrow().is_empty()
    }

    pub fn commands(&self) -> Vec<Command> {
        self.0.borrow().clone()
    }

    /// Commands written to one channel, in order.
    pub fn sent_to(&self, channel: &str) -> Vec<String> {
        self.0
            .borrow()
            .iter()
            .filter(|c| c.channel == channel)
            .map(|c| c.text.clone())
            .collect()
    }

    /// Global positions of every occurrence of `text` on `channel`.
    pub fn positions(&self, channel: &str, text: &str) -> Vec<usize> {
        self.0
            .borrow()
            .iter()
            .enumerate()
            .filter(|(_, c)| c.channel == channel && c.text == text)
            .map(|(i, _)| i)
            .collect()
    }

    fn push(&self, channel: &str, text: &str) {
        self.0.borrow_mut().push(Command {
            channel: channel.to_string(),
            text: text.to_string(),
        });
    }
}

pub struct MockChannel {
    name: String,
    transcript: Transcript,
    replies: HashMap<String, VecDeque<String>>,
    pending: Option<String>,
    failing: Vec<String>,
}

impl MockChannel {
    pub fn new(name: &str, transcript: &Transcript) -> Self {
        Self {
            name: name.to_string(),
            transcript: transcript.clone(),
            replies: HashMap::new(),
            pending: None,
            failing: Vec::new(),
        }
    }

    /// Queue replies for an exact query string.
    pub fn reply_to<I, S>(mut self, query: &str, replies: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.replies
            .entry(query.to_string())
            .or_default()
            .extend(replies.into_iter().map(Into::into));
        self
    }

    /// Make every write starting with `prefix` fail.
    pub fn fail_on(mut self, prefix: &str) -> Self {
        self.failing.push(prefix.to_string());
        self
    }
}

impl InstrumentChannel for MockChannel {
    fn name(&self) -> &str {
        &self.name
    }

    fn write(&mut self, command: &str) -> Result<()> {
        self.transcript.push(&self.name, command);
        if self.failing.iter().any(|p| command.starts_with(p.as_str())) {
            return Err(SweepError::Instrument(format!(
                "{}: scripted failure for '{command}'",
                self.name
            )));
        }
        if command.contains('?') {
            self.pending = self
                .replies
                .get_mut(command)
                .and_then(|queue| queue.pop_front());
        }
        Ok(())
    }

    fn read(&mut self) -> Result<String> {
        self.pending
            .take()
            .ok_or_else(|| SweepError::Instrument(format!("{}: no reply queued", self.name)))
    }
}
