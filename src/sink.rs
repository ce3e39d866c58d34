//! Message sinks.
//!
//! A sink is the consumer end of the receiver. It is owned by the delivery
//! task for the whole session and handed back by
//! [`Receiver::stop`](crate::Receiver::stop), so implementations never see
//! concurrent calls and need no locking of their own.

use std::collections::VecDeque;

use telewatch_types::DecodedMessage;
use tokio::sync::mpsc;

/// Consumer of decoded messages.
pub trait MessageSink: Send + 'static {
    /// Append one message. Called in receipt order per connection.
    fn append(&mut self, message: DecodedMessage);

    /// Drop every message appended so far.
    fn clear(&mut self);
}

impl MessageSink for Box<dyn MessageSink> {
    fn append(&mut self, message: DecodedMessage) {
        (**self).append(message);
    }

    fn clear(&mut self) {
        (**self).clear();
    }
}

/// What a [`ChannelSink`] forwards.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SinkEvent {
    Append(DecodedMessage),
    Clear,
}

/// A sink that forwards everything to an unbounded channel.
///
/// Useful when the consumer lives on another task, e.g. a UI loop that
/// drains the channel on its own schedule.
#[derive(Debug)]
pub struct ChannelSink {
    sender: mpsc::UnboundedSender<SinkEvent>,
}

impl ChannelSink {
    pub fn new(sender: mpsc::UnboundedSender<SinkEvent>) -> Self {
        Self { sender }
    }

    /// Create a sink together with the receiving end.
    pub fn create() -> (Self, mpsc::UnboundedReceiver<SinkEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self::new(tx), rx)
    }
}

impl MessageSink for ChannelSink {
    fn append(&mut self, message: DecodedMessage) {
        // A dropped consumer just stops listening
        let _ = self.sender.send(SinkEvent::Append(message));
    }

    fn clear(&mut self) {
        let _ = self.sender.send(SinkEvent::Clear);
    }
}

/// Default number of messages a [`MessageLog`] keeps.
pub const DEFAULT_LOG_CAPACITY: usize = 500;

/// An in-memory message log that keeps only the most recent messages.
#[derive(Debug, Clone)]
pub struct MessageLog {
    capacity: usize,
    messages: VecDeque<DecodedMessage>,
}

impl Default for MessageLog {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_LOG_CAPACITY)
    }
}

impl MessageLog {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            messages: VecDeque::new(),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// Messages from oldest to newest.
    pub fn iter(&self) -> impl Iterator<Item = &DecodedMessage> {
        self.messages.iter()
    }

    pub fn latest(&self) -> Option<&DecodedMessage> {
        self.messages.back()
    }
}

impl MessageSink for MessageLog {
    fn append(&mut self, message: DecodedMessage) {
        self.messages.push_back(message);
        if self.messages.len() > self.capacity {
            self.messages.pop_front();
        }
    }

    fn clear(&mut self) {
        self.messages.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use telewatch_types::MessageKind;

    fn message(content: &str) -> DecodedMessage {
        DecodedMessage::new(MessageKind::Output, content)
    }

    #[test]
    fn test_message_log_method_syntax() {
        let mut log = MessageLog::default();
        log.append(message("a"));
        log.append(message("b"));
        assert_eq!(log.len(), 2);
        assert_eq!(log.capacity(), DEFAULT_LOG_CAPACITY);
        log.clear();
        assert!(log.is_empty());
    }

    #[test]
    fn test_generic_sink_appends_through_trait() {
        fn feed<S: MessageSink>(sink: &mut S) {
            sink.append(message("a"));
            sink.append(message("b"));
        }

        let mut log = MessageLog::default();
        feed(&mut log);
        let contents: Vec<_> = log.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(contents, vec!["a", "b"]);
    }

    #[test]
    fn test_boxed_sink_forwards() {
        let (sink, mut rx) = ChannelSink::create();
        let mut boxed: Box<dyn MessageSink> = Box::new(sink);
        boxed.append(message("a"));
        boxed.clear();

        match rx.try_recv().unwrap() {
            SinkEvent::Append(m) => assert_eq!(m.content, "a"),
            other => panic!("unexpected event: {:?}", other),
        }
        assert_eq!(rx.try_recv().unwrap(), SinkEvent::Clear);
    }

    #[test]
    fn test_channel_sink_survives_dropped_receiver() {
        let (mut sink, rx) = ChannelSink::create();
        drop(rx);
        sink.append(message("nobody listening"));
        sink.clear();
    }

    #[test]
    fn test_message_log_keeps_most_recent() {
        let mut log = MessageLog::with_capacity(3);
        for i in 0..5 {
            log.append(message(&format!("m{}", i)));
        }

        let contents: Vec<_> = log.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(contents, vec!["m2", "m3", "m4"]);
        assert_eq!(log.latest().unwrap().content, "m4");

        log.clear();
        assert!(log.is_empty());
    }

    #[test]
    fn test_zero_capacity_keeps_one() {
        let mut log = MessageLog::with_capacity(0);
        log.append(message("a"));
        log.append(message("b"));
        assert_eq!(log.len(), 1);
        assert_eq!(log.capacity(), 1);
    }
}
