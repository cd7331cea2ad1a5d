//! Single writer for the agent's half of the socket.
//!
//! Replies can come from the command loop, from `Run` tasks, and from the
//! runner adapter's own tasks via [`ChannelListener`]. They all go through an
//! [`OutboundQueue`] into one writer task that owns the write half, so frames
//! never interleave.

use futures::SinkExt;
use quorra_core::{RunnerError, TestEventListener};
use quorra_protocol::{
    CommandName, CommandReturnMessage, MessageCodec, ProgressMessage, ProtocolError, ReturnValue,
    WireMessage,
};
use tokio::io::AsyncWrite;
use tokio::sync::mpsc;
use tokio_util::codec::FramedWrite;
use tracing::{debug, trace, warn};

pub(crate) enum Outbound {
    Message(WireMessage),
    /// Everything queued before this is written, then the writer exits.
    Close,
}

/// Cloneable handle feeding the writer task.
#[derive(Clone)]
pub(crate) struct OutboundQueue {
    tx: mpsc::UnboundedSender<Outbound>,
}

impl OutboundQueue {
    pub(crate) fn new() -> (Self, mpsc::UnboundedReceiver<Outbound>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    pub(crate) fn send(&self, message: WireMessage) {
        if self.tx.send(Outbound::Message(message)).is_err() {
            debug!("writer closed, dropping outbound message");
        }
    }

    /// Send the answer for `command`.
    pub(crate) fn reply(&self, command: CommandName, result: Result<ReturnValue, RunnerError>) {
        match result {
            Ok(value) => self.send(CommandReturnMessage::ok(command, value).into()),
            Err(error) => self.reply_error(command.as_str(), &error),
        }
    }

    pub(crate) fn reply_error(&self, command: &str, error: &RunnerError) {
        warn!(command, kind = %error.kind(), error = %error, "command failed");
        metrics::counter!("agent_command_errors_total", "kind" => error.kind().as_str())
            .increment(1);
        self.send(CommandReturnMessage::error(command, error).into());
    }

    pub(crate) fn close(&self) {
        let _ = self.tx.send(Outbound::Close);
    }
}

/// Progress sink handed to the runner adapter.
pub(crate) struct ChannelListener {
    queue: OutboundQueue,
}

impl ChannelListener {
    pub(crate) fn new(queue: OutboundQueue) -> Self {
        Self { queue }
    }
}

impl TestEventListener for ChannelListener {
    fn on_test_event(&self, report: &str) {
        self.queue.send(WireMessage::Progress(ProgressMessage {
            report: report.to_string(),
        }));
    }
}

/// Drain the queue into the socket until `Close` or a write error.
///
/// A message the codec refuses (too large, not serializable) only costs that
/// message: a command return is replaced by an error return for the same
/// command, anything else is dropped. Socket errors end the writer.
pub(crate) async fn write_loop<W, C>(
    mut sink: FramedWrite<W, C>,
    mut rx: mpsc::UnboundedReceiver<Outbound>,
) -> Result<(), ProtocolError>
where
    W: AsyncWrite + Unpin,
    C: MessageCodec,
{
    while let Some(item) = rx.recv().await {
        match item {
            Outbound::Message(message) => {
                let label = message.label();
                let command = match &message {
                    WireMessage::CommandReturn(ret) => Some(ret.command.clone()),
                    _ => None,
                };
                match sink.send(message).await {
                    Ok(()) => trace!(%label, "sent"),
                    Err(e @ (ProtocolError::FrameTooLarge { .. } | ProtocolError::Encode(_))) => {
                        warn!(%label, error = %e, "cannot encode outbound message");
                        metrics::counter!("agent_unsendable_messages_total").increment(1);
                        if let Some(command) = command {
                            let error = RunnerError::fault(format_args!("reply not sent: {e}"));
                            let reply = CommandReturnMessage::error(command, &error);
                            sink.send(WireMessage::from(reply)).await?;
                        }
                    }
                    Err(e) => return Err(e),
                }
            }
            Outbound::Close => break,
        }
    }
    sink.close().await
}
