//! Local edits the server has not acknowledged yet
//!
//! At most one operation is in flight at a time. Edits made meanwhile are
//! composed into a single buffered operation that goes out once the in-flight
//! one is acknowledged.

use tandem_core::{Operation, Result};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum Outbox {
    /// Nothing pending; local and server text agree at the current revision
    #[default]
    Idle,

    /// Edits made while nothing could be sent, waiting for [`Outbox::flush`]
    Queued(Operation),

    /// One operation sent, its acknowledgement outstanding
    AwaitingAck(Operation),

    /// One operation sent plus later edits composed together
    AwaitingAckWithBuffer {
        inflight: Operation,
        buffer: Operation,
    },
}

/// Result of acknowledging the in-flight operation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Ack {
    /// Everything local is now confirmed
    CaughtUp,
    /// The buffered operation is now in flight and must be sent
    SendNext(Operation),
    /// Acknowledgement without anything in flight
    NothingInFlight,
}

impl Outbox {
    pub fn is_idle(&self) -> bool {
        matches!(self, Outbox::Idle)
    }

    /// The operation awaiting acknowledgement, if any
    pub fn inflight(&self) -> Option<&Operation> {
        match self {
            Outbox::AwaitingAck(op) | Outbox::AwaitingAckWithBuffer { inflight: op, .. } => {
                Some(op)
            }
            Outbox::Idle | Outbox::Queued(_) => None,
        }
    }

    /// Record a local edit already applied to the local text
    pub fn push(&mut self, op: Operation) -> Result<()> {
        match self {
            Outbox::Idle => *self = Outbox::Queued(op),
            Outbox::Queued(queued) => *queued = queued.compose(&op)?,
            Outbox::AwaitingAck(_) => {
                if let Outbox::AwaitingAck(inflight) = std::mem::take(self) {
                    *self = Outbox::AwaitingAckWithBuffer {
                        inflight,
                        buffer: op,
                    };
                }
            }
            Outbox::AwaitingAckWithBuffer { buffer, .. } => *buffer = buffer.compose(&op)?,
        }
        Ok(())
    }

    /// Move queued edits in flight, returning the operation to send
    pub fn flush(&mut self) -> Option<Operation> {
        match std::mem::take(self) {
            Outbox::Queued(op) => {
                *self = Outbox::AwaitingAck(op.clone());
                Some(op)
            }
            other => {
                *self = other;
                None
            }
        }
    }

    /// The server accepted the in-flight operation
    pub fn ack(&mut self) -> Ack {
        match std::mem::take(self) {
            Outbox::AwaitingAck(_) => Ack::CaughtUp,
            Outbox::AwaitingAckWithBuffer { buffer, .. } => {
                *self = Outbox::AwaitingAck(buffer.clone());
                Ack::SendNext(buffer)
            }
            other => {
                *self = other;
                Ack::NothingInFlight
            }
        }
    }

    /// Rebase pending operations over a remote operation
    ///
    /// Returns the remote operation rewritten to apply to the local text. The
    /// remote side wins insert ties, matching the server's ordering.
    pub fn transform(&mut self, remote: &Operation) -> Result<Operation> {
        match self {
            Outbox::Idle => Ok(remote.clone()),
            Outbox::Queued(pending) | Outbox::AwaitingAck(pending) => {
                let (remote, rebased) = remote.transform(pending)?;
                *pending = rebased;
                Ok(remote)
            }
            Outbox::AwaitingAckWithBuffer { inflight, buffer } => {
                let (remote, rebased_inflight) = remote.transform(inflight)?;
                let (remote, rebased_buffer) = remote.transform(buffer)?;
                *inflight = rebased_inflight;
                *buffer = rebased_buffer;
                Ok(remote)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn insert_at(base_len: usize, pos: usize, text: &str) -> Operation {
        let mut op = Operation::new();
        op.retain(pos).insert(text).retain(base_len - pos);
        op
    }

    #[test]
    fn test_push_then_flush() {
        let mut outbox = Outbox::default();
        outbox.push(insert_at(0, 0, "a")).unwrap();
        outbox.push(insert_at(1, 1, "b")).unwrap();
        assert_eq!(outbox, Outbox::Queued(insert_at(0, 0, "ab")));

        let sent = outbox.flush().unwrap();
        assert_eq!(sent, insert_at(0, 0, "ab"));
        assert_eq!(outbox, Outbox::AwaitingAck(sent));
        assert!(outbox.flush().is_none());
    }

    #[test]
    fn test_buffer_composes_while_in_flight() {
        let mut outbox = Outbox::AwaitingAck(insert_at(0, 0, "a"));
        outbox.push(insert_at(1, 1, "b")).unwrap();
        outbox.push(insert_at(2, 2, "c")).unwrap();

        assert_eq!(
            outbox,
            Outbox::AwaitingAckWithBuffer {
                inflight: insert_at(0, 0, "a"),
                buffer: insert_at(1, 1, "bc"),
            }
        );
        assert_eq!(outbox.inflight(), Some(&insert_at(0, 0, "a")));
    }

    #[test]
    fn test_ack_promotes_buffer() {
        let mut outbox = Outbox::AwaitingAckWithBuffer {
            inflight: insert_at(0, 0, "a"),
            buffer: insert_at(1, 1, "b"),
        };

        assert_eq!(outbox.ack(), Ack::SendNext(insert_at(1, 1, "b")));
        assert_eq!(outbox.ack(), Ack::CaughtUp);
        assert!(outbox.is_idle());
        assert_eq!(outbox.ack(), Ack::NothingInFlight);
    }

    #[test]
    fn test_ack_with_only_queued_edits() {
        let mut outbox = Outbox::Queued(insert_at(0, 0, "a"));
        assert_eq!(outbox.ack(), Ack::NothingInFlight);
        assert_eq!(outbox, Outbox::Queued(insert_at(0, 0, "a")));
    }

    #[test]
    fn test_transform_through_inflight_and_buffer() {
        // Local text "ab": "a" in flight, "b" buffered; remote inserts "X" at 0
        let mut outbox = Outbox::AwaitingAckWithBuffer {
            inflight: insert_at(0, 0, "a"),
            buffer: insert_at(1, 1, "b"),
        };

        let remote = outbox.transform(&insert_at(0, 0, "X")).unwrap();
        assert_eq!(remote, insert_at(2, 0, "X"));
        assert_eq!(
            outbox,
            Outbox::AwaitingAckWithBuffer {
                inflight: insert_at(1, 1, "a"),
                buffer: insert_at(2, 2, "b"),
            }
        );

        assert_eq!(remote.apply("ab").unwrap(), "Xab");
    }

    #[test]
    fn test_transform_rejects_wrong_length() {
        let mut outbox = Outbox::AwaitingAck(insert_at(0, 0, "a"));
        assert!(outbox.transform(&insert_at(3, 0, "X")).is_err());
        assert_eq!(outbox, Outbox::AwaitingAck(insert_at(0, 0, "a")));
    }
}
