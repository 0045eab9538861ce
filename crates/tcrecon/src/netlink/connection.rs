//! Low-level request/response plumbing over a [`NetlinkSocket`].

use super::builder::MessageBuilder;
use super::error::{Error, Result};
use super::message::{MessageIter, NLM_F_ACK, NLM_F_DUMP, NLM_F_REQUEST, NlMsgError, NlMsgHdr};
use super::socket::NetlinkSocket;

/// A single `NETLINK_ROUTE` connection. One connection owns the socket
/// exclusively for the duration of each request/response cycle.
pub struct Connection {
    socket: NetlinkSocket,
}

impl Connection {
    pub fn new() -> Result<Self> {
        Ok(Self {
            socket: NetlinkSocket::new()?,
        })
    }

    pub fn socket(&self) -> &NetlinkSocket {
        &self.socket
    }

    /// Send a request and wait for the ACK, returning an error if the kernel
    /// rejected it (including the extended-ack message when present).
    pub async fn request_ack(&self, mut builder: MessageBuilder, operation: &str) -> Result<()> {
        let seq = self.socket.next_seq();
        builder.set_seq(seq);
        builder.set_pid(self.socket.pid());

        let msg = builder.finish();
        self.socket.send(&msg).await?;

        let response = self.socket.recv_msg().await?;
        self.process_ack(&response, seq, operation)
    }

    /// Send a dump request and collect every response message's raw payload
    /// (header stripped) until `NLMSG_DONE`.
    pub async fn request_dump(&self, mut builder: MessageBuilder, operation: &str) -> Result<Vec<Vec<u8>>> {
        let seq = self.socket.next_seq();
        builder.set_seq(seq);
        builder.set_pid(self.socket.pid());

        let msg = builder.finish();
        self.socket.send(&msg).await?;

        let mut responses = Vec::new();
        loop {
            let data = self.socket.recv_msg().await?;
            let mut done = false;

            for result in MessageIter::new(&data) {
                let (header, payload) = result?;
                if header.nlmsg_seq != seq {
                    continue;
                }
                if header.is_error() {
                    let err = NlMsgError::from_bytes(payload)?;
                    if !err.is_ack() {
                        return Err(Error::from_errno_with_context(operation, err.error));
                    }
                    continue;
                }
                if header.is_done() {
                    done = true;
                    break;
                }
                responses.push(payload.to_vec());
            }

            if done || !responses_are_multi(&data) {
                break;
            }
        }

        Ok(responses)
    }

    fn process_ack(&self, data: &[u8], expected_seq: u32, operation: &str) -> Result<()> {
        for result in MessageIter::new(data) {
            let (header, payload) = result?;
            if header.nlmsg_seq != expected_seq {
                continue;
            }
            if header.is_error() {
                let err = NlMsgError::from_bytes(payload)?;
                if !err.is_ack() {
                    return Err(Error::from_errno_with_context(operation, err.error));
                }
                return Ok(());
            }
        }
        Err(Error::InvalidMessage(format!(
            "expected ACK for {operation}, got no matching reply"
        )))
    }
}

fn responses_are_multi(data: &[u8]) -> bool {
    match NlMsgHdr::from_bytes(data) {
        Ok(hdr) => hdr.is_multi() && !hdr.is_done(),
        Err(_) => false,
    }
}

pub(crate) fn dump_request(msg_type: u16) -> MessageBuilder {
    MessageBuilder::new(msg_type, NLM_F_REQUEST | NLM_F_DUMP)
}

pub(crate) fn ack_request(msg_type: u16) -> MessageBuilder {
    MessageBuilder::new(msg_type, NLM_F_REQUEST | NLM_F_ACK)
}

pub(crate) fn create_request(msg_type: u16) -> MessageBuilder {
    MessageBuilder::new(msg_type, NLM_F_REQUEST | NLM_F_ACK | 0x400)
}

pub(crate) fn replace_request(msg_type: u16) -> MessageBuilder {
    MessageBuilder::new(msg_type, NLM_F_REQUEST | NLM_F_ACK | 0x400 | 0x100)
}
