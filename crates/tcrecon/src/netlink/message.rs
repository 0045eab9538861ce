//! Netlink message framing (`struct nlmsghdr`) and message-type constants.

use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout};

use super::error::{Error, Result};

pub const NLMSG_ALIGNTO: usize = 4;

pub const fn nlmsg_align(len: usize) -> usize {
    (len + NLMSG_ALIGNTO - 1) & !(NLMSG_ALIGNTO - 1)
}

pub const NLMSG_HDRLEN: usize = std::mem::size_of::<NlMsgHdr>();

/// `struct nlmsghdr`.
#[repr(C)]
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, Immutable, KnownLayout)]
pub struct NlMsgHdr {
    pub nlmsg_len: u32,
    pub nlmsg_type: u16,
    pub nlmsg_flags: u16,
    pub nlmsg_seq: u32,
    pub nlmsg_pid: u32,
}

impl NlMsgHdr {
    pub fn new(msg_type: u16, flags: u16) -> Self {
        Self {
            nlmsg_len: NLMSG_HDRLEN as u32,
            nlmsg_type: msg_type,
            nlmsg_flags: flags,
            nlmsg_seq: 0,
            nlmsg_pid: 0,
        }
    }

    pub fn payload_len(&self) -> usize {
        (self.nlmsg_len as usize).saturating_sub(NLMSG_HDRLEN)
    }

    pub fn is_error(&self) -> bool {
        self.nlmsg_type == NlMsgType::NLMSG_ERROR
    }

    pub fn is_done(&self) -> bool {
        self.nlmsg_type == NlMsgType::NLMSG_DONE
    }

    pub fn is_multi(&self) -> bool {
        self.nlmsg_flags & NLM_F_MULTI != 0
    }

    pub fn from_bytes(data: &[u8]) -> Result<&Self> {
        Self::ref_from_prefix(data)
            .map(|(hdr, _)| hdr)
            .map_err(|_| Error::Truncated {
                expected: NLMSG_HDRLEN,
                actual: data.len(),
            })
    }
}

/// Netlink message type constants relevant to generic and TC traffic.
#[allow(non_snake_case, non_upper_case_globals)]
pub struct NlMsgType;

impl NlMsgType {
    pub const NLMSG_NOOP: u16 = 1;
    pub const NLMSG_ERROR: u16 = 2;
    pub const NLMSG_DONE: u16 = 3;
    pub const NLMSG_OVERRUN: u16 = 4;

    pub const RTM_NEWQDISC: u16 = 36;
    pub const RTM_DELQDISC: u16 = 37;
    pub const RTM_GETQDISC: u16 = 38;

    pub const RTM_NEWTCLASS: u16 = 40;
    pub const RTM_DELTCLASS: u16 = 41;
    pub const RTM_GETTCLASS: u16 = 42;

    pub const RTM_NEWTFILTER: u16 = 44;
    pub const RTM_DELTFILTER: u16 = 45;
    pub const RTM_GETTFILTER: u16 = 46;

    pub const RTM_NEWACTION: u16 = 48;
    pub const RTM_DELACTION: u16 = 49;
    pub const RTM_GETACTION: u16 = 50;
}

pub const NLM_F_REQUEST: u16 = 0x01;
pub const NLM_F_MULTI: u16 = 0x02;
pub const NLM_F_ACK: u16 = 0x04;
pub const NLM_F_ECHO: u16 = 0x08;
pub const NLM_F_DUMP_INTR: u16 = 0x10;
pub const NLM_F_DUMP_FILTERED: u16 = 0x20;

pub const NLM_F_ROOT: u16 = 0x100;
pub const NLM_F_MATCH: u16 = 0x200;
pub const NLM_F_ATOMIC: u16 = 0x400;
pub const NLM_F_DUMP: u16 = NLM_F_ROOT | NLM_F_MATCH;

pub const NLM_F_REPLACE: u16 = 0x100;
pub const NLM_F_EXCL: u16 = 0x200;
pub const NLM_F_CREATE: u16 = 0x400;
pub const NLM_F_APPEND: u16 = 0x800;

/// Iterator over a buffer containing one or more concatenated netlink messages.
pub struct MessageIter<'a> {
    data: &'a [u8],
}

impl<'a> MessageIter<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data }
    }
}

impl<'a> Iterator for MessageIter<'a> {
    type Item = Result<(&'a NlMsgHdr, &'a [u8])>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.data.len() < NLMSG_HDRLEN {
            return None;
        }

        let header = match NlMsgHdr::from_bytes(self.data) {
            Ok(h) => h,
            Err(e) => {
                self.data = &[];
                return Some(Err(e));
            }
        };

        let total_len = header.nlmsg_len as usize;
        if total_len < NLMSG_HDRLEN || total_len > self.data.len() {
            self.data = &[];
            return Some(Err(Error::InvalidMessage(
                "nlmsg_len out of range".to_string(),
            )));
        }

        let payload = &self.data[NLMSG_HDRLEN..total_len];
        let aligned = nlmsg_align(total_len).min(self.data.len());
        self.data = &self.data[aligned..];

        Some(Ok((header, payload)))
    }
}

/// Payload of an `NLMSG_ERROR` message: `struct nlmsgerr`.
#[derive(Debug, Clone)]
pub struct NlMsgError {
    pub error: i32,
    pub msg: NlMsgHdr,
}

impl NlMsgError {
    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        if data.len() < 4 + NLMSG_HDRLEN {
            return Err(Error::Truncated {
                expected: 4 + NLMSG_HDRLEN,
                actual: data.len(),
            });
        }
        let error = i32::from_ne_bytes(data[0..4].try_into().unwrap());
        let msg = *NlMsgHdr::from_bytes(&data[4..4 + NLMSG_HDRLEN])?;
        Ok(Self { error, msg })
    }

    pub fn is_ack(&self) -> bool {
        self.error == 0
    }

    /// Iterate extended-ack attributes carried after the embedded header, if any.
    pub fn attrs<'a>(&self, data: &'a [u8]) -> super::attr::AttrIter<'a> {
        let offset = 4 + NLMSG_HDRLEN;
        let tail = if data.len() > offset {
            &data[offset..]
        } else {
            &[]
        };
        super::attr::AttrIter::new(tail)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_roundtrip() {
        let header = NlMsgHdr::new(NlMsgType::RTM_NEWQDISC, NLM_F_REQUEST | NLM_F_ACK);
        let bytes = header.as_bytes();
        let parsed = NlMsgHdr::from_bytes(bytes).unwrap();
        assert_eq!(parsed.nlmsg_type, NlMsgType::RTM_NEWQDISC);
        assert_eq!(parsed.nlmsg_flags, NLM_F_REQUEST | NLM_F_ACK);
    }

    #[test]
    fn align_rounds_up_to_four() {
        assert_eq!(nlmsg_align(0), 0);
        assert_eq!(nlmsg_align(1), 4);
        assert_eq!(nlmsg_align(4), 4);
        assert_eq!(nlmsg_align(5), 8);
    }

    #[test]
    fn message_iter_yields_one_message() {
        let header = NlMsgHdr {
            nlmsg_len: NLMSG_HDRLEN as u32,
            nlmsg_type: 1,
            nlmsg_flags: 0,
            nlmsg_seq: 7,
            nlmsg_pid: 0,
        };
        let bytes = header.as_bytes().to_vec();
        let mut iter = MessageIter::new(&bytes);
        let (hdr, payload) = iter.next().unwrap().unwrap();
        assert_eq!(hdr.nlmsg_seq, 7);
        assert!(payload.is_empty());
        assert!(iter.next().is_none());
    }
}
