//! Netlink attribute (`struct nlattr`) framing and typed extraction helpers.

use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout};

use super::error::{Error, Result};

pub const NLA_ALIGNTO: usize = 4;

pub const fn nla_align(len: usize) -> usize {
    (len + NLA_ALIGNTO - 1) & !(NLA_ALIGNTO - 1)
}

pub const NLA_HDRLEN: usize = std::mem::size_of::<NlAttr>();

pub const NLA_F_NESTED: u16 = 1 << 15;
pub const NLA_F_NET_BYTEORDER: u16 = 1 << 14;
pub const NLA_TYPE_MASK: u16 = !(NLA_F_NESTED | NLA_F_NET_BYTEORDER);

/// `struct nlattr`.
#[repr(C)]
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, Immutable, KnownLayout)]
pub struct NlAttr {
    pub nla_len: u16,
    pub nla_type: u16,
}

impl NlAttr {
    pub fn new(attr_type: u16, payload_len: usize) -> Self {
        Self {
            nla_len: (NLA_HDRLEN + payload_len) as u16,
            nla_type: attr_type,
        }
    }

    pub fn kind(&self) -> u16 {
        self.nla_type & NLA_TYPE_MASK
    }

    pub fn is_nested(&self) -> bool {
        self.nla_type & NLA_F_NESTED != 0
    }

    pub fn payload_len(&self) -> usize {
        (self.nla_len as usize).saturating_sub(NLA_HDRLEN)
    }

    pub fn from_bytes(data: &[u8]) -> Result<&Self> {
        Self::ref_from_prefix(data)
            .map(|(a, _)| a)
            .map_err(|_| Error::Truncated {
                expected: NLA_HDRLEN,
                actual: data.len(),
            })
    }
}

/// Iterator over a buffer of concatenated, 4-byte-aligned netlink attributes.
pub struct AttrIter<'a> {
    data: &'a [u8],
}

impl<'a> AttrIter<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data }
    }
}

impl<'a> Iterator for AttrIter<'a> {
    type Item = (u16, &'a [u8]);

    fn next(&mut self) -> Option<Self::Item> {
        if self.data.len() < NLA_HDRLEN {
            return None;
        }
        let attr = NlAttr::from_bytes(self.data).ok()?;
        let total = attr.nla_len as usize;
        if total < NLA_HDRLEN || total > self.data.len() {
            self.data = &[];
            return None;
        }
        let payload = &self.data[NLA_HDRLEN..total];
        let aligned = nla_align(total).min(self.data.len());
        self.data = &self.data[aligned..];
        Some((attr.kind(), payload))
    }
}

/// Typed extraction helpers for attribute payloads.
pub mod get {
    use super::{Error, Result};

    pub fn u8(data: &[u8]) -> Result<u8> {
        data.first().copied().ok_or(Error::Truncated {
            expected: 1,
            actual: data.len(),
        })
    }

    pub fn u16_ne(data: &[u8]) -> Result<u16> {
        data.get(0..2)
            .map(|b| u16::from_ne_bytes(b.try_into().unwrap()))
            .ok_or(Error::Truncated {
                expected: 2,
                actual: data.len(),
            })
    }

    pub fn u32_ne(data: &[u8]) -> Result<u32> {
        data.get(0..4)
            .map(|b| u32::from_ne_bytes(b.try_into().unwrap()))
            .ok_or(Error::Truncated {
                expected: 4,
                actual: data.len(),
            })
    }

    pub fn u64_ne(data: &[u8]) -> Result<u64> {
        data.get(0..8)
            .map(|b| u64::from_ne_bytes(b.try_into().unwrap()))
            .ok_or(Error::Truncated {
                expected: 8,
                actual: data.len(),
            })
    }

    pub fn i32_ne(data: &[u8]) -> Result<i32> {
        data.get(0..4)
            .map(|b| i32::from_ne_bytes(b.try_into().unwrap()))
            .ok_or(Error::Truncated {
                expected: 4,
                actual: data.len(),
            })
    }

    pub fn u16_be(data: &[u8]) -> Result<u16> {
        data.get(0..2)
            .map(|b| u16::from_be_bytes(b.try_into().unwrap()))
            .ok_or(Error::Truncated {
                expected: 2,
                actual: data.len(),
            })
    }

    pub fn u32_be(data: &[u8]) -> Result<u32> {
        data.get(0..4)
            .map(|b| u32::from_be_bytes(b.try_into().unwrap()))
            .ok_or(Error::Truncated {
                expected: 4,
                actual: data.len(),
            })
    }

    /// A null-terminated UTF-8 string attribute.
    pub fn string(data: &[u8]) -> Result<&str> {
        let end = data.iter().position(|&b| b == 0).unwrap_or(data.len());
        std::str::from_utf8(&data[..end]).map_err(|_| Error::InvalidAttribute("not utf-8".into()))
    }

    pub fn bytes(data: &[u8]) -> Result<&[u8]> {
        Ok(data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn attr_kind_masks_nested_flag() {
        let attr = NlAttr::new(3 | NLA_F_NESTED, 0);
        assert_eq!(attr.kind(), 3);
        assert!(attr.is_nested());
    }

    #[test]
    fn iter_yields_each_attribute() {
        let mut buf = Vec::new();
        buf.extend_from_slice(NlAttr::new(1, 4).as_bytes());
        buf.extend_from_slice(&42u32.to_ne_bytes());
        buf.extend_from_slice(NlAttr::new(2, 1).as_bytes());
        buf.push(9);
        buf.extend_from_slice(&[0, 0, 0]);

        let attrs: Vec<_> = AttrIter::new(&buf).collect();
        assert_eq!(attrs.len(), 2);
        assert_eq!(attrs[0].0, 1);
        assert_eq!(get::u32_ne(attrs[0].1).unwrap(), 42);
        assert_eq!(attrs[1].0, 2);
        assert_eq!(get::u8(attrs[1].1).unwrap(), 9);
    }
}
