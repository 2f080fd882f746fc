//! memcached binary protocol: framing, client-side request encoding and
//! server-side request decoding, plus the client-facing [`Responder`].

mod codec;
mod responder;

pub use codec::{
    read_request, read_response, write_delete, write_gat, write_get, write_request, write_set,
    write_touch, Response,
};
pub use responder::{BinaryResponder, Responder};

use crate::error::Error;

pub const HEADER_LEN: usize = 24;
/// Upper bound of a single packet body, larger frames are treated as garbage.
pub const MAX_BODY_LEN: u32 = 20 * 1024 * 1024;

pub const MAGIC_REQUEST: u8 = 0x80;
pub const MAGIC_RESPONSE: u8 = 0x81;

pub mod opcode {
    pub const GET: u8 = 0x00;
    pub const SET: u8 = 0x01;
    pub const ADD: u8 = 0x02;
    pub const REPLACE: u8 = 0x03;
    pub const DELETE: u8 = 0x04;
    pub const QUIT: u8 = 0x07;
    pub const GETQ: u8 = 0x09;
    pub const NOOP: u8 = 0x0a;
    pub const VERSION: u8 = 0x0b;
    pub const GETK: u8 = 0x0c;
    pub const GETKQ: u8 = 0x0d;
    pub const APPEND: u8 = 0x0e;
    pub const PREPEND: u8 = 0x0f;
    pub const STAT: u8 = 0x10;
    pub const SETQ: u8 = 0x11;
    pub const ADDQ: u8 = 0x12;
    pub const REPLACEQ: u8 = 0x13;
    pub const DELETEQ: u8 = 0x14;
    pub const QUITQ: u8 = 0x17;
    pub const APPENDQ: u8 = 0x19;
    pub const PREPENDQ: u8 = 0x1a;
    pub const TOUCH: u8 = 0x1c;
    pub const GAT: u8 = 0x1d;
    pub const GATQ: u8 = 0x1e;
    pub const GATK: u8 = 0x23;
    pub const GATKQ: u8 = 0x24;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    NoError,
    KeyNotFound,
    KeyExists,
    ValueTooLarge,
    InvalidArguments,
    NotStored,
    UnknownCommand,
    OutOfMemory,
    InternalError,
}

impl Status {
    pub fn code(self) -> u16 {
        match self {
            Self::NoError => 0x0000,
            Self::KeyNotFound => 0x0001,
            Self::KeyExists => 0x0002,
            Self::ValueTooLarge => 0x0003,
            Self::InvalidArguments => 0x0004,
            Self::NotStored => 0x0005,
            Self::UnknownCommand => 0x0081,
            Self::OutOfMemory => 0x0082,
            Self::InternalError => 0x0084,
        }
    }

    pub fn from_code(code: u16) -> Self {
        match code {
            0x0000 => Self::NoError,
            0x0001 => Self::KeyNotFound,
            0x0002 => Self::KeyExists,
            0x0003 => Self::ValueTooLarge,
            0x0004 => Self::InvalidArguments,
            0x0005 => Self::NotStored,
            0x0081 => Self::UnknownCommand,
            0x0082 => Self::OutOfMemory,
            _ => Self::InternalError,
        }
    }

    /// `None` for a successful status.
    pub fn into_error(self) -> Option<Error> {
        match self {
            Self::NoError => None,
            Self::KeyNotFound => Some(Error::key_not_found()),
            Self::KeyExists => Some(Error::key_exists()),
            Self::ValueTooLarge => Some(Error::value_too_large()),
            Self::InvalidArguments => Some(Error::invalid_arguments()),
            Self::NotStored => Some(Error::not_stored()),
            Self::UnknownCommand => Some(Error::unknown_command()),
            Self::OutOfMemory => Some(Error::backend("out of memory")),
            Self::InternalError => Some(Error::backend("backend internal error")),
        }
    }
}

/// Fixed 24-byte packet header. `vbucket_or_status` is the vbucket id in
/// requests and the status code in responses.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Header {
    pub magic: u8,
    pub opcode: u8,
    pub key_len: u16,
    pub extras_len: u8,
    pub data_type: u8,
    pub vbucket_or_status: u16,
    pub body_len: u32,
    pub opaque: u32,
    pub cas: u64,
}

impl Header {
    pub fn request(opcode: u8, key_len: usize, extras_len: usize, value_len: usize, opaque: u32) -> Self {
        Self::new(MAGIC_REQUEST, opcode, 0, key_len, extras_len, value_len, opaque)
    }

    pub fn response(
        opcode: u8,
        status: Status,
        key_len: usize,
        extras_len: usize,
        value_len: usize,
        opaque: u32,
    ) -> Self {
        Self::new(MAGIC_RESPONSE, opcode, status.code(), key_len, extras_len, value_len, opaque)
    }

    #[allow(clippy::cast_possible_truncation)]
    fn new(
        magic: u8,
        opcode: u8,
        vbucket_or_status: u16,
        key_len: usize,
        extras_len: usize,
        value_len: usize,
        opaque: u32,
    ) -> Self {
        Self {
            magic,
            opcode,
            key_len: key_len as u16,
            extras_len: extras_len as u8,
            data_type: 0,
            vbucket_or_status,
            body_len: (key_len + extras_len + value_len) as u32,
            opaque,
            cas: 0,
        }
    }

    pub fn parse(buf: &[u8; HEADER_LEN]) -> Self {
        Self {
            magic: buf[0],
            opcode: buf[1],
            key_len: u16::from_be_bytes([buf[2], buf[3]]),
            extras_len: buf[4],
            data_type: buf[5],
            vbucket_or_status: u16::from_be_bytes([buf[6], buf[7]]),
            body_len: u32::from_be_bytes([buf[8], buf[9], buf[10], buf[11]]),
            opaque: u32::from_be_bytes([buf[12], buf[13], buf[14], buf[15]]),
            cas: u64::from_be_bytes([
                buf[16], buf[17], buf[18], buf[19], buf[20], buf[21], buf[22], buf[23],
            ]),
        }
    }

    pub fn encode(&self, buf: &mut Vec<u8>) {
        buf.push(self.magic);
        buf.push(self.opcode);
        buf.extend_from_slice(&self.key_len.to_be_bytes());
        buf.push(self.extras_len);
        buf.push(self.data_type);
        buf.extend_from_slice(&self.vbucket_or_status.to_be_bytes());
        buf.extend_from_slice(&self.body_len.to_be_bytes());
        buf.extend_from_slice(&self.opaque.to_be_bytes());
        buf.extend_from_slice(&self.cas.to_be_bytes());
    }

    pub fn status(&self) -> Status {
        Status::from_code(self.vbucket_or_status)
    }

    fn check_lengths(&self) -> Result<(), Error> {
        if self.body_len > MAX_BODY_LEN {
            return Err(Error::protocol(format!("body of {} bytes is too large", self.body_len)));
        }
        if u32::from(self.key_len) + u32::from(self.extras_len) > self.body_len {
            return Err(Error::protocol("key and extras exceed body length"));
        }
        Ok(())
    }
}

/// Assembles one packet in memory.
pub fn encode_packet(header: &Header, extras: &[u8], key: &[u8], value: &[u8]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(HEADER_LEN + extras.len() + key.len() + value.len());
    header.encode(&mut buf);
    buf.extend_from_slice(extras);
    buf.extend_from_slice(key);
    buf.extend_from_slice(value);
    buf
}
