use crate::error::Error;
use std::fmt::{Debug, Display, Formatter, Result as FmtResult};

pub type Opaque = u32;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RequestType {
    /// Opcode of a request that decoded but is not supported, `None` when
    /// the request could not be decoded at all.
    Unknown(Option<u8>),
    Get,
    Gat,
    Set,
    Add,
    Replace,
    Append,
    Prepend,
    Delete,
    Touch,
    Noop,
    Quit,
    Version,
    Stat,
}

impl Display for RequestType {
    fn fmt(&self, f: &mut Formatter) -> FmtResult {
        let name = match self {
            Self::Unknown(_) => "unknown",
            Self::Get => "get",
            Self::Gat => "gat",
            Self::Set => "set",
            Self::Add => "add",
            Self::Replace => "replace",
            Self::Append => "append",
            Self::Prepend => "prepend",
            Self::Delete => "delete",
            Self::Touch => "touch",
            Self::Noop => "noop",
            Self::Quit => "quit",
            Self::Version => "version",
            Self::Stat => "stat",
        };
        f.write_str(name)
    }
}

/// Batch of keys read by a single client get.
///
/// `keys`, `opaques` and `quiet` are parallel; `noop_opaque` and `noop_end`
/// describe the terminating no-op of a quiet batch.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GetRequest {
    pub keys: Vec<Vec<u8>>,
    pub opaques: Vec<Opaque>,
    pub quiet: Vec<bool>,
    pub noop_opaque: Opaque,
    pub noop_end: bool,
}

impl GetRequest {
    pub fn single(key: impl Into<Vec<u8>>, opaque: Opaque, quiet: bool) -> Self {
        Self {
            keys: vec![key.into()],
            opaques: vec![opaque],
            quiet: vec![quiet],
            noop_opaque: 0,
            noop_end: false,
        }
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    /// Checks that the parallel lists line up.
    pub fn validate(&self) -> Result<(), Error> {
        if self.opaques.len() != self.keys.len() || self.quiet.len() != self.keys.len() {
            Err(Error::malformed_batch())
        } else {
            Ok(())
        }
    }

    pub fn push(&mut self, key: Vec<u8>, opaque: Opaque, quiet: bool) {
        self.keys.push(key);
        self.opaques.push(opaque);
        self.quiet.push(quiet);
    }
}

#[derive(Clone, Default, PartialEq, Eq)]
pub struct GetResponse {
    pub key: Vec<u8>,
    pub data: Vec<u8>,
    pub flags: u32,
    pub miss: bool,
    pub opaque: Opaque,
    pub quiet: bool,
}

impl GetResponse {
    pub fn hit(key: Vec<u8>, data: Vec<u8>, flags: u32, opaque: Opaque, quiet: bool) -> Self {
        Self {
            key,
            data,
            flags,
            miss: false,
            opaque,
            quiet,
        }
    }

    pub fn miss(key: Vec<u8>, opaque: Opaque, quiet: bool) -> Self {
        Self {
            key,
            data: Vec::new(),
            flags: 0,
            miss: true,
            opaque,
            quiet,
        }
    }
}

impl Debug for GetResponse {
    fn fmt(&self, f: &mut Formatter) -> FmtResult {
        f.debug_struct("GetResponse")
            .field("key", &String::from_utf8_lossy(&self.key))
            .field("len", &self.data.len())
            .field("flags", &self.flags)
            .field("miss", &self.miss)
            .field("opaque", &self.opaque)
            .field("quiet", &self.quiet)
            .finish()
    }
}

/// Payload of set, add, replace, append and prepend.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct SetRequest {
    pub key: Vec<u8>,
    pub data: Vec<u8>,
    pub flags: u32,
    pub exptime: u32,
    pub opaque: Opaque,
    pub quiet: bool,
}

impl Debug for SetRequest {
    fn fmt(&self, f: &mut Formatter) -> FmtResult {
        f.debug_struct("SetRequest")
            .field("key", &String::from_utf8_lossy(&self.key))
            .field("len", &self.data.len())
            .field("flags", &self.flags)
            .field("exptime", &self.exptime)
            .field("opaque", &self.opaque)
            .field("quiet", &self.quiet)
            .finish()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeleteRequest {
    pub key: Vec<u8>,
    pub opaque: Opaque,
    pub quiet: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TouchRequest {
    pub key: Vec<u8>,
    pub exptime: u32,
    pub opaque: Opaque,
    pub quiet: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GatRequest {
    pub key: Vec<u8>,
    pub exptime: u32,
    pub opaque: Opaque,
    pub quiet: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct NoopRequest {
    pub opaque: Opaque,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QuitRequest {
    pub opaque: Opaque,
    pub quiet: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct VersionRequest {
    pub opaque: Opaque,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatRequest {
    pub opaque: Opaque,
}

/// One decoded client request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Request {
    Get(GetRequest),
    Gat(GatRequest),
    Set(SetRequest),
    Add(SetRequest),
    Replace(SetRequest),
    Append(SetRequest),
    Prepend(SetRequest),
    Delete(DeleteRequest),
    Touch(TouchRequest),
    Noop(NoopRequest),
    Quit(QuitRequest),
    Version(VersionRequest),
    Stat(StatRequest),
    Unknown { opcode: u8, opaque: Opaque },
}

impl Request {
    pub fn request_type(&self) -> RequestType {
        match self {
            Self::Get(_) => RequestType::Get,
            Self::Gat(_) => RequestType::Gat,
            Self::Set(_) => RequestType::Set,
            Self::Add(_) => RequestType::Add,
            Self::Replace(_) => RequestType::Replace,
            Self::Append(_) => RequestType::Append,
            Self::Prepend(_) => RequestType::Prepend,
            Self::Delete(_) => RequestType::Delete,
            Self::Touch(_) => RequestType::Touch,
            Self::Noop(_) => RequestType::Noop,
            Self::Quit(_) => RequestType::Quit,
            Self::Version(_) => RequestType::Version,
            Self::Stat(_) => RequestType::Stat,
            Self::Unknown { opcode, .. } => RequestType::Unknown(Some(*opcode)),
        }
    }

    /// Opaque the error response of this request should carry.
    pub fn opaque(&self) -> Opaque {
        match self {
            Self::Get(req) => req.opaques.first().copied().unwrap_or(req.noop_opaque),
            Self::Gat(req) => req.opaque,
            Self::Set(req)
            | Self::Add(req)
            | Self::Replace(req)
            | Self::Append(req)
            | Self::Prepend(req) => req.opaque,
            Self::Delete(req) => req.opaque,
            Self::Touch(req) => req.opaque,
            Self::Noop(req) => req.opaque,
            Self::Quit(req) => req.opaque,
            Self::Version(req) => req.opaque,
            Self::Stat(req) => req.opaque,
            Self::Unknown { opaque, .. } => *opaque,
        }
    }

    pub fn is_quiet(&self) -> bool {
        match self {
            Self::Get(req) => req.quiet.first().copied().unwrap_or(false),
            Self::Gat(req) => req.quiet,
            Self::Set(req)
            | Self::Add(req)
            | Self::Replace(req)
            | Self::Append(req)
            | Self::Prepend(req) => req.quiet,
            Self::Delete(req) => req.quiet,
            Self::Touch(req) => req.quiet,
            Self::Quit(req) => req.quiet,
            Self::Noop(_) | Self::Version(_) | Self::Stat(_) | Self::Unknown { .. } => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_get_request_validate_mismatched_lengths() {
        let req = GetRequest {
            keys: vec![b"k1".to_vec(), b"k2".to_vec()],
            opaques: vec![1],
            quiet: vec![false, false],
            ..Default::default()
        };
        assert!(req.validate().unwrap_err().is_malformed_batch());
    }

    #[test]
    fn test_get_request_single_is_valid() {
        let req = GetRequest::single("key", 7, true);
        assert!(req.validate().is_ok());
        assert_eq!(req.opaques, vec![7]);
        assert_eq!(Request::Get(req).opaque(), 7);
    }

    #[test]
    fn test_request_metadata_of_empty_get_falls_back_to_noop() {
        let req = GetRequest {
            noop_opaque: 42,
            noop_end: true,
            ..Default::default()
        };
        let req = Request::Get(req);
        assert_eq!(req.opaque(), 42);
        assert!(!req.is_quiet());
        assert_eq!(req.request_type(), RequestType::Get);
    }
}
