use std::fmt::{Display, Formatter, Result as FmtResult};
use std::io::{Error as IOError, ErrorKind as IOErrorKind};
use thiserror::Error as ErrorTrait;

use crate::protocol::Status;

#[derive(Debug, Clone, ErrorTrait)]
pub struct Error {
    ctx: Kind,
}

impl Error {
    fn new(ctx: Kind) -> Self {
        Self { ctx }
    }

    pub fn kind(&self) -> &Kind {
        &self.ctx
    }

    pub fn is_key_not_found(&self) -> bool {
        self.ctx == Kind::KeyNotFound
    }

    pub fn is_key_exists(&self) -> bool {
        self.ctx == Kind::KeyExists
    }

    pub fn is_not_stored(&self) -> bool {
        self.ctx == Kind::NotStored
    }

    pub fn is_malformed_batch(&self) -> bool {
        self.ctx == Kind::MalformedBatch
    }

    pub fn is_connection_closed(&self) -> bool {
        self.ctx == Kind::ConnectionClosed
    }

    pub fn is_unknown_command(&self) -> bool {
        self.ctx == Kind::UnknownCommand
    }

    /// Client-side outcomes that do not indicate a broken backend.
    pub fn is_app_error(&self) -> bool {
        matches!(
            self.ctx,
            Kind::KeyNotFound
                | Kind::KeyExists
                | Kind::NotStored
                | Kind::ValueTooLarge
                | Kind::InvalidArguments
                | Kind::UnknownCommand
        )
    }

    pub fn key_not_found() -> Self {
        Self::new(Kind::KeyNotFound)
    }

    pub fn key_exists() -> Self {
        Self::new(Kind::KeyExists)
    }

    pub fn not_stored() -> Self {
        Self::new(Kind::NotStored)
    }

    pub fn value_too_large() -> Self {
        Self::new(Kind::ValueTooLarge)
    }

    pub fn invalid_arguments() -> Self {
        Self::new(Kind::InvalidArguments)
    }

    pub fn unknown_command() -> Self {
        Self::new(Kind::UnknownCommand)
    }

    pub fn malformed_batch() -> Self {
        Self::new(Kind::MalformedBatch)
    }

    pub fn connection_closed() -> Self {
        Self::new(Kind::ConnectionClosed)
    }

    pub fn io(msg: impl Into<String>) -> Self {
        Self::new(Kind::Io(msg.into()))
    }

    pub fn protocol(msg: impl Into<String>) -> Self {
        Self::new(Kind::Protocol(msg.into()))
    }

    pub fn backend(msg: impl Into<String>) -> Self {
        Self::new(Kind::Backend(msg.into()))
    }

    pub fn encoding_disabled() -> Self {
        Self::new(Kind::EncodingDisabled)
    }

    pub fn unsupported_type(msg: impl Into<String>) -> Self {
        Self::new(Kind::UnsupportedType(msg.into()))
    }

    pub fn empty_ring() -> Self {
        Self::new(Kind::EmptyRing)
    }

    pub fn config(msg: impl Into<String>) -> Self {
        Self::new(Kind::Config(msg.into()))
    }

    pub fn discovery(msg: impl Into<String>) -> Self {
        Self::new(Kind::Discovery(msg.into()))
    }

    pub fn internal() -> Self {
        Self::new(Kind::Internal)
    }

    /// Maps the error onto the binary protocol response status.
    pub fn status(&self) -> Status {
        match &self.ctx {
            Kind::KeyNotFound => Status::KeyNotFound,
            Kind::KeyExists => Status::KeyExists,
            Kind::NotStored => Status::NotStored,
            Kind::ValueTooLarge => Status::ValueTooLarge,
            Kind::InvalidArguments | Kind::MalformedBatch => Status::InvalidArguments,
            Kind::UnknownCommand => Status::UnknownCommand,
            _ => Status::InternalError,
        }
    }
}

impl Display for Error {
    fn fmt(&self, f: &mut Formatter) -> FmtResult {
        Display::fmt(&self.ctx, f)
    }
}

impl Display for Kind {
    fn fmt(&self, f: &mut Formatter) -> FmtResult {
        match self {
            Self::KeyNotFound => f.write_str("key not found"),
            Self::KeyExists => f.write_str("key exists"),
            Self::NotStored => f.write_str("item not stored"),
            Self::ValueTooLarge => f.write_str("value too large"),
            Self::InvalidArguments => f.write_str("invalid arguments"),
            Self::UnknownCommand => f.write_str("unknown command"),
            Self::MalformedBatch => {
                f.write_str("received different number of keys, opaques and quiet flags")
            }
            Self::ConnectionClosed => f.write_str("connection is closed"),
            Self::Io(description) => write!(f, "io error: {}", description),
            Self::Protocol(description) => write!(f, "protocol error: {}", description),
            Self::Backend(description) => write!(f, "{}", description),
            Self::EncodingDisabled => f.write_str("encoding is disabled for raw binary transcoder"),
            Self::UnsupportedType(description) => {
                write!(f, "raw binary format must be decoded into bytes or string, got {}", description)
            }
            Self::EmptyRing => f.write_str("cannot build a hash ring without buckets"),
            Self::Config(description) => write!(f, "config error: {}", description),
            Self::Discovery(description) => write!(f, "service discovery error: {}", description),
            Self::Internal => f.write_str("internal error"),
        }
    }
}

impl From<IOError> for Error {
    fn from(err: IOError) -> Self {
        match err.kind() {
            IOErrorKind::UnexpectedEof | IOErrorKind::BrokenPipe | IOErrorKind::ConnectionReset => {
                Self::connection_closed()
            }
            _ => Self::io(err.to_string()),
        }
    }
}

#[derive(PartialEq, Eq, Debug, Clone)]
pub enum Kind {
    KeyNotFound,
    KeyExists,
    NotStored,
    ValueTooLarge,
    InvalidArguments,
    UnknownCommand,
    MalformedBatch,
    ConnectionClosed,
    Io(String),
    Protocol(String),
    Backend(String),
    EncodingDisabled,
    UnsupportedType(String),
    EmptyRing,
    Config(String),
    Discovery(String),
    Internal,
}
