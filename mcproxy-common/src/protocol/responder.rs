use super::{encode_packet, opcode, Header, Status};
use crate::data::{GetResponse, Opaque, RequestType};
use crate::error::Error;
use async_trait::async_trait;
use tokio::io::{AsyncWrite, AsyncWriteExt};

/// Encodes orchestrator outcomes onto the client connection.
#[async_trait]
pub trait Responder: Send {
    async fn get(&mut self, item: &GetResponse) -> Result<(), Error>;

    /// Closes a get batch. Writes the no-op reply only when the batch was
    /// terminated by a no-op.
    async fn get_end(&mut self, noop_opaque: Opaque, noop_end: bool) -> Result<(), Error>;

    async fn gat(&mut self, item: &GetResponse) -> Result<(), Error>;

    async fn gat_miss(&mut self, opaque: Opaque, quiet: bool) -> Result<(), Error>;

    async fn set(&mut self, opaque: Opaque, quiet: bool) -> Result<(), Error>;

    async fn delete(&mut self, opaque: Opaque, quiet: bool) -> Result<(), Error>;

    async fn touch(&mut self, opaque: Opaque, quiet: bool) -> Result<(), Error>;

    async fn noop(&mut self, opaque: Opaque) -> Result<(), Error>;

    async fn quit(&mut self, opaque: Opaque, quiet: bool) -> Result<(), Error>;

    async fn version(&mut self, opaque: Opaque) -> Result<(), Error>;

    async fn stat(&mut self, opaque: Opaque) -> Result<(), Error>;

    async fn error(
        &mut self,
        opaque: Opaque,
        request: RequestType,
        err: &Error,
        quiet: bool,
    ) -> Result<(), Error>;

    async fn flush(&mut self) -> Result<(), Error>;
}

/// [`Responder`] writing binary protocol frames. Hits are answered with the
/// key included.
pub struct BinaryResponder<W> {
    writer: W,
    version: String,
}

impl<W> BinaryResponder<W>
where
    W: AsyncWrite + Unpin + Send,
{
    pub fn new(writer: W, version: impl Into<String>) -> Self {
        Self {
            writer,
            version: version.into(),
        }
    }

    pub fn into_inner(self) -> W {
        self.writer
    }

    async fn write(
        &mut self,
        op: u8,
        status: Status,
        opaque: Opaque,
        extras: &[u8],
        key: &[u8],
        value: &[u8],
    ) -> Result<(), Error> {
        let header = Header::response(op, status, key.len(), extras.len(), value.len(), opaque);
        self.writer
            .write_all(&encode_packet(&header, extras, key, value))
            .await?;
        Ok(())
    }

    async fn ack(&mut self, op: u8, opaque: Opaque) -> Result<(), Error> {
        self.write(op, Status::NoError, opaque, &[], &[], &[]).await
    }
}

fn error_opcode(request: RequestType) -> u8 {
    match request {
        RequestType::Get => opcode::GET,
        RequestType::Gat => opcode::GAT,
        RequestType::Set => opcode::SET,
        RequestType::Add => opcode::ADD,
        RequestType::Replace => opcode::REPLACE,
        RequestType::Append => opcode::APPEND,
        RequestType::Prepend => opcode::PREPEND,
        RequestType::Delete => opcode::DELETE,
        RequestType::Touch => opcode::TOUCH,
        RequestType::Noop => opcode::NOOP,
        RequestType::Quit => opcode::QUIT,
        RequestType::Version => opcode::VERSION,
        RequestType::Stat => opcode::STAT,
        RequestType::Unknown(Some(op)) => op,
        // undecodable, reuse a harmless opcode
        RequestType::Unknown(None) => opcode::NOOP,
    }
}

#[async_trait]
impl<W> Responder for BinaryResponder<W>
where
    W: AsyncWrite + Unpin + Send,
{
    async fn get(&mut self, item: &GetResponse) -> Result<(), Error> {
        if item.miss {
            if item.quiet {
                return Ok(());
            }
            return self
                .write(opcode::GETK, Status::KeyNotFound, item.opaque, &[], &item.key, &[])
                .await;
        }
        let op = if item.quiet { opcode::GETKQ } else { opcode::GETK };
        self.write(
            op,
            Status::NoError,
            item.opaque,
            &item.flags.to_be_bytes(),
            &item.key,
            &item.data,
        )
        .await
    }

    async fn get_end(&mut self, noop_opaque: Opaque, noop_end: bool) -> Result<(), Error> {
        if noop_end {
            self.ack(opcode::NOOP, noop_opaque).await
        } else {
            Ok(())
        }
    }

    async fn gat(&mut self, item: &GetResponse) -> Result<(), Error> {
        if item.miss {
            return self.gat_miss(item.opaque, item.quiet).await;
        }
        let op = if item.quiet { opcode::GATQ } else { opcode::GAT };
        self.write(
            op,
            Status::NoError,
            item.opaque,
            &item.flags.to_be_bytes(),
            &[],
            &item.data,
        )
        .await
    }

    async fn gat_miss(&mut self, opaque: Opaque, quiet: bool) -> Result<(), Error> {
        if quiet {
            return Ok(());
        }
        self.write(opcode::GAT, Status::KeyNotFound, opaque, &[], &[], &[])
            .await
    }

    async fn set(&mut self, opaque: Opaque, quiet: bool) -> Result<(), Error> {
        if quiet {
            return Ok(());
        }
        self.ack(opcode::SET, opaque).await
    }

    async fn delete(&mut self, opaque: Opaque, quiet: bool) -> Result<(), Error> {
        if quiet {
            return Ok(());
        }
        self.ack(opcode::DELETE, opaque).await
    }

    async fn touch(&mut self, opaque: Opaque, quiet: bool) -> Result<(), Error> {
        if quiet {
            return Ok(());
        }
        self.ack(opcode::TOUCH, opaque).await
    }

    async fn noop(&mut self, opaque: Opaque) -> Result<(), Error> {
        self.ack(opcode::NOOP, opaque).await
    }

    async fn quit(&mut self, opaque: Opaque, quiet: bool) -> Result<(), Error> {
        if quiet {
            return Ok(());
        }
        self.ack(opcode::QUIT, opaque).await
    }

    async fn version(&mut self, opaque: Opaque) -> Result<(), Error> {
        let version = self.version.clone();
        self.write(
            opcode::VERSION,
            Status::NoError,
            opaque,
            &[],
            &[],
            version.as_bytes(),
        )
        .await
    }

    async fn stat(&mut self, opaque: Opaque) -> Result<(), Error> {
        // empty terminator, no stats are exported over the protocol
        self.ack(opcode::STAT, opaque).await
    }

    async fn error(
        &mut self,
        opaque: Opaque,
        request: RequestType,
        err: &Error,
        quiet: bool,
    ) -> Result<(), Error> {
        if quiet && err.is_key_not_found() {
            return Ok(());
        }
        let message = err.to_string();
        self.write(
            error_opcode(request),
            err.status(),
            opaque,
            &[],
            &[],
            message.as_bytes(),
        )
        .await
    }

    async fn flush(&mut self) -> Result<(), Error> {
        self.writer.flush().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::read_response;

    fn responder() -> BinaryResponder<Vec<u8>> {
        BinaryResponder::new(Vec::new(), "1.0.0")
    }

    #[tokio::test]
    async fn test_get_hit_carries_key_flags_and_opaque() {
        let mut r = responder();
        let item = GetResponse::hit(b"k1".to_vec(), b"v1".to_vec(), 4, 5, false);
        r.get(&item).await.unwrap();
        let out = r.into_inner();
        let mut input: &[u8] = &out;
        let response = read_response(&mut input).await.unwrap();
        assert_eq!(response.header.opcode, opcode::GETK);
        assert_eq!(response.status(), Status::NoError);
        assert_eq!(response.opaque(), 5);
        assert_eq!(response.flags(), 4);
        assert_eq!(response.key, b"k1");
        assert_eq!(response.value, b"v1");
    }

    #[tokio::test]
    async fn test_quiet_miss_is_suppressed() {
        let mut r = responder();
        r.get(&GetResponse::miss(b"k".to_vec(), 1, true))
            .await
            .unwrap();
        r.get_end(0, false).await.unwrap();
        r.set(2, true).await.unwrap();
        r.delete(3, true).await.unwrap();
        r.gat_miss(4, true).await.unwrap();
        assert!(r.into_inner().is_empty());
    }

    #[tokio::test]
    async fn test_miss_and_noop_end() {
        let mut r = responder();
        r.get(&GetResponse::miss(b"k2".to_vec(), 6, false))
            .await
            .unwrap();
        r.get_end(9, true).await.unwrap();
        let out = r.into_inner();
        let mut input: &[u8] = &out;
        let miss = read_response(&mut input).await.unwrap();
        assert_eq!(miss.status(), Status::KeyNotFound);
        assert_eq!(miss.opaque(), 6);
        let end = read_response(&mut input).await.unwrap();
        assert_eq!(end.header.opcode, opcode::NOOP);
        assert_eq!(end.opaque(), 9);
        assert!(input.is_empty());
    }

    #[tokio::test]
    async fn test_error_response() {
        let mut r = responder();
        r.error(3, RequestType::Unknown(Some(0x42)), &Error::unknown_command(), false)
            .await
            .unwrap();
        r.error(4, RequestType::Get, &Error::key_not_found(), true)
            .await
            .unwrap();
        r.error(5, RequestType::Set, &Error::not_stored(), true)
            .await
            .unwrap();
        let out = r.into_inner();
        let mut input: &[u8] = &out;
        let unknown = read_response(&mut input).await.unwrap();
        assert_eq!(unknown.status(), Status::UnknownCommand);
        assert_eq!(unknown.header.opcode, 0x42);
        assert_eq!(unknown.opaque(), 3);
        assert_eq!(unknown.value, b"unknown command");
        let not_stored = read_response(&mut input).await.unwrap();
        assert_eq!(not_stored.status(), Status::NotStored);
        assert_eq!(not_stored.header.opcode, opcode::SET);
        assert!(input.is_empty());
    }

    #[tokio::test]
    async fn test_version() {
        let mut r = responder();
        r.version(1).await.unwrap();
        let out = r.into_inner();
        let mut input: &[u8] = &out;
        assert_eq!(read_response(&mut input).await.unwrap().value, b"1.0.0");
    }
}
