use super::{encode_packet, opcode, Header, Status, HEADER_LEN, MAGIC_REQUEST, MAGIC_RESPONSE};
use crate::data::{
    DeleteRequest, GatRequest, GetRequest, NoopRequest, Opaque, QuitRequest, Request, SetRequest,
    StatRequest, TouchRequest, VersionRequest,
};
use crate::error::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

struct Packet {
    header: Header,
    extras: Vec<u8>,
    key: Vec<u8>,
    value: Vec<u8>,
}

/// Reads one whole packet, `None` if the stream ended on a packet boundary.
async fn read_packet<R>(reader: &mut R) -> Result<Option<Packet>, Error>
where
    R: AsyncRead + Unpin + ?Sized,
{
    let mut buf = [0_u8; HEADER_LEN];
    let n = reader.read(&mut buf).await?;
    if n == 0 {
        return Ok(None);
    }
    reader.read_exact(&mut buf[n..]).await?;
    let header = Header::parse(&buf);
    header.check_lengths()?;

    let mut body = vec![0_u8; header.body_len as usize];
    reader.read_exact(&mut body).await?;
    let extras_len = usize::from(header.extras_len);
    let key_end = extras_len + usize::from(header.key_len);
    let value = body.split_off(key_end);
    let key = body.split_off(extras_len);
    Ok(Some(Packet {
        header,
        extras: body,
        key,
        value,
    }))
}

/// Backend reply to a single client-side request.
#[derive(Debug, Clone)]
pub struct Response {
    pub header: Header,
    pub extras: Vec<u8>,
    pub key: Vec<u8>,
    pub value: Vec<u8>,
}

impl Response {
    pub fn status(&self) -> Status {
        self.header.status()
    }

    pub fn opaque(&self) -> Opaque {
        self.header.opaque
    }

    /// Item flags from the get/gat extras, zero when absent.
    pub fn flags(&self) -> u32 {
        read_u32(&self.extras, 0).unwrap_or(0)
    }

    /// Turns a non-zero status into an error. Internal errors keep the
    /// backend message carried in the value.
    pub fn into_result(self) -> Result<Self, Error> {
        match self.status() {
            Status::NoError => Ok(self),
            Status::InternalError | Status::OutOfMemory if !self.value.is_empty() => Err(
                Error::backend(String::from_utf8_lossy(&self.value).into_owned()),
            ),
            status => Err(status.into_error().unwrap_or_else(Error::internal)),
        }
    }
}

pub async fn read_response<R>(reader: &mut R) -> Result<Response, Error>
where
    R: AsyncRead + Unpin + ?Sized,
{
    let packet = read_packet(reader)
        .await?
        .ok_or_else(Error::connection_closed)?;
    if packet.header.magic != MAGIC_RESPONSE {
        return Err(Error::protocol(format!(
            "bad response magic {:#04x}",
            packet.header.magic
        )));
    }
    Ok(Response {
        header: packet.header,
        extras: packet.extras,
        key: packet.key,
        value: packet.value,
    })
}

pub async fn write_request<W>(
    writer: &mut W,
    op: u8,
    extras: &[u8],
    key: &[u8],
    value: &[u8],
    opaque: Opaque,
) -> Result<(), Error>
where
    W: AsyncWrite + Unpin + ?Sized,
{
    let header = Header::request(op, key.len(), extras.len(), value.len(), opaque);
    writer
        .write_all(&encode_packet(&header, extras, key, value))
        .await?;
    writer.flush().await?;
    Ok(())
}

pub async fn write_get<W>(writer: &mut W, key: &[u8], opaque: Opaque) -> Result<(), Error>
where
    W: AsyncWrite + Unpin + ?Sized,
{
    write_request(writer, opcode::GET, &[], key, &[], opaque).await
}

/// Writes a storage command. `op` is one of set, add, replace, append or
/// prepend; the last two carry no extras.
pub async fn write_set<W>(
    writer: &mut W,
    op: u8,
    item: &SetRequest,
    opaque: Opaque,
) -> Result<(), Error>
where
    W: AsyncWrite + Unpin + ?Sized,
{
    let mut extras = Vec::with_capacity(8);
    if op != opcode::APPEND && op != opcode::PREPEND {
        extras.extend_from_slice(&item.flags.to_be_bytes());
        extras.extend_from_slice(&item.exptime.to_be_bytes());
    }
    write_request(writer, op, &extras, &item.key, &item.data, opaque).await
}

pub async fn write_delete<W>(writer: &mut W, key: &[u8], opaque: Opaque) -> Result<(), Error>
where
    W: AsyncWrite + Unpin + ?Sized,
{
    write_request(writer, opcode::DELETE, &[], key, &[], opaque).await
}

pub async fn write_touch<W>(
    writer: &mut W,
    key: &[u8],
    exptime: u32,
    opaque: Opaque,
) -> Result<(), Error>
where
    W: AsyncWrite + Unpin + ?Sized,
{
    write_request(writer, opcode::TOUCH, &exptime.to_be_bytes(), key, &[], opaque).await
}

pub async fn write_gat<W>(
    writer: &mut W,
    key: &[u8],
    exptime: u32,
    opaque: Opaque,
) -> Result<(), Error>
where
    W: AsyncWrite + Unpin + ?Sized,
{
    write_request(writer, opcode::GAT, &exptime.to_be_bytes(), key, &[], opaque).await
}

/// Reads one client request. Quiet gets are gathered into a single batch
/// that ends at the first non-quiet get or no-op. Returns `None` when the
/// client closed the connection between requests.
pub async fn read_request<R>(reader: &mut R) -> Result<Option<Request>, Error>
where
    R: AsyncRead + Unpin + ?Sized,
{
    let packet = match read_packet(reader).await? {
        Some(packet) => packet,
        None => return Ok(None),
    };
    check_request_magic(&packet.header)?;
    match packet.header.opcode {
        opcode::GETQ | opcode::GETKQ => read_get_batch(reader, packet).await.map(Some),
        _ => decode_request(packet).map(Some),
    }
}

async fn read_get_batch<R>(reader: &mut R, first: Packet) -> Result<Request, Error>
where
    R: AsyncRead + Unpin + ?Sized,
{
    let mut batch = GetRequest::default();
    batch.push(first.key, first.header.opaque, true);
    loop {
        let packet = read_packet(reader)
            .await?
            .ok_or_else(Error::connection_closed)?;
        check_request_magic(&packet.header)?;
        let opaque = packet.header.opaque;
        match packet.header.opcode {
            opcode::GETQ | opcode::GETKQ => batch.push(packet.key, opaque, true),
            opcode::GET | opcode::GETK => {
                batch.push(packet.key, opaque, false);
                break;
            }
            opcode::NOOP => {
                batch.noop_end = true;
                batch.noop_opaque = opaque;
                break;
            }
            other => {
                return Err(Error::protocol(format!(
                    "opcode {:#04x} inside a quiet get batch",
                    other
                )))
            }
        }
    }
    trace!("read get batch of {} keys", batch.len());
    Ok(Request::Get(batch))
}

fn check_request_magic(header: &Header) -> Result<(), Error> {
    if header.magic == MAGIC_REQUEST {
        Ok(())
    } else {
        Err(Error::protocol(format!(
            "bad request magic {:#04x}",
            header.magic
        )))
    }
}

fn decode_request(packet: Packet) -> Result<Request, Error> {
    let Packet {
        header,
        extras,
        key,
        value,
    } = packet;
    let opaque = header.opaque;
    let op = header.opcode;
    let quiet = matches!(
        op,
        opcode::SETQ
            | opcode::ADDQ
            | opcode::REPLACEQ
            | opcode::APPENDQ
            | opcode::PREPENDQ
            | opcode::DELETEQ
            | opcode::QUITQ
            | opcode::GATQ
            | opcode::GATKQ
    );
    let needs_key = !matches!(
        op,
        opcode::NOOP | opcode::QUIT | opcode::QUITQ | opcode::VERSION | opcode::STAT
    );
    if needs_key && key.is_empty() && is_known(op) {
        return Err(Error::invalid_arguments());
    }

    let request = match op {
        opcode::GET | opcode::GETK => Request::Get(GetRequest::single(key, opaque, false)),
        opcode::SET | opcode::SETQ => Request::Set(storage(&extras, key, value, opaque, quiet)?),
        opcode::ADD | opcode::ADDQ => Request::Add(storage(&extras, key, value, opaque, quiet)?),
        opcode::REPLACE | opcode::REPLACEQ => {
            Request::Replace(storage(&extras, key, value, opaque, quiet)?)
        }
        opcode::APPEND | opcode::APPENDQ => Request::Append(concat(key, value, opaque, quiet)),
        opcode::PREPEND | opcode::PREPENDQ => Request::Prepend(concat(key, value, opaque, quiet)),
        opcode::DELETE | opcode::DELETEQ => Request::Delete(DeleteRequest { key, opaque, quiet }),
        opcode::TOUCH => Request::Touch(TouchRequest {
            key,
            exptime: read_u32(&extras, 0).ok_or_else(Error::invalid_arguments)?,
            opaque,
            quiet,
        }),
        opcode::GAT | opcode::GATQ | opcode::GATK | opcode::GATKQ => Request::Gat(GatRequest {
            key,
            exptime: read_u32(&extras, 0).ok_or_else(Error::invalid_arguments)?,
            opaque,
            quiet,
        }),
        opcode::NOOP => Request::Noop(NoopRequest { opaque }),
        opcode::QUIT | opcode::QUITQ => Request::Quit(QuitRequest { opaque, quiet }),
        opcode::VERSION => Request::Version(VersionRequest { opaque }),
        opcode::STAT => Request::Stat(StatRequest { opaque }),
        other => Request::Unknown {
            opcode: other,
            opaque,
        },
    };
    Ok(request)
}

fn is_known(op: u8) -> bool {
    matches!(
        op,
        opcode::GET
            | opcode::GETK
            | opcode::SET
            | opcode::SETQ
            | opcode::ADD
            | opcode::ADDQ
            | opcode::REPLACE
            | opcode::REPLACEQ
            | opcode::APPEND
            | opcode::APPENDQ
            | opcode::PREPEND
            | opcode::PREPENDQ
            | opcode::DELETE
            | opcode::DELETEQ
            | opcode::TOUCH
            | opcode::GAT
            | opcode::GATQ
            | opcode::GATK
            | opcode::GATKQ
    )
}

fn storage(
    extras: &[u8],
    key: Vec<u8>,
    data: Vec<u8>,
    opaque: Opaque,
    quiet: bool,
) -> Result<SetRequest, Error> {
    if extras.len() != 8 {
        return Err(Error::invalid_arguments());
    }
    Ok(SetRequest {
        key,
        data,
        flags: read_u32(extras, 0).ok_or_else(Error::invalid_arguments)?,
        exptime: read_u32(extras, 4).ok_or_else(Error::invalid_arguments)?,
        opaque,
        quiet,
    })
}

fn concat(key: Vec<u8>, data: Vec<u8>, opaque: Opaque, quiet: bool) -> SetRequest {
    SetRequest {
        key,
        data,
        flags: 0,
        exptime: 0,
        opaque,
        quiet,
    }
}

fn read_u32(buf: &[u8], offset: usize) -> Option<u32> {
    let bytes = buf.get(offset..offset + 4)?;
    Some(u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
}
