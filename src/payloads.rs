use anyhow::bail;
use bytes::{Buf, BufMut, BytesMut};
use bytes_varint::{VarIntSupport, VarIntSupportMut};

//NB: The overlay wraps these payloads in its own envelope (addressing,
//     authentication); this codec covers only the transfer payloads proper.
//     All fixed-width numbers are big-endian, strings are varint
//     length-prefixed UTF-8, and the last bytes field of a payload runs to
//     the end of the buffer.

/// Opens a transfer: advertises the blob and asks the receiver to start
///  acknowledging.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WriteRequestPayload {
    pub data_size: u32,
    pub block_count: u32,
    pub nonce: u64,
    pub id: String,
    pub info: Vec<u8>,
}

/// Names the next block the receiver expects, and how many blocks the sender
///  may emit before the next acknowledgement.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AcknowledgementPayload {
    pub number: u32,
    pub window_size: u32,
    pub nonce: u64,
}

/// One block of the blob.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DataPayload {
    pub block_number: u32,
    pub nonce: u64,
    pub data: Vec<u8>,
}

/// Tells the sender that its flow was rejected or aborted on the remote side.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ErrorPayload {
    pub message: String,
    pub info: String,
}

const KIND_WRITE_REQUEST: u8 = 1;
const KIND_ACKNOWLEDGEMENT: u8 = 2;
const KIND_DATA: u8 = 3;
const KIND_ERROR: u8 = 4;

/// The four payload kinds of the transfer protocol, with a one-byte kind tag
///  in the serialized representation.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TransferPayload {
    WriteRequest(WriteRequestPayload),
    Acknowledgement(AcknowledgementPayload),
    Data(DataPayload),
    Error(ErrorPayload),
}

impl TransferPayload {
    pub fn ser(&self, buf: &mut BytesMut) {
        match self {
            TransferPayload::WriteRequest(p) => {
                buf.put_u8(KIND_WRITE_REQUEST);
                buf.put_u32(p.data_size);
                buf.put_u32(p.block_count);
                buf.put_u64(p.nonce);
                put_string(buf, &p.id);
                buf.put_slice(&p.info);
            }
            TransferPayload::Acknowledgement(p) => {
                buf.put_u8(KIND_ACKNOWLEDGEMENT);
                buf.put_u32(p.number);
                buf.put_u32(p.window_size);
                buf.put_u64(p.nonce);
            }
            TransferPayload::Data(p) => {
                buf.put_u8(KIND_DATA);
                buf.put_u32(p.block_number);
                buf.put_u64(p.nonce);
                buf.put_slice(&p.data);
            }
            TransferPayload::Error(p) => {
                buf.put_u8(KIND_ERROR);
                put_string(buf, &p.message);
                put_string(buf, &p.info);
            }
        }
    }

    pub fn deser(buf: &mut impl Buf) -> anyhow::Result<TransferPayload> {
        let result = match buf.try_get_u8()? {
            KIND_WRITE_REQUEST => TransferPayload::WriteRequest(WriteRequestPayload {
                data_size: buf.try_get_u32()?,
                block_count: buf.try_get_u32()?,
                nonce: buf.try_get_u64()?,
                id: get_string(buf)?,
                info: get_trailing(buf),
            }),
            KIND_ACKNOWLEDGEMENT => TransferPayload::Acknowledgement(AcknowledgementPayload {
                number: buf.try_get_u32()?,
                window_size: buf.try_get_u32()?,
                nonce: buf.try_get_u64()?,
            }),
            KIND_DATA => TransferPayload::Data(DataPayload {
                block_number: buf.try_get_u32()?,
                nonce: buf.try_get_u64()?,
                data: get_trailing(buf),
            }),
            KIND_ERROR => TransferPayload::Error(ErrorPayload {
                message: get_string(buf)?,
                info: get_string(buf)?,
            }),
            kind => bail!("unknown payload kind {}", kind),
        };
        Ok(result)
    }

    /// The nonce of the flow this payload belongs to, where there is one.
    pub fn nonce(&self) -> Option<u64> {
        match self {
            TransferPayload::WriteRequest(p) => Some(p.nonce),
            TransferPayload::Acknowledgement(p) => Some(p.nonce),
            TransferPayload::Data(p) => Some(p.nonce),
            TransferPayload::Error(_) => None,
        }
    }
}

fn put_string(buf: &mut BytesMut, s: &str) {
    buf.put_usize_varint(s.len());
    buf.put_slice(s.as_bytes());
}

fn get_string(buf: &mut impl Buf) -> anyhow::Result<String> {
    let len = buf.try_get_usize_varint()?;
    if buf.remaining() < len {
        bail!("string of declared length {} exceeds the buffer", len);
    }
    let raw = buf.copy_to_bytes(len);
    Ok(String::from_utf8(raw.to_vec())?)
}

fn get_trailing(buf: &mut impl Buf) -> Vec<u8> {
    let mut result = vec![0; buf.remaining()];
    buf.copy_to_slice(&mut result);
    result
}
