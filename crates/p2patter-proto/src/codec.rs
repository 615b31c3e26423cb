//! Length-prefix framing and rkyv encoding of requests and responses.
//!
//! A frame is `[length (4 bytes BE)][payload]`. Payloads are rkyv archives
//! of [`Request`] or [`Response`].

use crate::message::{ArchivedRequest, ArchivedResponse, Request, Response};
use crate::Error;

/// Maximum payload size (4 MB).
pub const MAX_FRAME_SIZE: usize = 4 * 1024 * 1024;

/// Size of the length prefix in bytes.
pub const LENGTH_PREFIX_SIZE: usize = 4;

/// Wrap a payload in a length-prefixed frame.
pub fn frame(payload: &[u8]) -> Result<Vec<u8>, Error> {
    if payload.len() > MAX_FRAME_SIZE {
        return Err(Error::InvalidMessage(format!(
            "payload size {} exceeds maximum {}",
            payload.len(),
            MAX_FRAME_SIZE
        )));
    }

    let mut out = Vec::with_capacity(LENGTH_PREFIX_SIZE + payload.len());
    out.extend_from_slice(&(payload.len() as u32).to_be_bytes());
    out.extend_from_slice(payload);
    Ok(out)
}

/// Borrow the payload of a complete frame.
///
/// Trailing bytes past the declared length are ignored.
pub fn unframe(data: &[u8]) -> Result<&[u8], Error> {
    let header: [u8; LENGTH_PREFIX_SIZE] = data
        .get(..LENGTH_PREFIX_SIZE)
        .and_then(|h| h.try_into().ok())
        .ok_or_else(|| Error::InvalidMessage(format!("frame too short: {} bytes", data.len())))?;

    let len = u32::from_be_bytes(header) as usize;
    if len > MAX_FRAME_SIZE {
        return Err(Error::InvalidMessage(format!(
            "frame length {} exceeds maximum {}",
            len, MAX_FRAME_SIZE
        )));
    }

    data.get(LENGTH_PREFIX_SIZE..LENGTH_PREFIX_SIZE + len)
        .ok_or_else(|| {
            Error::InvalidMessage(format!(
                "frame incomplete: have {}, need {}",
                data.len(),
                LENGTH_PREFIX_SIZE + len
            ))
        })
}

/// Encode and frame a request.
pub fn encode_request(request: &Request) -> Result<Vec<u8>, Error> {
    let payload = rkyv::to_bytes::<rkyv::rancor::Error>(request)
        .map_err(|e| Error::Serialization(format!("failed to serialize request: {}", e)))?;
    frame(&payload)
}

/// Encode and frame a response.
pub fn encode_response(response: &Response) -> Result<Vec<u8>, Error> {
    let payload = rkyv::to_bytes::<rkyv::rancor::Error>(response)
        .map_err(|e| Error::Serialization(format!("failed to serialize response: {}", e)))?;
    frame(&payload)
}

/// Decode a framed request.
pub fn decode_request(data: &[u8]) -> Result<Request, Error> {
    // rkyv needs an aligned buffer for validated access.
    let mut aligned: rkyv::util::AlignedVec<16> = rkyv::util::AlignedVec::new();
    aligned.extend_from_slice(unframe(data)?);

    let archived = rkyv::access::<ArchivedRequest, rkyv::rancor::Error>(&aligned)
        .map_err(|e| Error::Deserialization(format!("failed to access request: {}", e)))?;
    rkyv::deserialize::<Request, rkyv::rancor::Error>(archived)
        .map_err(|e| Error::Deserialization(format!("failed to deserialize request: {}", e)))
}

/// Decode a framed response.
pub fn decode_response(data: &[u8]) -> Result<Response, Error> {
    let mut aligned: rkyv::util::AlignedVec<16> = rkyv::util::AlignedVec::new();
    aligned.extend_from_slice(unframe(data)?);

    let archived = rkyv::access::<ArchivedResponse, rkyv::rancor::Error>(&aligned)
        .map_err(|e| Error::Deserialization(format!("failed to access response: {}", e)))?;
    rkyv::deserialize::<Response, rkyv::rancor::Error>(archived)
        .map_err(|e| Error::Deserialization(format!("failed to deserialize response: {}", e)))
}
