//! Payloads of the `MULTIPLE_MSP` container message
//!
//! The request lists one-byte sub-codes; the reply carries one
//! length-prefixed sub-payload per sub-code, in request order, for as many
//! sub-codes as fitted in the controller's reply buffer.

use bytes::{BufMut, Bytes, BytesMut};
use tracing::warn;

use crate::core::{Error, Result, MAX_V1_CODE};
use crate::protocol::message as codes;

/// Builds the request payload for a batch of sub-codes
pub fn encode_batch_request(sub_codes: &[u16]) -> Result<Bytes> {
    if sub_codes.is_empty() {
        return Err(Error::invalid_argument("batch needs at least one code"));
    }
    let mut dst = BytesMut::with_capacity(sub_codes.len());
    for &code in sub_codes {
        if code > MAX_V1_CODE || code == codes::MULTIPLE_MSP {
            return Err(Error::invalid_argument(format!(
                "{} cannot be carried in a batch",
                codes::describe(code)
            )));
        }
        dst.put_u8(code as u8);
    }
    Ok(dst.freeze())
}

/// Splits a batch reply into `(sub_code, payload)` pairs.
///
/// Only the answered prefix of `sub_codes` is returned; a final record that
/// announces more bytes than remain is dropped.
pub fn parse_batch_response(sub_codes: &[u16], payload: &Bytes) -> Vec<(u16, Bytes)> {
    let mut answered = Vec::with_capacity(sub_codes.len());
    let mut offset = 0;
    for &code in sub_codes {
        if offset >= payload.len() {
            break;
        }
        let len = payload[offset] as usize;
        let start = offset + 1;
        if start + len > payload.len() {
            warn!(code, len, available = payload.len() - start, "Truncated batch record");
            break;
        }
        answered.push((code, payload.slice(start..start + len)));
        offset = start + len;
    }
    answered
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_payload() {
        let payload = encode_batch_request(&[codes::STATUS, codes::ANALOG, codes::ATTITUDE]).unwrap();
        assert_eq!(&payload[..], &[101, 110, 108]);
    }

    #[test]
    fn test_request_rejects_wide_codes() {
        assert!(matches!(
            encode_batch_request(&[codes::STATUS, 0x1001]),
            Err(Error::InvalidArgument(_))
        ));
        assert!(encode_batch_request(&[]).is_err());
    }

    #[test]
    fn test_full_reply() {
        let reply = Bytes::from_static(&[2, 0xAA, 0xBB, 0, 1, 0xCC]);
        let parts = parse_batch_response(&[1, 2, 3], &reply);
        assert_eq!(parts.len(), 3);
        assert_eq!(&parts[0].1[..], &[0xAA, 0xBB]);
        assert!(parts[1].1.is_empty());
        assert_eq!(parts[2], (3, Bytes::from_static(&[0xCC])));
    }

    #[test]
    fn test_partial_reply() {
        let reply = Bytes::from_static(&[1, 7, 4, 1, 2]);
        let parts = parse_batch_response(&[10, 20, 30], &reply);
        assert_eq!(parts, vec![(10, Bytes::from_static(&[7]))]);
    }
}
