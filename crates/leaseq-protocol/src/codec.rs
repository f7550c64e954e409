use crate::{Command, ProtocolError, Response, Result, MAX_REQUEST_SIZE};
use bytes::{BufMut, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

/// Broker side of a connection: decodes one request, encodes one response.
///
/// A request ends at the first newline or at end of stream. Callers that
/// neither terminate the line nor half-close can still be served by flushing
/// whatever is buffered with [`RequestCodec::take_partial`] after a quiet
/// period. Responses carry no trailing newline; the broker closes its write
/// side after sending.
#[derive(Debug, Default, Clone, Copy)]
pub struct RequestCodec;

impl RequestCodec {
    /// Treat everything buffered so far as the complete request
    pub fn take_partial(&mut self, src: &mut BytesMut) -> Result<Option<String>> {
        if src.is_empty() {
            return Ok(None);
        }
        let frame = src.split_to(src.len());
        decode_text(&frame).map(Some)
    }
}

impl Decoder for RequestCodec {
    type Item = String;
    type Error = ProtocolError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>> {
        if let Some(pos) = src.iter().position(|b| *b == b'\n') {
            if pos > MAX_REQUEST_SIZE {
                return Err(ProtocolError::RequestTooLarge(pos));
            }
            let line = src.split_to(pos + 1);
            return decode_text(&line[..pos]).map(Some);
        }

        if src.len() > MAX_REQUEST_SIZE {
            return Err(ProtocolError::RequestTooLarge(src.len()));
        }
        Ok(None)
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>> {
        match self.decode(src)? {
            Some(line) => Ok(Some(line)),
            None => self.take_partial(src),
        }
    }
}

impl Encoder<Response> for RequestCodec {
    type Error = ProtocolError;

    fn encode(&mut self, item: Response, dst: &mut BytesMut) -> Result<()> {
        let text = item.to_string();
        dst.reserve(text.len());
        dst.put_slice(text.as_bytes());
        Ok(())
    }
}

/// Client side of a connection: encodes one command as a line, and decodes
/// the reply once the broker has closed its write side.
#[derive(Debug, Default, Clone, Copy)]
pub struct ResponseCodec;

impl Decoder for ResponseCodec {
    type Item = String;
    type Error = ProtocolError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>> {
        if src.len() > MAX_REQUEST_SIZE {
            return Err(ProtocolError::RequestTooLarge(src.len()));
        }
        // The reply is only complete at end of stream
        Ok(None)
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>> {
        if src.is_empty() {
            return Ok(None);
        }
        let frame = src.split_to(src.len());
        decode_text(&frame).map(Some)
    }
}

impl Encoder<Command> for ResponseCodec {
    type Error = ProtocolError;

    fn encode(&mut self, item: Command, dst: &mut BytesMut) -> Result<()> {
        let text = item.to_string();
        if text.len() > MAX_REQUEST_SIZE {
            return Err(ProtocolError::RequestTooLarge(text.len()));
        }
        dst.reserve(text.len() + 1);
        dst.put_slice(text.as_bytes());
        dst.put_u8(b'\n');
        Ok(())
    }
}

fn decode_text(bytes: &[u8]) -> Result<String> {
    let text = std::str::from_utf8(bytes).map_err(|_| ProtocolError::InvalidUtf8)?;
    Ok(text.trim_end_matches(['\r', '\n']).to_string())
}
