// Copyright 2021 Google LLC
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//      http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.
//
////////////////////////////////////////////////////////////////////////////////

//! Framing of requests and responses on a secure stream.
//!
//! Each message is a CBOR array preceded by its length as a 32-bit big-endian integer.
//!
//! ```cddl
//!   request = [method: uint, path: tstr, content-format: uint / nil, accept: uint / nil,
//!              payload: bstr]
//!   response = [code: uint, content-format: uint / nil, payload: bstr, diagnostic: tstr / nil]
//! ```
//!
//! Method and response codes use the CoAP packing `class << 5 | detail`.

use crate::{
    cbor::value::Value,
    common::{AsCborValue, CborSerializable},
    iana::{ContentFormat, EnumI64},
    message::{Method, Request, Response, ResponseCode},
    util::{cbor_type_error, ValueTryAs},
    CodecError, Result,
};
use std::io::{self, Read, Write};

/// Largest frame body accepted.
pub const MAX_FRAME_SIZE: usize = 64 * 1024;

/// Write `body` as one frame.
pub fn write_frame<W: Write>(w: &mut W, body: &[u8]) -> io::Result<()> {
    let len = u32::try_from(body.len())
        .ok()
        .filter(|_| body.len() <= MAX_FRAME_SIZE)
        .ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("frame of {} bytes exceeds maximum {}", body.len(), MAX_FRAME_SIZE),
            )
        })?;
    w.write_all(&len.to_be_bytes())?;
    w.write_all(body)?;
    w.flush()
}

/// Read one frame body; `None` if the stream ends before a frame starts.
pub fn read_frame<R: Read>(r: &mut R) -> io::Result<Option<Vec<u8>>> {
    let mut header = [0u8; 4];
    match r.read_exact(&mut header) {
        Ok(()) => {}
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e),
    }
    let len = u32::from_be_bytes(header) as usize;
    if len > MAX_FRAME_SIZE {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("frame of {} bytes exceeds maximum {}", len, MAX_FRAME_SIZE),
        ));
    }
    let mut body = vec![0u8; len];
    r.read_exact(&mut body)?;
    Ok(Some(body))
}

fn fields<const N: usize>(value: Value) -> Result<[Value; N]> {
    match value {
        Value::Array(a) => a
            .try_into()
            .map_err(|_| CodecError::UnexpectedItem("array", "frame fields")),
        v => cbor_type_error(&v, "array"),
    }
}

fn content_format_to_value(content_format: Option<ContentFormat>) -> Value {
    content_format.map_or(Value::Null, |cf| Value::Integer(cf.to_i64().into()))
}

fn content_format_from_value(value: Value) -> Result<Option<ContentFormat>> {
    match value {
        Value::Null => Ok(None),
        v => ContentFormat::from_i64(v.try_as_i64()?)
            .map(Some)
            .ok_or(CodecError::UnexpectedItem("int", "content format")),
    }
}

impl AsCborValue for Request {
    /// Decode a request; the result carries no peer session.
    fn from_cbor_value(value: Value) -> Result<Self> {
        let [method, path, content_format, accept, payload] = fields(value)?;
        let method = u8::try_from(method.try_as_i64()?)?;
        Ok(Self {
            method: Method::from_code(method).ok_or(CodecError::UnexpectedItem("int", "method"))?,
            path: path.try_as_string()?,
            content_format: content_format_from_value(content_format)?,
            accept: content_format_from_value(accept)?,
            payload: payload.try_as_bytes()?,
            peer: None,
        })
    }

    fn to_cbor_value(self) -> Result<Value> {
        Ok(Value::Array(vec![
            Value::Integer(self.method.code().into()),
            Value::Text(self.path),
            content_format_to_value(self.content_format),
            content_format_to_value(self.accept),
            Value::Bytes(self.payload),
        ]))
    }
}

impl CborSerializable for Request {}

impl AsCborValue for Response {
    fn from_cbor_value(value: Value) -> Result<Self> {
        let [code, content_format, payload, diagnostic] = fields(value)?;
        let code = u8::try_from(code.try_as_i64()?)?;
        let code = ResponseCode::from_parts(code >> 5, code & 0x1f)
            .ok_or(CodecError::UnexpectedItem("int", "response code"))?;
        Ok(Self {
            code,
            content_format: content_format_from_value(content_format)?,
            payload: payload.try_as_bytes()?,
            diagnostic: match diagnostic {
                Value::Null => None,
                v => Some(v.try_as_string()?),
            },
        })
    }

    fn to_cbor_value(self) -> Result<Value> {
        let (class, detail) = self.code.parts();
        Ok(Value::Array(vec![
            Value::Integer((class << 5 | detail).into()),
            content_format_to_value(self.content_format),
            Value::Bytes(self.payload),
            self.diagnostic.map_or(Value::Null, Value::Text),
        ]))
    }
}

impl CborSerializable for Response {}
