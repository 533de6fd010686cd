//! msgpack-rpc framing
//!
//! Messages are bare MessagePack arrays on the stream, with no length prefix:
//!
//! - request: `[0, msgid, method, params]`
//! - response: `[1, msgid, error, result]`
//! - notification: `[2, method, params]`
//!
//! Because there is no framing, the reader decodes from an accumulating
//! buffer and treats an early EOF inside the buffer as "need more bytes".

use rmpv::Value;
use std::io::{Cursor, ErrorKind};

use crate::error::RpcError;

const REQUEST: u64 = 0;
const RESPONSE: u64 = 1;
const NOTIFICATION: u64 = 2;

/// A decoded msgpack-rpc message.
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    Request {
        id: u32,
        method: String,
        params: Vec<Value>,
    },
    Response {
        id: u32,
        /// `Err` carries the server's error object
        result: Result<Value, Value>,
    },
    Notification {
        method: String,
        params: Vec<Value>,
    },
}

pub fn encode_request(id: u32, method: &str, params: Vec<Value>) -> Result<Vec<u8>, RpcError> {
    encode(&Value::Array(vec![
        Value::from(REQUEST),
        Value::from(id),
        Value::from(method),
        Value::Array(params),
    ]))
}

pub fn encode_notification(method: &str, params: Vec<Value>) -> Result<Vec<u8>, RpcError> {
    encode(&Value::Array(vec![
        Value::from(NOTIFICATION),
        Value::from(method),
        Value::Array(params),
    ]))
}

pub fn encode_response(id: u32, result: Result<Value, Value>) -> Result<Vec<u8>, RpcError> {
    let (error, result) = match result {
        Ok(value) => (Value::Nil, value),
        Err(error) => (error, Value::Nil),
    };
    encode(&Value::Array(vec![
        Value::from(RESPONSE),
        Value::from(id),
        error,
        result,
    ]))
}

fn encode(value: &Value) -> Result<Vec<u8>, RpcError> {
    let mut buf = Vec::new();
    rmpv::encode::write_value(&mut buf, value)
        .map_err(|e| RpcError::Protocol(format!("Failed to encode MessagePack: {e}")))?;
    Ok(buf)
}

/// Decode one value from the front of `buf`.
///
/// Returns the value and the number of bytes it occupied, or `None` when
/// `buf` holds only part of a value.
pub fn try_decode(buf: &[u8]) -> Result<Option<(Value, usize)>, RpcError> {
    let mut cursor = Cursor::new(buf);
    match rmpv::decode::read_value(&mut cursor) {
        Ok(value) => Ok(Some((value, cursor.position() as usize))),
        Err(e) if is_truncated(&e) => Ok(None),
        Err(e) => Err(RpcError::Protocol(format!("Failed to decode MessagePack: {e}"))),
    }
}

fn is_truncated(err: &rmpv::decode::Error) -> bool {
    match err {
        rmpv::decode::Error::InvalidMarkerRead(io) | rmpv::decode::Error::InvalidDataRead(io) => {
            io.kind() == ErrorKind::UnexpectedEof
        }
        _ => false,
    }
}

/// Interpret a decoded value as a msgpack-rpc message.
pub fn parse_message(value: Value) -> Result<Message, RpcError> {
    let Value::Array(items) = value else {
        return Err(RpcError::Protocol(format!(
            "Expected message array, got {value}"
        )));
    };

    let kind = items.first().and_then(Value::as_u64);
    let mut fields = items.into_iter().skip(1);
    match (kind, fields.len()) {
        (Some(REQUEST), 3) => {
            let id = msgid(fields.next())?;
            let method = method_name(fields.next())?;
            let params = param_list(fields.next())?;
            Ok(Message::Request { id, method, params })
        }
        (Some(RESPONSE), 3) => {
            let id = msgid(fields.next())?;
            let error = fields.next().unwrap_or(Value::Nil);
            let result = fields.next().unwrap_or(Value::Nil);
            let result = if error.is_nil() { Ok(result) } else { Err(error) };
            Ok(Message::Response { id, result })
        }
        (Some(NOTIFICATION), 2) => {
            let method = method_name(fields.next())?;
            let params = param_list(fields.next())?;
            Ok(Message::Notification { method, params })
        }
        (kind, len) => Err(RpcError::Protocol(format!(
            "Unrecognized message type {kind:?} with {len} fields"
        ))),
    }
}

/// Human-readable text for a server error object.
pub fn error_message(error: &Value) -> String {
    match error.as_str() {
        Some(text) => text.to_string(),
        None => error.to_string(),
    }
}

fn msgid(value: Option<Value>) -> Result<u32, RpcError> {
    value
        .as_ref()
        .and_then(Value::as_u64)
        .and_then(|id| u32::try_from(id).ok())
        .ok_or_else(|| RpcError::Protocol(format!("Invalid message id: {value:?}")))
}

fn method_name(value: Option<Value>) -> Result<String, RpcError> {
    value
        .as_ref()
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| RpcError::Protocol(format!("Invalid method name: {value:?}")))
}

fn param_list(value: Option<Value>) -> Result<Vec<Value>, RpcError> {
    match value {
        Some(Value::Array(params)) => Ok(params),
        other => Err(RpcError::Protocol(format!("Invalid params: {other:?}"))),
    }
}
