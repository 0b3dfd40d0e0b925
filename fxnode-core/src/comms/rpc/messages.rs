//! Request and reply layouts.
//!
//! A request is the list `[id, type, method, args, kwargs]` with type `1` for a
//! request expecting a reply and `2` for a notification. A reply is the map
//! `{"id": id, "response": value}` or `{"id": id, "error": message}`.

use crate::comms::rpc::methods::RpcArgs;
use crate::error::RpcError;
use fxnode::{Value, ValueMap};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageType {
    Request = 1,
    Notify = 2,
}

impl TryFrom<i64> for MessageType {
    type Error = RpcError;

    fn try_from(code: i64) -> Result<Self, Self::Error> {
        match code {
            1 => Ok(MessageType::Request),
            2 => Ok(MessageType::Notify),
            other => Err(RpcError::Protocol(format!("unknown message type {}", other))),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Request {
    pub id: i64,
    pub kind: MessageType,
    pub method: String,
    pub args: RpcArgs,
}

impl Request {
    pub fn new(id: i64, kind: MessageType, method: impl Into<String>, args: RpcArgs) -> Self {
        Self {
            id,
            kind,
            method: method.into(),
            args,
        }
    }

    pub fn to_value(&self) -> Value {
        Value::List(vec![
            Value::Int(self.id),
            Value::Int(self.kind as i64),
            Value::from(self.method.as_str()),
            Value::List(self.args.args.clone()),
            Value::Map(self.args.kwargs.clone()),
        ])
    }

    pub fn from_value(value: Value) -> Result<Self, RpcError> {
        let items = value
            .into_list()
            .ok_or_else(|| RpcError::Protocol("request must be a list".into()))?;
        let [id, kind, method, args, kwargs]: [Value; 5] = items
            .try_into()
            .map_err(|items: Vec<Value>| {
                RpcError::Protocol(format!("request must have 5 items, got {}", items.len()))
            })?;
        let id = match id {
            Value::Int(id) => id,
            other => return Err(RpcError::Protocol(format!("bad message id {}", other))),
        };
        let kind = match kind {
            Value::Int(code) => MessageType::try_from(code)?,
            other => return Err(RpcError::Protocol(format!("bad message type {}", other))),
        };
        let method = match method {
            Value::Str(method) => method,
            other => return Err(RpcError::Protocol(format!("bad method name {}", other))),
        };
        let args = match args {
            Value::List(args) => args,
            Value::Nil => Vec::new(),
            other => return Err(RpcError::Protocol(format!("bad positional args {}", other))),
        };
        let kwargs = match kwargs {
            Value::Map(kwargs) => kwargs,
            Value::Nil => ValueMap::new(),
            other => return Err(RpcError::Protocol(format!("bad keyword args {}", other))),
        };
        Ok(Self::new(id, kind, method, RpcArgs { args, kwargs }))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Reply {
    Response { id: i64, value: Value },
    Error { id: i64, message: String },
}

impl Reply {
    /// Turns a handler outcome into a reply for request `id`.
    pub fn from_result(id: i64, result: Result<Value, RpcError>) -> Self {
        match result {
            Ok(value) => Reply::Response { id, value },
            Err(e) => Reply::Error {
                id,
                message: e.to_string(),
            },
        }
    }

    pub fn id(&self) -> i64 {
        match self {
            Reply::Response { id, .. } | Reply::Error { id, .. } => *id,
        }
    }

    pub fn into_result(self) -> Result<Value, RpcError> {
        match self {
            Reply::Response { value, .. } => Ok(value),
            Reply::Error { message, .. } => Err(RpcError::Remote(message)),
        }
    }

    pub fn to_value(&self) -> Value {
        let mut map = ValueMap::new();
        match self {
            Reply::Response { id, value } => {
                map.insert("id".into(), Value::Int(*id));
                map.insert("response".into(), value.clone());
            }
            Reply::Error { id, message } => {
                map.insert("id".into(), Value::Int(*id));
                map.insert("error".into(), Value::from(message.as_str()));
            }
        }
        Value::Map(map)
    }

    pub fn from_value(value: Value) -> Result<Self, RpcError> {
        let mut map = value
            .into_map()
            .ok_or_else(|| RpcError::Protocol("reply must be a map".into()))?;
        let id = match map.remove("id") {
            Some(Value::Int(id)) => id,
            other => return Err(RpcError::Protocol(format!("bad reply id {:?}", other))),
        };
        if let Some(error) = map.remove("error").filter(|e| !e.is_nil()) {
            let message = match error {
                Value::Str(message) => message,
                other => other.to_string(),
            };
            return Ok(Reply::Error { id, message });
        }
        match map.remove("response") {
            Some(value) => Ok(Reply::Response { id, value }),
            None => Err(RpcError::Protocol("reply has neither response nor error".into())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_layout() {
        let args = RpcArgs::from(vec![Value::from("x")]).kwarg("k", 1);
        let request = Request::new(7, MessageType::Notify, "subscribe", args);
        let value = request.to_value();
        let items = value.as_list().unwrap();
        assert_eq!(items[0], Value::Int(7));
        assert_eq!(items[1], Value::Int(2));
        assert_eq!(items[2], Value::from("subscribe"));
        assert_eq!(Request::from_value(value).unwrap(), request);
    }

    #[test]
    fn test_malformed_requests() {
        assert!(Request::from_value(Value::from(1)).is_err());
        assert!(Request::from_value(Value::List(vec![Value::Int(1)])).is_err());
        let bad_type = Value::List(vec![
            Value::Int(1),
            Value::Int(9),
            Value::from("echo"),
            Value::List(vec![]),
            Value::Map(ValueMap::new()),
        ]);
        assert!(matches!(Request::from_value(bad_type), Err(RpcError::Protocol(_))));
    }

    #[test]
    fn test_reply_forms() {
        let ok = Reply::from_result(3, Ok(Value::from("pong")));
        assert_eq!(Reply::from_value(ok.to_value()).unwrap(), ok);
        assert_eq!(ok.into_result().unwrap(), Value::from("pong"));

        let err = Reply::from_result(4, Err(RpcError::MethodNotFound("nope".into())));
        let decoded = Reply::from_value(err.to_value()).unwrap();
        assert_eq!(decoded.id(), 4);
        match decoded.into_result() {
            Err(RpcError::Remote(message)) => assert_eq!(message, "method not found: nope"),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_nil_response_is_a_response() {
        let reply = Reply::from_result(1, Ok(Value::Nil));
        assert_eq!(Reply::from_value(reply.to_value()).unwrap().into_result().unwrap(), Value::Nil);
    }
}
