//! Frame codec.
//!
//! Every message on the wire is one flat JSON object. The integer `op` field
//! is the discriminator and all other fields sit next to it at the top level:
//!
//! ```json
//! {"op": 4, "exec_op": "GET_SOCIAL_ACCOUNT", "callback_id": "req_3", "player_name": "Steve"}
//! ```
//!
//! Unknown op codes decode fine so that newer backends can add frames
//! without breaking older clients; the connection manager just logs them.

use serde_json::{Map, Value};

use crate::error::LinkError;

/// Op-specific fields of a frame.
pub type Payload = Map<String, Value>;

/// Known frame discriminators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OpCode {
    /// server -> client handshake greeting
    Hello,
    /// client -> server authentication
    Auth,
    /// client -> server keepalive
    Heartbeat,
    /// server -> client authentication acknowledged
    AuthAck,
    /// command invocation, either direction
    Exec,
    /// command result, either direction
    Response,
}

impl OpCode {
    pub fn code(self) -> u64 {
        match self {
            OpCode::Hello => 0,
            OpCode::Auth => 1,
            OpCode::Heartbeat => 2,
            OpCode::AuthAck => 3,
            OpCode::Exec => 4,
            OpCode::Response => 5,
        }
    }

    pub fn from_code(code: u64) -> Option<Self> {
        match code {
            0 => Some(OpCode::Hello),
            1 => Some(OpCode::Auth),
            2 => Some(OpCode::Heartbeat),
            3 => Some(OpCode::AuthAck),
            4 => Some(OpCode::Exec),
            5 => Some(OpCode::Response),
            _ => None,
        }
    }
}

/// A decoded frame: the raw op code plus everything else.
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    pub op: u64,
    pub payload: Payload,
}

impl Frame {
    pub fn new(op: OpCode, payload: Payload) -> Self {
        Self {
            op: op.code(),
            payload,
        }
    }

    /// A frame with no fields besides `op`.
    pub fn empty(op: OpCode) -> Self {
        Self::new(op, Payload::new())
    }

    /// The known op code, or `None` for codes this client doesn't understand.
    pub fn opcode(&self) -> Option<OpCode> {
        OpCode::from_code(self.op)
    }

    /// Looks up a string field, accepting numbers as well since some
    /// backends send ids unquoted.
    pub fn str_field(&self, name: &str) -> Option<String> {
        match self.payload.get(name)? {
            Value::String(s) => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        }
    }
}

/// Serializes a frame into its wire text.
///
/// `op` is written last so a stray `op` key in the payload can never change
/// the discriminator.
pub fn encode(frame: &Frame) -> Result<String, LinkError> {
    let mut object = frame.payload.clone();
    object.insert("op".to_string(), Value::from(frame.op));
    Ok(serde_json::to_string(&Value::Object(object))?)
}

/// Parses wire text into a frame.
///
/// Fails with [`LinkError::Protocol`] when the text is not a JSON object or
/// when `op` is missing or not a non-negative integer.
pub fn decode(text: &str) -> Result<Frame, LinkError> {
    let value: Value = serde_json::from_str(text)
        .map_err(|e| LinkError::Protocol(format!("frame is not valid JSON: {e}")))?;

    let Value::Object(mut payload) = value else {
        return Err(LinkError::Protocol("frame is not a JSON object".to_string()));
    };

    let op = match payload.remove("op") {
        Some(Value::Number(n)) => n
            .as_u64()
            .ok_or_else(|| LinkError::Protocol(format!("invalid op code: {n}")))?,
        Some(other) => {
            return Err(LinkError::Protocol(format!("op must be an integer, got {other}")))
        }
        None => return Err(LinkError::Protocol("frame has no op field".to_string())),
    };

    Ok(Frame { op, payload })
}
