//! OSC message codec.
//!
//! `rosc` handles the framing (4-byte aligned strings and blobs, type tag
//! strings, big-endian numbers). This module narrows its type system to the
//! argument kinds AbletonOSC speaks and turns every decode failure into a
//! [`CodecError`] instead of a panic.

use std::fmt;

use rosc::{decoder, encoder, OscMessage, OscPacket, OscType};

use crate::error::CodecError;

/// A single typed OSC argument.
#[derive(Debug, Clone, PartialEq)]
pub enum Arg {
    Int(i32),
    Float(f32),
    Str(String),
    Blob(Vec<u8>),
    Nil,
}

impl Arg {
    pub fn as_int(&self) -> Option<i32> {
        match self {
            Arg::Int(v) => Some(*v),
            _ => None,
        }
    }

    /// Floats, widening ints (peers send whole-number floats as ints).
    pub fn as_float(&self) -> Option<f32> {
        match self {
            Arg::Float(v) => Some(*v),
            Arg::Int(v) => Some(*v as f32),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Arg::Str(s) => Some(s),
            _ => None,
        }
    }

    /// Ints as booleans: anything non-zero is true.
    pub fn as_bool(&self) -> Option<bool> {
        self.as_int().map(|v| v != 0)
    }

    /// Short type name used in shape errors.
    pub fn type_name(&self) -> &'static str {
        match self {
            Arg::Int(_) => "int",
            Arg::Float(_) => "float",
            Arg::Str(_) => "string",
            Arg::Blob(_) => "blob",
            Arg::Nil => "nil",
        }
    }
}

impl fmt::Display for Arg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Arg::Int(v) => write!(f, "{}", v),
            Arg::Float(v) => write!(f, "{}", v),
            Arg::Str(s) => write!(f, "{:?}", s),
            Arg::Blob(b) => write!(f, "<{} bytes>", b.len()),
            Arg::Nil => write!(f, "nil"),
        }
    }
}

impl From<i32> for Arg {
    fn from(v: i32) -> Self {
        Arg::Int(v)
    }
}

impl From<f32> for Arg {
    fn from(v: f32) -> Self {
        Arg::Float(v)
    }
}

impl From<bool> for Arg {
    fn from(v: bool) -> Self {
        Arg::Int(v as i32)
    }
}

impl From<&str> for Arg {
    fn from(v: &str) -> Self {
        Arg::Str(v.to_string())
    }
}

impl From<String> for Arg {
    fn from(v: String) -> Self {
        Arg::Str(v)
    }
}

impl From<Vec<u8>> for Arg {
    fn from(v: Vec<u8>) -> Self {
        Arg::Blob(v)
    }
}

/// An OSC message: address path plus ordered arguments.
#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    pub address: String,
    pub args: Vec<Arg>,
}

impl Message {
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            args: Vec::new(),
        }
    }

    pub fn with_args(address: impl Into<String>, args: Vec<Arg>) -> Self {
        Self {
            address: address.into(),
            args,
        }
    }

    /// Append one argument.
    pub fn arg(mut self, arg: impl Into<Arg>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Whether the leading arguments equal `prefix`.
    pub fn starts_with(&self, prefix: &[Arg]) -> bool {
        self.args.len() >= prefix.len() && self.args.iter().zip(prefix).all(|(a, b)| a == b)
    }
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.address)?;
        for arg in &self.args {
            write!(f, " {}", arg)?;
        }
        Ok(())
    }
}

fn to_osc(arg: &Arg) -> OscType {
    match arg {
        Arg::Int(v) => OscType::Int(*v),
        Arg::Float(v) => OscType::Float(*v),
        Arg::Str(s) => OscType::String(s.clone()),
        Arg::Blob(b) => OscType::Blob(b.clone()),
        Arg::Nil => OscType::Nil,
    }
}

fn from_osc(address: &str, arg: OscType) -> Result<Arg, CodecError> {
    match arg {
        OscType::Int(v) => Ok(Arg::Int(v)),
        OscType::Float(v) => Ok(Arg::Float(v)),
        OscType::String(s) => Ok(Arg::Str(s)),
        OscType::Blob(b) => Ok(Arg::Blob(b)),
        OscType::Nil => Ok(Arg::Nil),
        OscType::Bool(b) => Ok(Arg::Int(b as i32)),
        OscType::Double(v) => Ok(Arg::Float(v as f32)),
        OscType::Long(v) => i32::try_from(v)
            .map(Arg::Int)
            .map_err(|_| CodecError::Malformed(format!("{}: 64-bit int {} does not fit", address, v))),
        OscType::Char(c) => Ok(Arg::Str(c.to_string())),
        other => Err(CodecError::Malformed(format!(
            "{}: unsupported argument type {:?}",
            address, other
        ))),
    }
}

fn from_osc_message(msg: OscMessage) -> Result<Message, CodecError> {
    let args = msg
        .args
        .into_iter()
        .map(|a| from_osc(&msg.addr, a))
        .collect::<Result<Vec<_>, _>>()?;
    Ok(Message {
        address: msg.addr,
        args,
    })
}

fn flatten(packet: OscPacket, out: &mut Vec<Message>) -> Result<(), CodecError> {
    match packet {
        OscPacket::Message(msg) => out.push(from_osc_message(msg)?),
        OscPacket::Bundle(bundle) => {
            for inner in bundle.content {
                flatten(inner, out)?;
            }
        }
    }
    Ok(())
}

fn decode_packet(buf: &[u8]) -> Result<OscPacket, CodecError> {
    let (_, packet) = decoder::decode_udp(buf).map_err(|e| CodecError::Malformed(format!("{:?}", e)))?;
    Ok(packet)
}

/// Encode a message into one datagram.
pub fn encode(msg: &Message) -> Result<Vec<u8>, CodecError> {
    if !msg.address.starts_with('/') {
        return Err(CodecError::Encode {
            address: msg.address.clone(),
            reason: "address must start with '/'".to_string(),
        });
    }
    if msg.address.contains('\0') {
        return Err(CodecError::Encode {
            address: msg.address.escape_default().to_string(),
            reason: "address contains NUL".to_string(),
        });
    }
    // OSC strings are NUL-terminated; an interior NUL would truncate on decode
    if let Some(pos) = msg
        .args
        .iter()
        .position(|arg| matches!(arg, Arg::Str(s) if s.contains('\0')))
    {
        return Err(CodecError::Encode {
            address: msg.address.clone(),
            reason: format!("string argument {} contains NUL", pos),
        });
    }
    let packet = OscPacket::Message(OscMessage {
        addr: msg.address.clone(),
        args: msg.args.iter().map(to_osc).collect(),
    });
    encoder::encode(&packet).map_err(|e| CodecError::Encode {
        address: msg.address.clone(),
        reason: format!("{:?}", e),
    })
}

/// Decode a datagram holding exactly one message. Bundles are rejected.
pub fn decode(buf: &[u8]) -> Result<Message, CodecError> {
    match decode_packet(buf)? {
        OscPacket::Message(msg) => from_osc_message(msg),
        OscPacket::Bundle(_) => Err(CodecError::Malformed(
            "expected a single message, got a bundle".to_string(),
        )),
    }
}

/// Decode a datagram into its messages, flattening nested bundles in order.
pub fn decode_datagram(buf: &[u8]) -> Result<Vec<Message>, CodecError> {
    let mut out = Vec::new();
    flatten(decode_packet(buf)?, &mut out)?;
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use rosc::{OscBundle, OscTime};

    fn sample() -> Message {
        Message::new("/live/clip/add/notes")
            .arg(0)
            .arg(1)
            .arg(60)
            .arg(0.5f32)
            .arg(0.25f32)
            .arg(100)
            .arg(false)
            .arg("name")
            .arg(vec![1u8, 2, 3])
    }

    #[test]
    fn round_trip() {
        let msg = sample();
        let bytes = encode(&msg).unwrap();
        assert_eq!(bytes.len() % 4, 0);
        assert_eq!(decode(&bytes).unwrap(), msg);
    }

    /// Argument of kind `kind % 5`, sized by `n` so strings and blobs
    /// cross every 4-byte padding boundary.
    fn generated_arg(kind: usize, n: usize) -> Arg {
        match kind % 5 {
            0 => Arg::Int((n as i32 - 4) * 1_000_003),
            1 => Arg::Float(n as f32 * -0.375),
            2 => Arg::Str("abcdefghij"[..n % 9].to_string()),
            3 => Arg::Blob((0..(n % 7) as u8).collect()),
            _ => Arg::Nil,
        }
    }

    #[test]
    fn round_trip_sweep() {
        let mut checked = 0;
        // Address lengths 2..=5 and 7 cover every padding remainder
        for address in ["/a", "/ab", "/abc", "/abcd", "/live/x"] {
            for arg_count in 0..=4 {
                for kind in 0..5 {
                    for n in 0..9 {
                        let args = (0..arg_count).map(|i| generated_arg(kind + i, n + i)).collect();
                        let msg = Message::with_args(address, args);
                        let bytes = encode(&msg).unwrap();
                        assert_eq!(bytes.len() % 4, 0, "{}", msg);
                        assert_eq!(decode(&bytes).unwrap(), msg);
                        checked += 1;
                    }
                }
            }
        }
        assert_eq!(checked, 5 * 5 * 5 * 9);
    }

    #[test]
    fn encode_rejects_interior_nul() {
        let arg = Message::new("/live/track/set/name").arg(0).arg("Bass\0Lead");
        assert_eq!(
            encode(&arg),
            Err(CodecError::Encode {
                address: "/live/track/set/name".to_string(),
                reason: "string argument 1 contains NUL".to_string(),
            })
        );
        assert!(matches!(
            encode(&Message::new("/live\0/test")),
            Err(CodecError::Encode { .. })
        ));
        // Trailing content that is not a NUL is fine
        assert!(encode(&Message::new("/live/track/set/name").arg(0).arg("Bass Lead")).is_ok());
    }

    #[test]
    fn bools_become_ints() {
        let msg = Message::new("/live/track/set/mute").arg(2).arg(true);
        assert_eq!(msg.args, vec![Arg::Int(2), Arg::Int(1)]);
    }

    #[test]
    fn truncated_frames_are_malformed() {
        let bytes = encode(&sample()).unwrap();
        for len in [0, 1, 3, 7, bytes.len() - 1] {
            assert!(
                matches!(decode(&bytes[..len]), Err(CodecError::Malformed(_))),
                "length {}",
                len
            );
        }
        assert!(decode(b"garbage!").is_err());
    }

    #[test]
    fn unknown_addresses_are_data() {
        let msg = Message::new("/not/a/real/path").arg("x");
        assert_eq!(decode(&encode(&msg).unwrap()).unwrap(), msg);
    }

    #[test]
    fn relaxed_types_normalize() {
        let packet = OscPacket::Message(OscMessage {
            addr: "/live/song/get/tempo".to_string(),
            args: vec![
                OscType::Double(120.0),
                OscType::Bool(true),
                OscType::Long(7),
                OscType::Char('x'),
            ],
        });
        let bytes = encoder::encode(&packet).unwrap();
        assert_eq!(
            decode(&bytes).unwrap().args,
            vec![Arg::Float(120.0), Arg::Int(1), Arg::Int(7), Arg::Str("x".to_string())]
        );

        let too_big = OscPacket::Message(OscMessage {
            addr: "/x".to_string(),
            args: vec![OscType::Long(i64::MAX)],
        });
        assert!(decode(&encoder::encode(&too_big).unwrap()).is_err());
    }

    #[test]
    fn bundles_flatten_in_order() {
        let inner = OscPacket::Bundle(OscBundle {
            timetag: OscTime::from((0, 1)),
            content: vec![OscPacket::Message(OscMessage {
                addr: "/b".to_string(),
                args: vec![OscType::Int(2)],
            })],
        });
        let outer = OscPacket::Bundle(OscBundle {
            timetag: OscTime::from((0, 1)),
            content: vec![
                OscPacket::Message(OscMessage {
                    addr: "/a".to_string(),
                    args: vec![OscType::Int(1)],
                }),
                inner,
                OscPacket::Message(OscMessage {
                    addr: "/c".to_string(),
                    args: vec![],
                }),
            ],
        });
        let bytes = encoder::encode(&outer).unwrap();

        let messages = decode_datagram(&bytes).unwrap();
        let addresses: Vec<&str> = messages.iter().map(|m| m.address.as_str()).collect();
        assert_eq!(addresses, vec!["/a", "/b", "/c"]);
        assert_eq!(messages[1].args, vec![Arg::Int(2)]);

        assert!(matches!(decode(&bytes), Err(CodecError::Malformed(_))));
    }

    #[test]
    fn encode_rejects_relative_address() {
        assert!(matches!(
            encode(&Message::new("live/test")),
            Err(CodecError::Encode { .. })
        ));
    }

    #[test]
    fn prefix_matching() {
        let msg = Message::new("/live/track/get/volume").arg(3).arg(0.5f32);
        assert!(msg.starts_with(&[]));
        assert!(msg.starts_with(&[Arg::Int(3)]));
        assert!(!msg.starts_with(&[Arg::Int(4)]));
        assert!(!msg.starts_with(&[Arg::Int(3), Arg::Float(0.5), Arg::Nil]));
        assert_eq!(msg.to_string(), "/live/track/get/volume 3 0.5");
    }
}
