//! Reply signatures.
//!
//! Each AbletonOSC getter answers with a fixed argument layout: usually the
//! echoed indices followed by the value. Replies are checked against the
//! expected layout before anything reads them, so a peer speaking a different
//! protocol version fails loudly instead of producing garbage results.

use liveproto::{Arg, Message};

use crate::error::BridgeError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArgKind {
    Int,
    Float,
    /// Int or float; peers send whole-number floats either way
    Number,
    /// Int 0 or 1 (OSC true/false arrive as ints)
    Bool,
    Str,
    Blob,
}

impl ArgKind {
    pub fn accepts(&self, arg: &Arg) -> bool {
        match (self, arg) {
            (ArgKind::Int, Arg::Int(_)) => true,
            (ArgKind::Float, Arg::Float(_)) => true,
            (ArgKind::Number, Arg::Int(_) | Arg::Float(_)) => true,
            (ArgKind::Bool, Arg::Int(v)) => *v == 0 || *v == 1,
            (ArgKind::Str, Arg::Str(_)) => true,
            (ArgKind::Blob, Arg::Blob(_)) => true,
            _ => false,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            ArgKind::Int => "int",
            ArgKind::Float => "float",
            ArgKind::Number => "number",
            ArgKind::Bool => "bool",
            ArgKind::Str => "string",
            ArgKind::Blob => "blob",
        }
    }
}

fn signature(kinds: &[ArgKind]) -> String {
    let names: Vec<&str> = kinds.iter().map(|k| k.name()).collect();
    format!("({})", names.join(", "))
}

fn actual_signature(msg: &Message) -> String {
    let names: Vec<&str> = msg.args.iter().map(|a| a.type_name()).collect();
    format!("({})", names.join(", "))
}

fn mismatch(msg: &Message, expected: String) -> BridgeError {
    BridgeError::ShapeMismatch {
        address: msg.address.clone(),
        expected,
        actual: actual_signature(msg),
    }
}

/// Exact argument count and kinds.
pub fn expect_shape(msg: &Message, kinds: &[ArgKind]) -> Result<(), BridgeError> {
    if msg.args.len() == kinds.len() && kinds.iter().zip(&msg.args).all(|(k, a)| k.accepts(a)) {
        Ok(())
    } else {
        Err(mismatch(msg, signature(kinds)))
    }
}

/// A fixed prefix followed by zero or more whole groups of `repeat`.
/// Returns the number of groups.
pub fn expect_prefix_then_repeating(
    msg: &Message,
    prefix: &[ArgKind],
    repeat: &[ArgKind],
) -> Result<usize, BridgeError> {
    let expected = || {
        let mut s = signature(prefix);
        s.push_str(&format!(" + {}*", signature(repeat)));
        s
    };

    if msg.args.len() < prefix.len() || repeat.is_empty() {
        return Err(mismatch(msg, expected()));
    }
    let (head, tail) = msg.args.split_at(prefix.len());
    if !prefix.iter().zip(head).all(|(k, a)| k.accepts(a)) || tail.len() % repeat.len() != 0 {
        return Err(mismatch(msg, expected()));
    }
    let groups_ok = tail
        .chunks(repeat.len())
        .all(|group| repeat.iter().zip(group).all(|(k, a)| k.accepts(a)));
    if !groups_ok {
        return Err(mismatch(msg, expected()));
    }
    Ok(tail.len() / repeat.len())
}

/// Typed access to a reply that already passed a shape check.
///
/// Accessors still fail with `ShapeMismatch` rather than panicking if used
/// on the wrong index.
pub struct Reply<'a> {
    msg: &'a Message,
}

impl<'a> Reply<'a> {
    pub fn checked(msg: &'a Message, kinds: &[ArgKind]) -> Result<Self, BridgeError> {
        expect_shape(msg, kinds)?;
        Ok(Self { msg })
    }

    pub fn unchecked(msg: &'a Message) -> Self {
        Self { msg }
    }

    fn arg(&self, index: usize, kind: ArgKind) -> Result<&'a Arg, BridgeError> {
        self.msg
            .args
            .get(index)
            .filter(|a| kind.accepts(a))
            .ok_or_else(|| mismatch(self.msg, format!("{} at position {}", kind.name(), index)))
    }

    pub fn int(&self, index: usize) -> Result<i32, BridgeError> {
        let arg = self.arg(index, ArgKind::Int)?;
        arg.as_int().ok_or_else(|| mismatch(self.msg, "int".to_string()))
    }

    pub fn number(&self, index: usize) -> Result<f64, BridgeError> {
        let arg = self.arg(index, ArgKind::Number)?;
        arg.as_float()
            .map(f64::from)
            .ok_or_else(|| mismatch(self.msg, "number".to_string()))
    }

    pub fn bool(&self, index: usize) -> Result<bool, BridgeError> {
        let arg = self.arg(index, ArgKind::Bool)?;
        arg.as_bool().ok_or_else(|| mismatch(self.msg, "bool".to_string()))
    }

    pub fn str(&self, index: usize) -> Result<&'a str, BridgeError> {
        let arg = self.arg(index, ArgKind::Str)?;
        arg.as_str().ok_or_else(|| mismatch(self.msg, "string".to_string()))
    }

    pub fn len(&self) -> usize {
        self.msg.args.len()
    }

    pub fn is_empty(&self) -> bool {
        self.msg.args.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn exact_shapes() {
        let msg = Message::new("/live/track/get/volume").arg(2).arg(0.85f32);
        assert!(expect_shape(&msg, &[ArgKind::Int, ArgKind::Float]).is_ok());
        assert!(expect_shape(&msg, &[ArgKind::Int, ArgKind::Number]).is_ok());

        let err = expect_shape(&msg, &[ArgKind::Int, ArgKind::Str]).unwrap_err();
        assert_eq!(
            err,
            BridgeError::ShapeMismatch {
                address: "/live/track/get/volume".to_string(),
                expected: "(int, string)".to_string(),
                actual: "(int, float)".to_string(),
            }
        );
        assert!(expect_shape(&msg, &[ArgKind::Int]).is_err());
    }

    #[test]
    fn bools_must_be_zero_or_one() {
        let yes = Message::new("/x").arg(true);
        let odd = Message::new("/x").arg(7);
        assert!(expect_shape(&yes, &[ArgKind::Bool]).is_ok());
        assert!(expect_shape(&odd, &[ArgKind::Bool]).is_err());
    }

    #[test]
    fn repeating_groups() {
        let notes = Message::new("/live/clip/get/notes")
            .arg(0)
            .arg(1)
            .arg(60)
            .arg(0.0f32)
            .arg(1.0f32)
            .arg(100)
            .arg(false)
            .arg(64)
            .arg(1.0f32)
            .arg(0.5f32)
            .arg(90)
            .arg(true);
        let prefix = [ArgKind::Int, ArgKind::Int];
        let group = [ArgKind::Int, ArgKind::Number, ArgKind::Number, ArgKind::Int, ArgKind::Bool];
        assert_eq!(expect_prefix_then_repeating(&notes, &prefix, &group), Ok(2));

        let empty = Message::new("/live/clip/get/notes").arg(0).arg(1);
        assert_eq!(expect_prefix_then_repeating(&empty, &prefix, &group), Ok(0));

        let ragged = Message::new("/live/clip/get/notes").arg(0).arg(1).arg(60);
        assert!(expect_prefix_then_repeating(&ragged, &prefix, &group).is_err());
    }

    #[test]
    fn reply_accessors() {
        let msg = Message::new("/live/track/get/name").arg(3).arg("Bass");
        let reply = Reply::checked(&msg, &[ArgKind::Int, ArgKind::Str]).unwrap();
        assert_eq!(reply.int(0), Ok(3));
        assert_eq!(reply.str(1), Ok("Bass"));
        assert!(reply.number(1).is_err());
        assert!(reply.int(5).is_err());
        assert_eq!(reply.len(), 2);
    }
}
