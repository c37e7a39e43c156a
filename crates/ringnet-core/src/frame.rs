//! Wire format for the two ring datagram kinds.
//!
//! These strings ARE the protocol; every byte matters for interop with
//! existing nodes. Two wire forms exist:
//!
//! ```text
//! token:  1000
//! data:   2000;<origin>:<destination>:<control>:<checksum>:<payload>
//! ```
//!
//! The payload is the only field allowed to contain `:`, so data frames are
//! split left-to-right into at most five fields and the fifth absorbs the
//! rest. The checksum covers `origin:destination:payload` only — never the
//! control field, which downstream nodes rewrite in flight.

use rand::Rng;

use crate::crc;

/// Wire literal announcing the right to transmit.
pub const TOKEN_WIRE: &str = "1000";

/// Prefix of every data frame.
pub const DATA_PREFIX: &str = "2000;";

/// Reserved destination name addressing every node on the ring.
pub const BROADCAST: &str = "TODOS";

/// Largest datagram a node will emit or accept.
pub const MAX_DATAGRAM: usize = 1024;

// ── Control field ─────────────────────────────────────────────────────────────

/// Per-frame delivery status, rewritten at the destination.
///
/// A frame starts out as `NotDelivered`; if it returns to its origin still
/// carrying that value, no node on the ring matched the destination.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Control {
    /// Initial value, meaning no recipient has seen the frame yet.
    /// Wire form: `maquinanaoexiste`.
    NotDelivered,
    /// Destination verified the checksum and accepted the payload.
    Ack,
    /// Destination saw a checksum mismatch.
    Nak,
    /// Anything else observed on the wire. Preserved verbatim so forwarding
    /// stays byte-exact.
    Other(String),
}

impl Control {
    pub fn from_wire(s: &str) -> Self {
        match s {
            "maquinanaoexiste" => Control::NotDelivered,
            "ACK" => Control::Ack,
            "NAK" => Control::Nak,
            other => Control::Other(other.to_string()),
        }
    }

    pub fn as_wire(&self) -> &str {
        match self {
            Control::NotDelivered => "maquinanaoexiste",
            Control::Ack => "ACK",
            Control::Nak => "NAK",
            Control::Other(s) => s,
        }
    }
}

impl std::fmt::Display for Control {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_wire())
    }
}

// ── Frames ────────────────────────────────────────────────────────────────────

/// A decoded ring datagram.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Token,
    Data(DataFrame),
}

/// A data frame in decoded form.
///
/// The checksum is kept as the decimal string received off the wire rather
/// than a parsed integer: forwarding must reproduce the exact bytes, and a
/// corrupted field may not even be numeric.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataFrame {
    pub origin: String,
    pub destination: String,
    pub control: Control,
    pub checksum: String,
    pub payload: String,
}

/// Errors from [`decode`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FrameError {
    #[error("datagram is not valid UTF-8")]
    NotText,
    #[error("datagram is neither a token nor a data frame")]
    UnknownKind,
    #[error("data frame has {found} fields, expected 5")]
    Truncated { found: usize },
}

/// Token datagram bytes.
pub fn token_wire() -> &'static [u8] {
    TOKEN_WIRE.as_bytes()
}

/// Classify and decode a received datagram.
///
/// A buffer whose trimmed form equals the token literal is a token; a buffer
/// starting with `2000;` and carrying five `:`-separated fields is a data
/// frame. Everything else is an error the caller logs and drops.
pub fn decode(bytes: &[u8]) -> Result<Frame, FrameError> {
    let text = std::str::from_utf8(bytes).map_err(|_| FrameError::NotText)?;

    if text.trim() == TOKEN_WIRE {
        return Ok(Frame::Token);
    }

    let body = text.strip_prefix(DATA_PREFIX).ok_or(FrameError::UnknownKind)?;
    let fields: Vec<&str> = body.splitn(5, ':').collect();
    if fields.len() != 5 {
        return Err(FrameError::Truncated { found: fields.len() });
    }

    Ok(Frame::Data(DataFrame {
        origin: fields[0].to_string(),
        destination: fields[1].to_string(),
        control: Control::from_wire(fields[2]),
        checksum: fields[3].to_string(),
        payload: fields[4].to_string(),
    }))
}

/// Wire length of a freshly built frame for the given fields, assuming the
/// longest control value. Used to reject payloads at enqueue that could not
/// fit a [`MAX_DATAGRAM`] datagram.
pub fn encoded_len(origin: &str, destination: &str, payload: &str) -> usize {
    // prefix + four separators + control + widest u32 checksum
    DATA_PREFIX.len()
        + origin.len()
        + destination.len()
        + Control::NotDelivered.as_wire().len()
        + u32::MAX.to_string().len()
        + payload.len()
        + 4
}

impl DataFrame {
    /// Build a frame ready for first transmission: control `NotDelivered`,
    /// checksum computed over the canonical `origin:destination:payload`.
    pub fn new(origin: &str, destination: &str, payload: &str) -> Self {
        let checksum = crc::checksum_string(&crc::canonical_input(origin, destination, payload));
        DataFrame {
            origin: origin.to_string(),
            destination: destination.to_string(),
            control: Control::NotDelivered,
            checksum,
            payload: payload.to_string(),
        }
    }

    /// Render the wire form.
    pub fn encode(&self) -> String {
        format!(
            "{}{}:{}:{}:{}:{}",
            DATA_PREFIX,
            self.origin,
            self.destination,
            self.control.as_wire(),
            self.checksum,
            self.payload
        )
    }

    /// Recompute the checksum from the frame's own fields and compare it
    /// against the carried checksum field.
    pub fn verify(&self) -> bool {
        let input = crc::canonical_input(&self.origin, &self.destination, &self.payload);
        crc::matches(&input, &self.checksum)
    }

    /// Rewrite the control field. The checksum does not cover control, so
    /// it is left untouched.
    pub fn set_control(&mut self, control: Control) {
        self.control = control;
    }

    /// With probability `probability`, replace the checksum with a random
    /// 32-bit value guaranteed different from the current one. Returns
    /// whether corruption was introduced. Deterministic at 0.0 and 1.0.
    pub fn corrupt_checksum(&mut self, probability: f64) -> bool {
        let mut rng = rand::thread_rng();
        if !rng.gen_bool(probability.clamp(0.0, 1.0)) {
            return false;
        }

        let mut corrupted = rng.gen::<u32>().to_string();
        while corrupted == self.checksum {
            corrupted = rng.gen::<u32>().to_string();
        }
        self.checksum = corrupted;
        true
    }

    pub fn is_broadcast(&self) -> bool {
        self.destination == BROADCAST
    }
}
