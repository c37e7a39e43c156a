//! CRC-32 integrity checksums for data frames.
//!
//! The checksummed input is the canonical string `origin:destination:payload`.
//! The control field is deliberately excluded so a destination can rewrite it
//! to ACK/NAK in flight without recomputing the checksum, and any node can
//! still verify the original payload independently.

/// CRC-32-IEEE of a string.
pub fn checksum(data: &str) -> u32 {
    crc32fast::hash(data.as_bytes())
}

/// CRC-32-IEEE rendered as the decimal ASCII form used on the wire.
pub fn checksum_string(data: &str) -> String {
    checksum(data).to_string()
}

/// Compare `data` against a wire checksum field.
/// A field that does not parse as an unsigned 32-bit decimal never matches.
pub fn matches(data: &str, expected: &str) -> bool {
    match expected.parse::<u32>() {
        Ok(value) => value == checksum(data),
        Err(_) => false,
    }
}

/// Build the canonical checksum input for a frame's identifying fields.
pub fn canonical_input(origin: &str, destination: &str, payload: &str) -> String {
    format!("{origin}:{destination}:{payload}")
}
