use byteorder::{BigEndian, ByteOrder};

/// Size of an NTP message without extension fields or MAC.
pub const NTP_PACKET_SIZE: usize = 48;

/// Well-known NTP server port.
pub const NTP_PORT: u16 = 123;

/// Seconds between 1900-01-01 (NTP era 0) and 1970-01-01 (Unix epoch).
pub const SEVENTY_YEARS: i64 = 2_208_988_800;

const NTP_ERA_SECS: i64 = 1 << 32;

// Header constants for a client request
const LI_VN_MODE: u8 = 0b1110_0011; // LI=3 (unsynchronized), VN=4, Mode=3 (client)
const STRATUM: u8 = 0;
const POLL_INTERVAL: u8 = 6;
const PRECISION: u8 = 0xEC;
const REFERENCE_ID: [u8; 4] = [0x31, 0x4E, 0x31, 0x34];

const REFERENCE_ID_OFFSET: usize = 12;
const TRANSMIT_SECS_OFFSET: usize = 40;

/// Builds the 48-byte client request. Everything outside the header flags,
/// poll, precision and reference id is zero.
pub fn build_request() -> [u8; NTP_PACKET_SIZE] {
    let mut buf = [0u8; NTP_PACKET_SIZE];
    buf[0] = LI_VN_MODE;
    buf[1] = STRATUM;
    buf[2] = POLL_INTERVAL;
    buf[3] = PRECISION;
    // 8 bytes of zero for Root Delay & Root Dispersion
    buf[REFERENCE_ID_OFFSET..REFERENCE_ID_OFFSET + 4].copy_from_slice(&REFERENCE_ID);
    buf
}

/// Reads the transmit timestamp seconds (seconds since 1900, big-endian).
/// Returns `None` if the buffer is shorter than a full NTP message.
pub fn transmit_seconds(buf: &[u8]) -> Option<u32> {
    if buf.len() < NTP_PACKET_SIZE {
        return None;
    }
    Some(BigEndian::read_u32(&buf[TRANSMIT_SECS_OFFSET..TRANSMIT_SECS_OFFSET + 4]))
}

/// Decodes a server response into Unix seconds shifted by `utc_offset_secs`.
///
/// `None` means "no valid timestamp": the datagram is shorter than 48 bytes or
/// its transmit timestamp is zero. DST is not applied here.
///
/// A timestamp with the most significant bit clear is taken to be in NTP era 1
/// (on or after 2036-02-07 06:28:16 UTC), as RFC 4330 suggests.
pub fn decode_response(buf: &[u8], utc_offset_secs: i64) -> Option<i64> {
    let secs_since_1900 = transmit_seconds(buf)?;
    if secs_since_1900 == 0 {
        return None;
    }

    let mut secs = secs_since_1900 as i64;
    if secs_since_1900 & 0x8000_0000 == 0 {
        secs += NTP_ERA_SECS;
    }

    Some(secs - SEVENTY_YEARS + utc_offset_secs)
}

/// Formats a datagram as a hex dump, 16 bytes per line, grouped by 4.
pub fn hex_dump(buf: &[u8]) -> String {
    let mut out = String::with_capacity(buf.len() * 3 + buf.len() / 16 * 2);
    for (i, byte) in buf.iter().enumerate() {
        out.push_str(&format!("{:02X} ", byte));
        if (i + 1) % 16 == 0 {
            out.push('\n');
        } else if (i + 1) % 4 == 0 {
            out.push_str("| ");
        }
    }
    out
}

// ============================================================================
// TESTS
// ============================================================================
