// Wire frame constants and encode/decode helpers. All multi-byte integers
// are little-endian. Message-type tags are reused across directions
// (0x00 for both handshake frames, 0x01 for both request and payload
// frames); peers disambiguate by role, never by tag alone.

// REQUEST is 19 bytes; that's the floor a sender's packet_size must clear.
pub const MIN_PACKET_SIZE: u16 = 19;

pub const DEFAULT_PACKET_SIZE: u16 = 508;

pub const TAG_HANDSHAKE: u8 = 0x00;
pub const TAG_DATA: u8 = 0x01;

// {0x01, id, offset, max_len}
pub const REQUEST_LEN: usize = 1 + 8 + 8 + 2;
// {0x01, id}, followed by up to max_len - PAYLOAD_HEADER_LEN body bytes
pub const PAYLOAD_HEADER_LEN: usize = 1 + 8;
// {0x00, packet_size}
pub const HANDSHAKE_ACK_LEN: usize = 1 + 2;
pub const HANDSHAKE_INIT: [u8; 1] = [TAG_HANDSHAKE];

pub fn encode_handshake_ack(packet_size: u16) -> [u8; HANDSHAKE_ACK_LEN] {
    let mut out = [0u8; HANDSHAKE_ACK_LEN];
    out[0] = TAG_HANDSHAKE;
    out[1..3].copy_from_slice(&packet_size.to_le_bytes());
    out
}

pub fn decode_handshake_ack(data: &[u8]) -> Option<u16> {
    if data.len() != HANDSHAKE_ACK_LEN || data[0] != TAG_HANDSHAKE {
        return None;
    }
    Some(u16::from_le_bytes([data[1], data[2]]))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Request {
    pub id: u64,
    pub offset: u64,
    pub max_len: u16,
}

pub fn encode_request(req: Request) -> [u8; REQUEST_LEN] {
    let mut out = [0u8; REQUEST_LEN];
    out[0] = TAG_DATA;
    out[1..9].copy_from_slice(&req.id.to_le_bytes());
    out[9..17].copy_from_slice(&req.offset.to_le_bytes());
    out[17..19].copy_from_slice(&req.max_len.to_le_bytes());
    out
}

pub fn decode_request(data: &[u8]) -> Option<Request> {
    if data.len() != REQUEST_LEN || data[0] != TAG_DATA {
        return None;
    }
    let id = u64::from_le_bytes(data[1..9].try_into().expect("slice is 8 bytes"));
    let offset = u64::from_le_bytes(data[9..17].try_into().expect("slice is 8 bytes"));
    let max_len = u16::from_le_bytes([data[17], data[18]]);
    Some(Request { id, offset, max_len })
}

pub fn write_payload_header(buf: &mut [u8], id: u64) {
    buf[0] = TAG_DATA;
    buf[1..9].copy_from_slice(&id.to_le_bytes());
}

pub fn decode_payload_header(data: &[u8]) -> Option<u64> {
    if data.len() < PAYLOAD_HEADER_LEN || data[0] != TAG_DATA {
        return None;
    }
    Some(u64::from_le_bytes(
        data[1..9].try_into().expect("slice is 8 bytes"),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn handshake_ack_round_trips() {
        let frame = encode_handshake_ack(1200);
        assert_eq!(decode_handshake_ack(&frame), Some(1200));
    }

    #[test]
    fn handshake_ack_rejects_wrong_tag() {
        let mut frame = encode_handshake_ack(508);
        frame[0] = TAG_DATA;
        assert_eq!(decode_handshake_ack(&frame), None);
    }

    #[test]
    fn request_round_trips() {
        let req = Request {
            id: 42,
            offset: 9001,
            max_len: 508,
        };
        let frame = encode_request(req);
        assert_eq!(decode_request(&frame), Some(req));
    }

    #[test]
    fn request_rejects_short_frame() {
        assert_eq!(decode_request(&[TAG_DATA, 0, 0]), None);
    }

    #[test]
    fn payload_header_round_trips() {
        let mut buf = [0u8; PAYLOAD_HEADER_LEN];
        write_payload_header(&mut buf, 7);
        assert_eq!(decode_payload_header(&buf), Some(7));
    }
}
