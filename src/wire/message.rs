//! OP_MSG framing.
//!
//! ```text
//! | int32 messageLength | int32 requestID | int32 responseTo | int32 opCode (2013) |
//! | uint32 flagBits |
//! | section ... |                      (kind 0: body document,
//! |                                      kind 1: int32 size, cstring id, documents)
//! | uint32 checksum |                  (only when flag bit 0 is set)
//! ```

use bytes::{BufMut, BytesMut};

use super::bson::{encode_document, BsonDecoder, Document};
use super::bson::decoder::decode_document_sequence;
use super::error::{WireError, WireResult};

/// OP_MSG opcode.
pub const OP_MSG: i32 = 2013;

/// Size of the standard message header.
pub const HEADER_SIZE: usize = 16;

/// Smallest well-formed OP_MSG: header, flags and one section kind byte.
pub const MIN_MESSAGE_SIZE: usize = HEADER_SIZE + 4 + 1;

/// Default maximum message size until the server reports its own.
pub const DEFAULT_MAX_MESSAGE_SIZE: usize = 48_000_000;

/// Section kind for the command body.
pub const SECTION_BODY: u8 = 0;

/// Section kind for a document sequence.
pub const SECTION_SEQUENCE: u8 = 1;

/// OP_MSG flag bits.
pub mod flags {
    /// Message ends with a CRC-32C checksum
    pub const CHECKSUM_PRESENT: u32 = 1 << 0;
    /// Another message follows without a further request
    pub const MORE_TO_COME: u32 = 1 << 1;
    /// Client accepts exhaust replies
    pub const EXHAUST_ALLOWED: u32 = 1 << 16;

    /// Bits 0-15 must be understood by the receiver.
    pub(crate) const REQUIRED_MASK: u32 = 0xFFFF;
    pub(crate) const KNOWN_REQUIRED: u32 = CHECKSUM_PRESENT | MORE_TO_COME;
}

/// Standard message header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MessageHeader {
    /// Total frame length including the header
    pub message_length: i32,
    /// Identifier chosen by the sender
    pub request_id: i32,
    /// Request this message answers (0 for requests)
    pub response_to: i32,
    /// Opcode
    pub op_code: i32,
}

impl MessageHeader {
    /// Read a header from the first 16 bytes of `data`.
    pub fn parse(data: &[u8]) -> WireResult<Self> {
        if data.len() < HEADER_SIZE {
            return Err(WireError::protocol(format!(
                "header needs {} bytes, got {}",
                HEADER_SIZE,
                data.len()
            )));
        }
        let field = |i: usize| i32::from_le_bytes([data[i], data[i + 1], data[i + 2], data[i + 3]]);
        Ok(Self {
            message_length: field(0),
            request_id: field(4),
            response_to: field(8),
            op_code: field(12),
        })
    }

    fn write(&self, dst: &mut BytesMut) {
        dst.put_i32_le(self.message_length);
        dst.put_i32_le(self.request_id);
        dst.put_i32_le(self.response_to);
        dst.put_i32_le(self.op_code);
    }
}

/// A kind-1 section: an identifier naming a command field plus its documents.
#[derive(Debug, Clone, PartialEq)]
pub struct DocumentSequence {
    /// Command field the documents belong to (`documents`, `updates`, `deletes`)
    pub identifier: String,
    /// Documents in the sequence
    pub documents: Vec<Document>,
}

impl DocumentSequence {
    /// Create a new document sequence.
    pub fn new(identifier: impl Into<String>, documents: Vec<Document>) -> Self {
        Self {
            identifier: identifier.into(),
            documents,
        }
    }
}

/// A message section.
#[derive(Debug, Clone, PartialEq)]
pub enum Section {
    /// Kind 0
    Body(Document),
    /// Kind 1
    Sequence(DocumentSequence),
}

/// A parsed or outgoing OP_MSG.
#[derive(Debug, Clone, PartialEq)]
pub struct OpMsg {
    header: MessageHeader,
    flags: u32,
    body: Document,
    sequences: Vec<DocumentSequence>,
}

impl OpMsg {
    /// Create a message. The header length is filled in on encode.
    pub fn new(
        request_id: i32,
        response_to: i32,
        flags: u32,
        body: Document,
        sequences: Vec<DocumentSequence>,
    ) -> Self {
        Self {
            header: MessageHeader {
                message_length: 0,
                request_id,
                response_to,
                op_code: OP_MSG,
            },
            flags,
            body,
            sequences,
        }
    }

    /// Build the frame for a client request with no flags set.
    pub fn build_request(
        request_id: i32,
        command: &Document,
        sequences: &[DocumentSequence],
    ) -> WireResult<BytesMut> {
        let msg = OpMsg::new(request_id, 0, 0, command.clone(), sequences.to_vec());
        let mut dst = BytesMut::new();
        msg.encode(&mut dst)?;
        Ok(dst)
    }

    /// Append the encoded frame to `dst`.
    ///
    /// The body section is written first, then each sequence. A checksum is
    /// appended when the checksum flag is set.
    pub fn encode(&self, dst: &mut BytesMut) -> WireResult<()> {
        let start = dst.len();
        if let Err(e) = self.write_frame(dst) {
            dst.truncate(start);
            return Err(e);
        }

        if self.flags & flags::CHECKSUM_PRESENT != 0 {
            let len = (dst.len() - start + 4) as i32;
            dst[start..start + 4].copy_from_slice(&len.to_le_bytes());
            let checksum = crc32c::crc32c(&dst[start..]);
            dst.put_u32_le(checksum);
        } else {
            let len = (dst.len() - start) as i32;
            dst[start..start + 4].copy_from_slice(&len.to_le_bytes());
        }
        Ok(())
    }

    fn write_frame(&self, dst: &mut BytesMut) -> WireResult<()> {
        let mut header = self.header;
        header.message_length = 0;
        header.write(dst);
        dst.put_u32_le(self.flags);

        dst.put_u8(SECTION_BODY);
        dst.put_slice(&encode_document(&self.body)?);

        for seq in &self.sequences {
            if seq.identifier.as_bytes().contains(&0) {
                return Err(WireError::protocol("sequence identifier contains NUL"));
            }
            dst.put_u8(SECTION_SEQUENCE);
            let size_at = dst.len();
            dst.put_i32_le(0);
            dst.put_slice(seq.identifier.as_bytes());
            dst.put_u8(0);
            for doc in &seq.documents {
                dst.put_slice(&encode_document(doc)?);
            }
            let size = (dst.len() - size_at) as i32;
            dst[size_at..size_at + 4].copy_from_slice(&size.to_le_bytes());
        }
        Ok(())
    }

    /// Parse a complete frame.
    ///
    /// Requires the declared length to equal `data.len()`, opcode 2013, only
    /// section kinds 0 and 1, exactly one body section and a valid checksum
    /// whenever the checksum flag is set.
    pub fn parse_response(data: &[u8]) -> WireResult<Self> {
        let header = MessageHeader::parse(data)?;
        if header.message_length < 0 || header.message_length as usize != data.len() {
            return Err(WireError::protocol(format!(
                "declared length {} but frame is {} bytes",
                header.message_length,
                data.len()
            )));
        }
        if header.op_code != OP_MSG {
            return Err(WireError::protocol(format!(
                "unexpected opcode {}",
                header.op_code
            )));
        }
        if data.len() < MIN_MESSAGE_SIZE {
            return Err(WireError::protocol("frame too short for OP_MSG"));
        }

        let flag_bits = u32::from_le_bytes([data[16], data[17], data[18], data[19]]);
        let unknown = flag_bits & flags::REQUIRED_MASK & !flags::KNOWN_REQUIRED;
        if unknown != 0 {
            return Err(WireError::protocol(format!(
                "unknown required flag bits 0x{:04X}",
                unknown
            )));
        }

        let mut end = data.len();
        if flag_bits & flags::CHECKSUM_PRESENT != 0 {
            if end < MIN_MESSAGE_SIZE + 4 {
                return Err(WireError::protocol("frame too short for checksum"));
            }
            end -= 4;
            let expected =
                u32::from_le_bytes([data[end], data[end + 1], data[end + 2], data[end + 3]]);
            let actual = crc32c::crc32c(&data[..end]);
            if expected != actual {
                return Err(WireError::ChecksumMismatch { expected, actual });
            }
        }

        let mut body = None;
        let mut sequences = Vec::new();
        let mut pos = HEADER_SIZE + 4;
        while pos < end {
            let kind = data[pos];
            pos += 1;
            match kind {
                SECTION_BODY => {
                    let mut decoder = BsonDecoder::new(&data[pos..end]);
                    let doc = decoder.decode_document().map_err(malformed)?;
                    pos += decoder.position();
                    if body.replace(doc).is_some() {
                        return Err(WireError::protocol("more than one body section"));
                    }
                }
                SECTION_SEQUENCE => {
                    let (seq, consumed) = parse_sequence(&data[pos..end])?;
                    sequences.push(seq);
                    pos += consumed;
                }
                other => {
                    return Err(WireError::protocol(format!("unknown section kind {}", other)));
                }
            }
        }

        let body = body.ok_or_else(|| WireError::protocol("missing body section"))?;
        Ok(Self {
            header,
            flags: flag_bits,
            body,
            sequences,
        })
    }

    /// Message header.
    pub fn header(&self) -> &MessageHeader {
        &self.header
    }

    /// Raw flag bits.
    pub fn flags(&self) -> u32 {
        self.flags
    }

    /// The kind-0 command or reply document.
    pub fn body(&self) -> &Document {
        &self.body
    }

    /// Consume the message, returning the body.
    pub fn into_body(self) -> Document {
        self.body
    }

    /// Kind-1 sections in wire order.
    pub fn sequences(&self) -> &[DocumentSequence] {
        &self.sequences
    }

    /// All sections, body first.
    pub fn sections(&self) -> Vec<Section> {
        std::iter::once(Section::Body(self.body.clone()))
            .chain(self.sequences.iter().cloned().map(Section::Sequence))
            .collect()
    }

    /// Whether the sender will follow up without another request.
    pub fn more_to_come(&self) -> bool {
        self.flags & flags::MORE_TO_COME != 0
    }

    /// Whether the frame carried a checksum.
    pub fn checksum_present(&self) -> bool {
        self.flags & flags::CHECKSUM_PRESENT != 0
    }

    /// The body with every sequence folded in as an array field.
    ///
    /// Servers read a kind-1 section exactly as if its documents were an
    /// array under the identifier key.
    pub fn merged_body(&self) -> Document {
        let mut doc = self.body.clone();
        for seq in &self.sequences {
            doc.insert(
                seq.identifier.as_str(),
                seq.documents
                    .iter()
                    .cloned()
                    .map(super::bson::Bson::Document)
                    .collect::<Vec<_>>(),
            );
        }
        doc
    }
}

fn parse_sequence(data: &[u8]) -> WireResult<(DocumentSequence, usize)> {
    if data.len() < 4 {
        return Err(WireError::protocol("truncated document sequence"));
    }
    let size = i32::from_le_bytes([data[0], data[1], data[2], data[3]]);
    if size < 5 || size as usize > data.len() {
        return Err(WireError::protocol(format!(
            "document sequence size {} out of range",
            size
        )));
    }
    let section = &data[4..size as usize];
    let nul = section
        .iter()
        .position(|&b| b == 0)
        .ok_or_else(|| WireError::protocol("unterminated sequence identifier"))?;
    let identifier = std::str::from_utf8(&section[..nul])
        .map_err(|_| WireError::protocol("sequence identifier is not UTF-8"))?
        .to_string();
    let documents = decode_document_sequence(&section[nul + 1..]).map_err(malformed)?;
    Ok((DocumentSequence { identifier, documents }, size as usize))
}

fn malformed(err: super::bson::BsonError) -> WireError {
    WireError::protocol(format!("malformed document: {}", err))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::doc;

    #[test]
    fn test_build_request_layout() {
        let cmd = doc! { "ping" => 1, "$db" => "admin" };
        let frame = OpMsg::build_request(7, &cmd, &[]).unwrap();
        let header = MessageHeader::parse(&frame).unwrap();

        assert_eq!(header.message_length as usize, frame.len());
        assert_eq!(header.request_id, 7);
        assert_eq!(header.response_to, 0);
        assert_eq!(header.op_code, OP_MSG);
        assert_eq!(&frame[16..20], &[0, 0, 0, 0]);
        assert_eq!(frame[20], SECTION_BODY);
        assert_eq!(&frame[21..], &encode_document(&cmd).unwrap()[..]);
    }

    #[test]
    fn test_roundtrip_with_sequence() {
        let cmd = doc! { "insert" => "people", "$db" => "test" };
        let docs = vec![doc! { "a" => 1 }, doc! { "a" => 2 }];
        let seq = DocumentSequence::new("documents", docs.clone());
        let frame = OpMsg::build_request(3, &cmd, &[seq]).unwrap();

        let msg = OpMsg::parse_response(&frame).unwrap();
        assert_eq!(msg.body(), &cmd);
        assert_eq!(msg.sequences().len(), 1);
        assert_eq!(msg.sequences()[0].identifier, "documents");
        assert_eq!(msg.sequences()[0].documents, docs);
        assert_eq!(msg.sections().len(), 2);

        let merged = msg.merged_body();
        assert_eq!(merged.get_array("documents").map(|a| a.len()), Some(2));
    }

    #[test]
    fn test_length_mismatch_rejected() {
        let mut frame = OpMsg::build_request(1, &doc! { "ping" => 1 }, &[]).unwrap();
        frame.put_u8(0);
        assert!(matches!(OpMsg::parse_response(&frame), Err(WireError::Protocol(_))));
    }

    #[test]
    fn test_wrong_opcode_rejected() {
        let mut frame = OpMsg::build_request(1, &doc! { "ping" => 1 }, &[]).unwrap();
        frame[12..16].copy_from_slice(&2004i32.to_le_bytes());
        assert!(matches!(OpMsg::parse_response(&frame), Err(WireError::Protocol(_))));
    }

    #[test]
    fn test_unknown_section_kind_rejected() {
        let mut frame = OpMsg::build_request(1, &doc! { "ping" => 1 }, &[]).unwrap();
        frame[20] = 2;
        assert!(matches!(OpMsg::parse_response(&frame), Err(WireError::Protocol(_))));
    }

    #[test]
    fn test_missing_body_rejected() {
        let msg = OpMsg::new(1, 0, 0, doc! { "x" => 1 }, vec![DocumentSequence::new("d", vec![])]);
        let mut frame = BytesMut::new();
        msg.encode(&mut frame).unwrap();
        // Drop the body section and fix up the length.
        let body_len = encode_document(&doc! { "x" => 1 }).unwrap().len();
        let mut stripped = BytesMut::from(&frame[..20]);
        stripped.extend_from_slice(&frame[21 + body_len..]);
        let len = stripped.len() as i32;
        stripped[0..4].copy_from_slice(&len.to_le_bytes());
        assert!(matches!(OpMsg::parse_response(&stripped), Err(WireError::Protocol(_))));
    }

    #[test]
    fn test_two_bodies_rejected() {
        let body = encode_document(&doc! { "ok" => 1 }).unwrap();
        let mut frame = BytesMut::new();
        frame.put_i32_le(0);
        frame.put_i32_le(1);
        frame.put_i32_le(0);
        frame.put_i32_le(OP_MSG);
        frame.put_u32_le(0);
        for _ in 0..2 {
            frame.put_u8(SECTION_BODY);
            frame.put_slice(&body);
        }
        let len = frame.len() as i32;
        frame[0..4].copy_from_slice(&len.to_le_bytes());
        assert!(matches!(OpMsg::parse_response(&frame), Err(WireError::Protocol(_))));
    }

    #[test]
    fn test_checksum_verified() {
        let msg = OpMsg::new(9, 4, flags::CHECKSUM_PRESENT, doc! { "ok" => 1.0 }, vec![]);
        let mut frame = BytesMut::new();
        msg.encode(&mut frame).unwrap();

        let parsed = OpMsg::parse_response(&frame).unwrap();
        assert!(parsed.checksum_present());
        assert_eq!(parsed.body().get("ok"), Some(&crate::wire::bson::Bson::Double(1.0)));

        let last = frame.len() - 1;
        frame[last] ^= 0xFF;
        assert!(matches!(
            OpMsg::parse_response(&frame),
            Err(WireError::ChecksumMismatch { .. })
        ));
    }

    #[test]
    fn test_more_to_come_flag() {
        let msg = OpMsg::new(2, 1, flags::MORE_TO_COME, doc! { "ok" => 1 }, vec![]);
        let mut frame = BytesMut::new();
        msg.encode(&mut frame).unwrap();
        let parsed = OpMsg::parse_response(&frame).unwrap();
        assert!(parsed.more_to_come());
        assert_eq!(parsed.header().response_to, 1);
    }

    #[test]
    fn test_unknown_required_flag_rejected() {
        let mut frame = OpMsg::build_request(1, &doc! { "ping" => 1 }, &[]).unwrap();
        frame[16] = 0x04;
        assert!(matches!(OpMsg::parse_response(&frame), Err(WireError::Protocol(_))));
    }

    #[test]
    fn test_exhaust_allowed_is_optional_bit() {
        let msg = OpMsg::new(2, 0, flags::EXHAUST_ALLOWED, doc! { "getMore" => 1i64 }, vec![]);
        let mut frame = BytesMut::new();
        msg.encode(&mut frame).unwrap();
        assert!(OpMsg::parse_response(&frame).is_ok());
    }
}
