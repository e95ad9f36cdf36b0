//! Tuya datapoint wire protocol.
//! Handles datapoint frame encoding/decoding and the command payloads carried
//! by the Tuya manufacturer-specific cluster.

use crate::error::{QuirkError, Result};
use byteorder::{BigEndian, ByteOrder, ReadBytesExt, WriteBytesExt};
use serde::{Deserialize, Serialize};
use std::io::{Cursor, Read};

/// Tuya manufacturer-specific cluster id.
pub const TUYA_CLUSTER_ID: u16 = 0xEF00;

/// Size of a datapoint header: id(1) + type(1) + length(2).
pub const DP_HEADER_LEN: usize = 4;

/// Size of the sequence number leading every Tuya command payload.
pub const SEQ_LEN: usize = 2;

define_wire_enum! {
    /// Datapoint type tag.
    #[derive(Serialize, Deserialize)]
    #[serde(rename_all = "snake_case")]
    pub enum DataType {
        Raw = 0x00,
        Bool = 0x01,
        Value = 0x02,
        String = 0x03,
        Enum = 0x04,
        Bitmap = 0x05,
    }
}

define_wire_enum! {
    /// Tuya cluster command ids.
    pub enum CommandType {
        SetData = 0x00,
        GetData = 0x01,
        SetDataResponse = 0x02,
        QueryData = 0x03,
        SendData = 0x04,
        ActiveStatusReportAlt = 0x05,
        ActiveStatusReport = 0x06,
        McuVersionRequest = 0x10,
        McuVersionResponse = 0x11,
        SetTime = 0x24,
    }
}

impl CommandType {
    /// Commands whose payload is a sequence number followed by datapoints
    /// reported by the device.
    pub fn is_report(self) -> bool {
        matches!(
            self,
            CommandType::GetData
                | CommandType::SetDataResponse
                | CommandType::ActiveStatusReport
                | CommandType::ActiveStatusReportAlt
        )
    }
}

impl DataType {
    /// Expected payload length for fixed-width types, `None` for variable ones.
    pub fn fixed_len(self) -> Option<usize> {
        match self {
            DataType::Bool | DataType::Enum => Some(1),
            DataType::Value => Some(4),
            DataType::Raw | DataType::String | DataType::Bitmap => None,
        }
    }

    fn accepts_len(self, len: usize) -> bool {
        match self {
            DataType::Bitmap => matches!(len, 1 | 2 | 4),
            _ => self.fixed_len().is_none_or(|n| n == len),
        }
    }
}

/// Typed view of a datapoint payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DatapointValue {
    Raw(Vec<u8>),
    Bool(bool),
    Value(i32),
    String(String),
    Enum(u8),
    Bitmap(u32),
}

impl DatapointValue {
    pub fn data_type(&self) -> DataType {
        match self {
            DatapointValue::Raw(_) => DataType::Raw,
            DatapointValue::Bool(_) => DataType::Bool,
            DatapointValue::Value(_) => DataType::Value,
            DatapointValue::String(_) => DataType::String,
            DatapointValue::Enum(_) => DataType::Enum,
            DatapointValue::Bitmap(_) => DataType::Bitmap,
        }
    }

    /// Integer view used by numeric transforms. Raw payloads of up to eight
    /// bytes are read big-endian, matching the frame-level convention.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            DatapointValue::Bool(b) => Some(*b as i64),
            DatapointValue::Value(v) => Some(*v as i64),
            DatapointValue::Enum(v) => Some(*v as i64),
            DatapointValue::Bitmap(v) => Some(*v as i64),
            DatapointValue::Raw(bytes) if !bytes.is_empty() && bytes.len() <= 8 => {
                Some(BigEndian::read_uint(bytes, bytes.len()) as i64)
            }
            _ => None,
        }
    }
}

/// One datapoint as carried on the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatapointFrame {
    /// Datapoint id (vendor-scoped)
    pub id: u8,
    /// Wire type tag
    pub data_type: DataType,
    /// Payload bytes; the wire length field is always `payload.len()`
    pub payload: Vec<u8>,
}

impl DatapointFrame {
    pub fn new(id: u8, data_type: DataType, payload: Vec<u8>) -> Self {
        Self {
            id,
            data_type,
            payload,
        }
    }

    /// Builds a frame from a typed value. Bitmaps use the narrowest of the
    /// 1/2/4 byte encodings that holds the value.
    pub fn from_value(id: u8, value: &DatapointValue) -> Self {
        let payload = match value {
            DatapointValue::Raw(bytes) => bytes.clone(),
            DatapointValue::Bool(b) => vec![*b as u8],
            DatapointValue::Value(v) => v.to_be_bytes().to_vec(),
            DatapointValue::String(s) => s.as_bytes().to_vec(),
            DatapointValue::Enum(v) => vec![*v],
            DatapointValue::Bitmap(v) => match *v {
                0..=0xFF => vec![*v as u8],
                0x100..=0xFFFF => (*v as u16).to_be_bytes().to_vec(),
                _ => v.to_be_bytes().to_vec(),
            },
        };
        Self::new(id, value.data_type(), payload)
    }

    pub fn len(&self) -> u16 {
        self.payload.len() as u16
    }

    pub fn is_empty(&self) -> bool {
        self.payload.is_empty()
    }

    /// Interprets the payload according to the type tag.
    pub fn value(&self) -> Result<DatapointValue> {
        if !self.data_type.accepts_len(self.payload.len()) {
            return Err(QuirkError::MalformedFrame(format!(
                "dp {} of type {:?} has invalid length {}",
                self.id,
                self.data_type,
                self.payload.len()
            )));
        }
        let p = &self.payload;
        Ok(match self.data_type {
            DataType::Raw => DatapointValue::Raw(p.clone()),
            DataType::Bool => DatapointValue::Bool(p[0] != 0),
            DataType::Value => DatapointValue::Value(BigEndian::read_i32(p)),
            DataType::String => DatapointValue::String(String::from_utf8(p.clone()).map_err(
                |_| QuirkError::MalformedFrame(format!("dp {} string is not UTF-8", self.id)),
            )?),
            DataType::Enum => DatapointValue::Enum(p[0]),
            DataType::Bitmap => DatapointValue::Bitmap(BigEndian::read_uint(p, p.len()) as u32),
        })
    }

    /// Appends the wire form of this frame to `out`.
    pub fn encode_into(&self, out: &mut Vec<u8>) -> Result<()> {
        if self.payload.len() > u16::MAX as usize {
            return Err(QuirkError::InvalidArgument(format!(
                "dp {} payload of {} bytes exceeds the 16-bit length field",
                self.id,
                self.payload.len()
            )));
        }
        out.write_u8(self.id)?;
        out.write_u8(self.data_type.as_u8())?;
        out.write_u16::<BigEndian>(self.len())?;
        out.extend_from_slice(&self.payload);
        Ok(())
    }
}

/// Decodes a buffer made only of datapoint frames, consuming all of it.
///
/// Any header/length violation fails the whole buffer so that callers never
/// apply partial state.
pub fn decode(buffer: &[u8]) -> Result<Vec<DatapointFrame>> {
    let mut frames = Vec::new();
    let mut cursor = Cursor::new(buffer);

    while (cursor.position() as usize) < buffer.len() {
        let offset = cursor.position() as usize;
        let remaining = buffer.len() - offset;
        if remaining < DP_HEADER_LEN {
            return Err(QuirkError::MalformedFrame(format!(
                "truncated datapoint header at offset {} ({} bytes left)",
                offset, remaining
            )));
        }

        let id = cursor.read_u8()?;
        let tag = cursor.read_u8()?;
        let length = cursor.read_u16::<BigEndian>()? as usize;
        let data_type = DataType::from_u8(tag).ok_or_else(|| {
            QuirkError::MalformedFrame(format!("dp {} has unknown type tag 0x{:02X}", id, tag))
        })?;

        if length > remaining - DP_HEADER_LEN {
            return Err(QuirkError::MalformedFrame(format!(
                "dp {} declares {} bytes but only {} remain",
                id,
                length,
                remaining - DP_HEADER_LEN
            )));
        }

        let mut payload = vec![0u8; length];
        cursor.read_exact(&mut payload)?;
        let frame = DatapointFrame::new(id, data_type, payload);
        // Type/length agreement is part of the frame contract.
        frame.value()?;
        frames.push(frame);
    }

    Ok(frames)
}

/// Encodes frames back into their wire form.
pub fn encode(frames: &[DatapointFrame]) -> Result<Vec<u8>> {
    let mut out = Vec::with_capacity(frames.iter().map(|f| DP_HEADER_LEN + f.payload.len()).sum());
    for frame in frames {
        frame.encode_into(&mut out)?;
    }
    Ok(out)
}

/// Payload of a report/response command: sequence number plus datapoints.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatapointReport {
    pub seq: u16,
    pub frames: Vec<DatapointFrame>,
}

/// Parses the payload of a `GetData`/`SetDataResponse`/status report command.
pub fn parse_report(payload: &[u8]) -> Result<DatapointReport> {
    if payload.len() < SEQ_LEN {
        return Err(QuirkError::MalformedFrame(format!(
            "report payload too short ({} bytes)",
            payload.len()
        )));
    }
    let seq = BigEndian::read_u16(&payload[..SEQ_LEN]);
    let frames = decode(&payload[SEQ_LEN..])?;
    Ok(DatapointReport { seq, frames })
}

/// Builds the payload of a `SetData` command writing one datapoint.
pub fn build_set_datapoint_command(seq: u16, frame: &DatapointFrame) -> Result<Vec<u8>> {
    let mut data = Vec::with_capacity(SEQ_LEN + DP_HEADER_LEN + frame.payload.len());
    data.write_u16::<BigEndian>(seq)?;
    frame.encode_into(&mut data)?;
    Ok(data)
}

/// Builds the payload of a `QueryData` command ("send me all datapoints").
/// The command carries no arguments.
pub fn build_query_command() -> Vec<u8> {
    Vec::new()
}

/// Builds the payload answering a `SetTime` request: a u16 little-endian
/// length followed by UTC and local seconds, each u32 big-endian.
pub fn build_set_time_payload(utc_secs: u32, local_secs: u32) -> Result<Vec<u8>> {
    let mut data = Vec::with_capacity(10);
    data.write_u16::<byteorder::LittleEndian>(8)?;
    data.write_u32::<BigEndian>(utc_secs)?;
    data.write_u32::<BigEndian>(local_secs)?;
    Ok(data)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decode_value_frame() {
        let buf = [0x02, 0x02, 0x00, 0x04, 0x00, 0x00, 0x01, 0x72];
        let frames = decode(&buf).unwrap();
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].id, 2);
        assert_eq!(frames[0].value().unwrap(), DatapointValue::Value(370));
    }

    #[test]
    fn decode_multiple_frames_in_wire_order() {
        let buf = [
            0x01, 0x01, 0x00, 0x01, 0x01, // dp1 bool true
            0x09, 0x04, 0x00, 0x01, 0x02, // dp9 enum 2
            0x06, 0x00, 0x00, 0x02, 0xAB, 0xCD, // dp6 raw
        ];
        let frames = decode(&buf).unwrap();
        let ids: Vec<u8> = frames.iter().map(|f| f.id).collect();
        assert_eq!(ids, vec![1, 9, 6]);
        assert_eq!(frames[0].value().unwrap(), DatapointValue::Bool(true));
        assert_eq!(frames[1].value().unwrap(), DatapointValue::Enum(2));
        assert_eq!(
            frames[2].value().unwrap(),
            DatapointValue::Raw(vec![0xAB, 0xCD])
        );
    }

    #[test]
    fn negative_value_is_big_endian_twos_complement() {
        let buf = [0x12, 0x02, 0x00, 0x04, 0xFF, 0xFF, 0xFF, 0xFB];
        let frames = decode(&buf).unwrap();
        assert_eq!(frames[0].value().unwrap(), DatapointValue::Value(-5));
    }

    #[test]
    fn declared_length_past_end_is_malformed() {
        let buf = [0x01, 0x02, 0x00, 0x04, 0x00, 0x00];
        assert!(matches!(decode(&buf), Err(QuirkError::MalformedFrame(_))));
    }

    #[test]
    fn truncated_header_is_malformed() {
        let buf = [0x01, 0x01, 0x00, 0x01, 0x01, 0x02, 0x01];
        assert!(matches!(decode(&buf), Err(QuirkError::MalformedFrame(_))));
    }

    #[test]
    fn fixed_width_mismatch_is_malformed() {
        // bool with two bytes
        let buf = [0x01, 0x01, 0x00, 0x02, 0x00, 0x01];
        assert!(matches!(decode(&buf), Err(QuirkError::MalformedFrame(_))));
        // unknown type tag
        let buf = [0x01, 0x07, 0x00, 0x01, 0x00];
        assert!(matches!(decode(&buf), Err(QuirkError::MalformedFrame(_))));
    }

    #[test]
    fn empty_buffer_has_no_frames() {
        assert!(decode(&[]).unwrap().is_empty());
    }

    #[test]
    fn round_trip_preserves_frames() {
        let frames = vec![
            DatapointFrame::from_value(1, &DatapointValue::Bool(false)),
            DatapointFrame::from_value(2, &DatapointValue::Value(-170)),
            DatapointFrame::from_value(3, &DatapointValue::String("abc".into())),
            DatapointFrame::from_value(4, &DatapointValue::Bitmap(0x1234)),
            DatapointFrame::from_value(6, &DatapointValue::Raw(vec![0x64, 0, 0, 0xE8, 3, 0, 0xE6, 0])),
        ];
        let bytes = encode(&frames).unwrap();
        assert_eq!(decode(&bytes).unwrap(), frames);
    }

    #[test]
    fn set_datapoint_command_layout() {
        let frame = DatapointFrame::from_value(10, &DatapointValue::Enum(1));
        let payload = build_set_datapoint_command(1, &frame).unwrap();
        assert_eq!(payload, b"\x00\x01\n\x04\x00\x01\x01");
    }

    #[test]
    fn report_carries_sequence_number() {
        let report = parse_report(b"\x00\x02\x02\x02\x00\x04\x00\x00\x01r").unwrap();
        assert_eq!(report.seq, 2);
        assert_eq!(report.frames[0].value().unwrap(), DatapointValue::Value(370));
        assert!(parse_report(&[0x00]).is_err());
    }

    #[test]
    fn command_type_lookup() {
        assert_eq!(CommandType::from_u8(0x24), Some(CommandType::SetTime));
        assert_eq!(CommandType::from_u8(0x99), None);
        assert!(CommandType::SetDataResponse.is_report());
        assert!(!CommandType::SetData.is_report());
        assert!(build_query_command().is_empty());
    }

    #[test]
    fn set_time_payload_layout() {
        let payload = build_set_time_payload(0x01020304, 0x0A0B0C0D).unwrap();
        assert_eq!(
            payload,
            vec![0x08, 0x00, 0x01, 0x02, 0x03, 0x04, 0x0A, 0x0B, 0x0C, 0x0D]
        );
    }
}
