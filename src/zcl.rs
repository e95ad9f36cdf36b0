//! Minimal ZCL frame header handling.
//! Only what is needed to unwrap inbound Tuya cluster commands and wrap
//! outbound ones; attribute encoding belongs to the host stack.

use crate::error::{QuirkError, Result};
use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use std::io::Cursor;

pub const FC_CLUSTER_SPECIFIC: u8 = 0x01;
pub const FC_MANUFACTURER_SPECIFIC: u8 = 0x04;
pub const FC_SERVER_TO_CLIENT: u8 = 0x08;
pub const FC_DISABLE_DEFAULT_RESPONSE: u8 = 0x10;

/// Tuya's manufacturer code used on manufacturer-specific frames.
pub const TUYA_MANUFACTURER_CODE: u16 = 0x1002;

/// ZCL frame header
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ZclHeader {
    pub frame_control: u8,
    /// Manufacturer code, present iff the manufacturer-specific bit is set
    pub manufacturer: Option<u16>,
    /// Transaction sequence number
    pub tsn: u8,
    pub command_id: u8,
}

impl ZclHeader {
    /// Header for a client-to-server cluster command.
    pub fn cluster_command(tsn: u8, command_id: u8, manufacturer: Option<u16>) -> Self {
        let mut frame_control = FC_CLUSTER_SPECIFIC;
        if manufacturer.is_some() {
            frame_control |= FC_MANUFACTURER_SPECIFIC;
        }
        Self {
            frame_control,
            manufacturer,
            tsn,
            command_id,
        }
    }

    pub fn is_cluster_specific(&self) -> bool {
        self.frame_control & FC_CLUSTER_SPECIFIC != 0
    }

    pub fn is_manufacturer_specific(&self) -> bool {
        self.frame_control & FC_MANUFACTURER_SPECIFIC != 0
    }

    pub fn is_server_to_client(&self) -> bool {
        self.frame_control & FC_SERVER_TO_CLIENT != 0
    }

    /// Parses a header, returning it with the remaining payload.
    pub fn parse(data: &[u8]) -> Result<(Self, &[u8])> {
        let mut cursor = Cursor::new(data);
        let short = |_| QuirkError::MalformedFrame(format!("ZCL header too short ({} bytes)", data.len()));

        let frame_control = cursor.read_u8().map_err(short)?;
        let manufacturer = if frame_control & FC_MANUFACTURER_SPECIFIC != 0 {
            Some(cursor.read_u16::<LittleEndian>().map_err(short)?)
        } else {
            None
        };
        let tsn = cursor.read_u8().map_err(short)?;
        let command_id = cursor.read_u8().map_err(short)?;

        let offset = cursor.position() as usize;
        Ok((
            Self {
                frame_control,
                manufacturer,
                tsn,
                command_id,
            },
            &data[offset..],
        ))
    }

    /// Serializes the header followed by `payload`.
    pub fn pack(&self, payload: &[u8]) -> Result<Vec<u8>> {
        let mut data = Vec::with_capacity(5 + payload.len());
        data.write_u8(self.frame_control)?;
        if let Some(code) = self.manufacturer {
            data.write_u16::<LittleEndian>(code)?;
        }
        data.write_u8(self.tsn)?;
        data.write_u8(self.command_id)?;
        data.extend_from_slice(payload);
        Ok(data)
    }
}
