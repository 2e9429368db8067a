//! CAN frames and the telemetry record published for each received frame

use std::fmt;

use serde::ser::SerializeMap;
use serde::{Serialize, Serializer};

use crate::error::FrameError;
use crate::settings::{MAX_CAN_ID, MAX_STANDARD_ID};

/// A classic CAN data frame (at most 8 data bytes)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CanFrame {
    id: u32,
    data: [u8; 8],
    len: u8,
}

impl CanFrame {
    pub const MAX_DATA_LEN: usize = 8;

    pub fn new(id: u32, data: &[u8]) -> Result<Self, FrameError> {
        if data.len() > Self::MAX_DATA_LEN {
            return Err(FrameError::PayloadTooLong(data.len()));
        }
        if id > MAX_CAN_ID {
            return Err(FrameError::IdOutOfRange(id));
        }

        let mut buf = [0u8; 8];
        buf[..data.len()].copy_from_slice(data);
        Ok(Self {
            id,
            data: buf,
            len: data.len() as u8,
        })
    }

    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn data(&self) -> &[u8] {
        &self.data[..self.len as usize]
    }

    /// Data length code
    pub fn dlc(&self) -> usize {
        self.len as usize
    }

    /// Identifiers above the 11-bit range go out as extended frames
    pub fn is_extended(&self) -> bool {
        self.id > MAX_STANDARD_ID
    }
}

impl fmt::Display for CanFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:03X} [{}]", self.id, self.len)?;
        for byte in self.data() {
            write!(f, " {:02X}", byte)?;
        }
        Ok(())
    }
}

/// Build the publish topic for a frame: prefix followed by `0x<id>` in
/// lower-case hex, e.g. `can/0x123`
pub fn topic_for(prefix: &str, id: u32) -> String {
    format!("{}0x{:x}", prefix, id)
}

/// Structured record published for one received frame
///
/// Serializes as `{"d0": .., "d1": .., .., "time": <ns>}`: one key per data
/// byte position plus the capture timestamp.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TelemetryRecord {
    pub data: Vec<u8>,
    /// Capture time, nanoseconds since the Unix epoch
    pub time_ns: i64,
}

impl TelemetryRecord {
    pub fn capture(frame: &CanFrame, time_ns: i64) -> Self {
        Self {
            data: frame.data().to_vec(),
            time_ns,
        }
    }
}

impl Serialize for TelemetryRecord {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.data.len() + 1))?;
        for (index, byte) in self.data.iter().enumerate() {
            map.serialize_entry(&format!("d{}", index), byte)?;
        }
        map.serialize_entry("time", &self.time_ns)?;
        map.end()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_limits() {
        assert!(CanFrame::new(0x123, &[0; 8]).is_ok());
        assert_eq!(
            CanFrame::new(0x123, &[0; 9]),
            Err(FrameError::PayloadTooLong(9))
        );
        assert_eq!(
            CanFrame::new(0x2000_0000, &[]),
            Err(FrameError::IdOutOfRange(0x2000_0000))
        );
    }

    #[test]
    fn test_frame_accessors() {
        let frame = CanFrame::new(0x18DA_F100, &[0x01, 0x02]).unwrap();
        assert_eq!(frame.dlc(), 2);
        assert_eq!(frame.data(), &[0x01, 0x02]);
        assert!(frame.is_extended());
        assert!(!CanFrame::new(0x7FF, &[]).unwrap().is_extended());
        assert_eq!(
            CanFrame::new(0x100, &[0xAB]).unwrap().to_string(),
            "0x100 [1] AB"
        );
    }

    #[test]
    fn test_topic_for() {
        assert_eq!(topic_for("can/", 0x123), "can/0x123");
        assert_eq!(topic_for("can/", 0x18DAF100), "can/0x18daf100");
    }

    #[test]
    fn test_record_keys_follow_byte_position() {
        let frame = CanFrame::new(0x123, &[0x01, 0x02, 0x03]).unwrap();
        let record = TelemetryRecord::capture(&frame, 1_700_000_000_000_000_000);

        let json = serde_json::to_string(&record).unwrap();
        assert_eq!(
            json,
            r#"{"d0":1,"d1":2,"d2":3,"time":1700000000000000000}"#
        );
    }

    #[test]
    fn test_record_without_data() {
        let frame = CanFrame::new(0x10, &[]).unwrap();
        let json = serde_json::to_string(&TelemetryRecord::capture(&frame, 7)).unwrap();
        assert_eq!(json, r#"{"time":7}"#);
    }
}
