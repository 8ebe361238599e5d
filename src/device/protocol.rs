//! Command table spoken with the motion controller.
//!
//! Every exchange is one request and exactly one reply. Over a stream
//! transport both travel as single-line JSON envelopes:
//! ```text
//! -> {"id":7,"command":"move","payload":{"x":1.0,"y":2.0,"z":3.0}}
//! <- {"id":7,"ok":true,"data":{"currentPosition":{"x":1.0,"y":2.0,"z":3.0}}}
//! <- {"id":7,"ok":false,"error":"target out of range"}
//! ```

use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

use crate::error::CommandError;
use crate::motion::PositionVector;

/// Predefined controller-side reference point on the plate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReferenceWell {
    A1,
    A12,
    H12,
}

impl ReferenceWell {
    pub const ALL: [ReferenceWell; 3] = [ReferenceWell::A1, ReferenceWell::A12, ReferenceWell::H12];

    /// Controller-side reference id (1, 2 or 3).
    pub fn id(&self) -> u8 {
        match self {
            ReferenceWell::A1 => 1,
            ReferenceWell::A12 => 2,
            ReferenceWell::H12 => 3,
        }
    }

    pub fn from_id(id: u8) -> Option<Self> {
        ReferenceWell::ALL.into_iter().find(|well| well.id() == id)
    }

    pub fn command_name(&self) -> &'static str {
        match self {
            ReferenceWell::A1 => "gotoReference1",
            ReferenceWell::A12 => "gotoReference2",
            ReferenceWell::H12 => "gotoReference3",
        }
    }
}

impl fmt::Display for ReferenceWell {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ReferenceWell::A1 => "A1",
            ReferenceWell::A12 => "A12",
            ReferenceWell::H12 => "H12",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Init,
    GotoReference(ReferenceWell),
    Move(PositionVector),
    UpdateLaserOffsets(PositionVector),
    SaveCalibration(PositionVector),
    SaveLaserDistCalibration(f64),
    End,
}

impl Command {
    pub fn name(&self) -> &'static str {
        match self {
            Command::Init => "init",
            Command::GotoReference(well) => well.command_name(),
            Command::Move(_) => "move",
            Command::UpdateLaserOffsets(_) => "updateLaserOffsets",
            Command::SaveCalibration(_) => "saveCalibration",
            Command::SaveLaserDistCalibration(_) => "saveLaserDistCalibration",
            Command::End => "end",
        }
    }

    pub fn payload(&self) -> Result<Value, CommandError> {
        let encoded = match self {
            Command::Init | Command::GotoReference(_) | Command::End => return Ok(Value::Null),
            Command::Move(target) => serde_json::to_value(target),
            Command::UpdateLaserOffsets(offset) | Command::SaveCalibration(offset) => {
                serde_json::to_value(OffsetPayload { offset: *offset })
            }
            Command::SaveLaserDistCalibration(value) => {
                if !value.is_finite() {
                    return Err(CommandError::Encode {
                        command: self.name().to_string(),
                        reason: format!("calibration value {value} is not finite"),
                    });
                }
                serde_json::to_value(LaserDistPayload {
                    new_calibration: *value,
                })
            }
        };

        encoded.map_err(|err| CommandError::Encode {
            command: self.name().to_string(),
            reason: err.to_string(),
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OffsetPayload {
    pub offset: PositionVector,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LaserDistPayload {
    pub new_calibration: f64,
}

/// Reply to `init`: device constants fixed for the connection.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitReply {
    pub z_abs_min: f64,
    pub laser_reference_distance: f64,
}

/// Reply to `gotoReference1/2/3`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReferenceReply {
    pub current_position: PositionVector,
    pub current_well_top: PositionVector,
    pub current_offset: PositionVector,
}

/// Reply to `move`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MoveReply {
    pub current_position: PositionVector,
}

/// Decode a reply body into the shape expected for `command`.
pub fn decode_reply<T: DeserializeOwned>(command: &str, reply: Value) -> Result<T, CommandError> {
    serde_json::from_value(reply).map_err(|err| CommandError::MalformedReply {
        command: command.to_string(),
        reason: err.to_string(),
    })
}

/// Request envelope on stream transports.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestFrame {
    pub id: u64,
    pub command: String,
    #[serde(default)]
    pub payload: Value,
}

/// Reply envelope on stream transports.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReplyFrame {
    pub id: u64,
    pub ok: bool,
    #[serde(default)]
    pub data: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ReplyFrame {
    pub fn success(id: u64, data: Value) -> Self {
        Self {
            id,
            ok: true,
            data,
            error: None,
        }
    }

    pub fn failure(id: u64, message: impl Into<String>) -> Self {
        Self {
            id,
            ok: false,
            data: Value::Null,
            error: Some(message.into()),
        }
    }

    /// Turn the envelope into the reply body or a rejection.
    pub fn into_result(self, command: &str) -> Result<Value, CommandError> {
        if self.ok {
            Ok(self.data)
        } else {
            Err(CommandError::Rejected {
                command: command.to_string(),
                message: self.error.unwrap_or_else(|| "unspecified error".into()),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_command_names_match_device_table() {
        assert_eq!(Command::Init.name(), "init");
        assert_eq!(Command::GotoReference(ReferenceWell::A1).name(), "gotoReference1");
        assert_eq!(Command::GotoReference(ReferenceWell::A12).name(), "gotoReference2");
        assert_eq!(Command::GotoReference(ReferenceWell::H12).name(), "gotoReference3");
        assert_eq!(Command::Move(PositionVector::ZERO).name(), "move");
        assert_eq!(Command::UpdateLaserOffsets(PositionVector::ZERO).name(), "updateLaserOffsets");
        assert_eq!(Command::SaveCalibration(PositionVector::ZERO).name(), "saveCalibration");
        assert_eq!(Command::SaveLaserDistCalibration(1.0).name(), "saveLaserDistCalibration");
        assert_eq!(Command::End.name(), "end");
    }

    #[test]
    fn test_payloads() {
        assert_eq!(Command::Init.payload().unwrap(), Value::Null);
        assert_eq!(
            Command::Move(PositionVector::new(1.0, 2.0, 3.0)).payload().unwrap(),
            json!({"x": 1.0, "y": 2.0, "z": 3.0})
        );
        assert_eq!(
            Command::SaveCalibration(PositionVector::new(0.0, 2.0, -2.0)).payload().unwrap(),
            json!({"offset": {"x": 0.0, "y": 2.0, "z": -2.0}})
        );
        assert_eq!(
            Command::SaveLaserDistCalibration(18.0).payload().unwrap(),
            json!({"newCalibration": 18.0})
        );
        assert!(matches!(
            Command::SaveLaserDistCalibration(f64::NAN).payload(),
            Err(CommandError::Encode { .. })
        ));
    }

    #[test]
    fn test_decode_reference_reply() {
        let reply: ReferenceReply = decode_reply(
            "gotoReference1",
            json!({
                "currentPosition": {"x": 1, "y": 2, "z": 3},
                "currentWellTop": {"x": 1, "y": 2, "z": 1},
                "currentOffset": {"x": 0, "y": 0, "z": 0.5},
            }),
        )
        .unwrap();

        assert_eq!(reply.current_position, PositionVector::new(1.0, 2.0, 3.0));
        assert_eq!(reply.current_well_top, PositionVector::new(1.0, 2.0, 1.0));
        assert_eq!(reply.current_offset, PositionVector::new(0.0, 0.0, 0.5));
    }

    #[test]
    fn test_decode_rejects_missing_fields() {
        let result: Result<InitReply, _> = decode_reply("init", json!({"zAbsMin": 1.0}));
        match result {
            Err(CommandError::MalformedReply { command, .. }) => assert_eq!(command, "init"),
            other => panic!("expected malformed reply, got {other:?}"),
        }
    }

    #[test]
    fn test_reply_frame_into_result() {
        let ok = ReplyFrame::success(1, json!({"a": 1}));
        assert_eq!(ok.into_result("end").unwrap(), json!({"a": 1}));

        let rejected = ReplyFrame::failure(2, "busy");
        assert_eq!(
            rejected.into_result("move"),
            Err(CommandError::Rejected {
                command: "move".into(),
                message: "busy".into()
            })
        );
    }

    #[test]
    fn test_reference_well_ids() {
        for well in ReferenceWell::ALL {
            assert_eq!(ReferenceWell::from_id(well.id()), Some(well));
        }
        assert_eq!(ReferenceWell::from_id(4), None);
    }
}
