//! Payloads carried inside frames and their command-dependent bodies.
//!
//! ```text
//! +-----+-----+--------+-------------+---------+----------------+
//! | src | dst | serial | device_type | command | body ...       |
//! | leb | leb | leb    | u8          | u8      | per dispatch   |
//! +-----+-----+--------+-------------+---------+----------------+
//! ```
//!
//! Variable-length body fields (names, lists) carry a single-byte length
//! prefix, so none of them can exceed 255 bytes or elements.

use bytes::{BufMut, BytesMut};
use serde_derive::Serialize;

use crate::error::ProtocolError;
use crate::varint;

#[derive(Serialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeviceType {
    Hub,
    EnvSensor,
    Switch,
    Lamp,
    Socket,
    Clock,
    Unknown(u8),
}

impl From<u8> for DeviceType {
    fn from(code: u8) -> Self {
        match code {
            0x01 => DeviceType::Hub,
            0x02 => DeviceType::EnvSensor,
            0x03 => DeviceType::Switch,
            0x04 => DeviceType::Lamp,
            0x05 => DeviceType::Socket,
            0x06 => DeviceType::Clock,
            _ => DeviceType::Unknown(code),
        }
    }
}

impl From<DeviceType> for u8 {
    fn from(device_type: DeviceType) -> Self {
        match device_type {
            DeviceType::Hub => 0x01,
            DeviceType::EnvSensor => 0x02,
            DeviceType::Switch => 0x03,
            DeviceType::Lamp => 0x04,
            DeviceType::Socket => 0x05,
            DeviceType::Clock => 0x06,
            DeviceType::Unknown(code) => code,
        }
    }
}

#[derive(Serialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Command {
    WhoIsHere,
    IAmHere,
    GetStatus,
    Status,
    SetStatus,
    Tick,
    Unknown(u8),
}

impl From<u8> for Command {
    fn from(code: u8) -> Self {
        match code {
            0x01 => Command::WhoIsHere,
            0x02 => Command::IAmHere,
            0x03 => Command::GetStatus,
            0x04 => Command::Status,
            0x05 => Command::SetStatus,
            0x06 => Command::Tick,
            _ => Command::Unknown(code),
        }
    }
}

impl From<Command> for u8 {
    fn from(command: Command) -> Self {
        match command {
            Command::WhoIsHere => 0x01,
            Command::IAmHere => 0x02,
            Command::GetStatus => 0x03,
            Command::Status => 0x04,
            Command::SetStatus => 0x05,
            Command::Tick => 0x06,
            Command::Unknown(code) => code,
        }
    }
}

/// A sensor rule as announced by an environment sensor.
///
/// `op` packs the target state (bit 0), the comparison direction (bit 1, set
/// for "greater than") and the watched channel (bits 2-3).
#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
pub struct Trigger {
    pub op: u8,
    pub threshold: u64,
    pub target: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandBody {
    Name {
        dev_name: String,
    },
    SensorCapabilities {
        dev_name: String,
        sensor_mask: u8,
        triggers: Vec<Trigger>,
    },
    SwitchTopology {
        dev_name: String,
        controlled: Vec<String>,
    },
    SensorReading {
        values: Vec<u64>,
    },
    SingleValue {
        value: u8,
    },
    Timestamp {
        value: u64,
    },
}

/// Body layout selected by the `(device_type, command)` pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BodyKind {
    Name,
    SensorCapabilities,
    SwitchTopology,
    SensorReading,
    SingleValue,
    Timestamp,
}

fn body_kind(device_type: DeviceType, command: Command) -> Option<BodyKind> {
    use Command::*;
    use DeviceType::*;

    match (device_type, command) {
        (Hub | Lamp | Socket | Clock, WhoIsHere | IAmHere) => Some(BodyKind::Name),
        (EnvSensor, WhoIsHere | IAmHere) => Some(BodyKind::SensorCapabilities),
        (Switch, WhoIsHere | IAmHere) => Some(BodyKind::SwitchTopology),
        (EnvSensor, Status) => Some(BodyKind::SensorReading),
        (Switch | Lamp | Socket, Status) | (Lamp | Socket, SetStatus) => {
            Some(BodyKind::SingleValue)
        }
        (Clock, Tick) => Some(BodyKind::Timestamp),
        _ => None,
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Payload {
    pub src: u64,
    pub dst: u64,
    pub serial: u64,
    pub device_type: DeviceType,
    pub command: Command,
    pub body: Option<CommandBody>,
}

impl Payload {
    pub fn encode(&self) -> Result<Vec<u8>, ProtocolError> {
        let mut buf = BytesMut::with_capacity(16);
        varint::put(&mut buf, self.src);
        varint::put(&mut buf, self.dst);
        varint::put(&mut buf, self.serial);
        buf.put_u8(self.device_type.into());
        buf.put_u8(self.command.into());
        if let Some(body) = &self.body {
            body.encode_into(&mut buf)?;
        }
        Ok(buf.to_vec())
    }

    /// Decode a payload. Pairs without a known body layout decode with
    /// `body: None`; any bytes left after a recognised body are ignored.
    pub fn decode(data: &[u8]) -> Result<Self, ProtocolError> {
        let mut reader = Reader::new(data);
        let src = reader.varint()?;
        let dst = reader.varint()?;
        let serial = reader.varint()?;
        let device_type = DeviceType::from(reader.u8()?);
        let command = Command::from(reader.u8()?);

        let body = match body_kind(device_type, command) {
            Some(kind) => Some(CommandBody::decode(kind, &mut reader)?),
            None => None,
        };

        Ok(Payload {
            src,
            dst,
            serial,
            device_type,
            command,
            body,
        })
    }

    /// The hub time carried by a clock tick, if this is one.
    pub fn tick_time(&self) -> Option<u64> {
        match (self.device_type, self.command, &self.body) {
            (DeviceType::Clock, Command::Tick, Some(CommandBody::Timestamp { value })) => {
                Some(*value)
            }
            _ => None,
        }
    }
}

impl CommandBody {
    fn encode_into(&self, buf: &mut BytesMut) -> Result<(), ProtocolError> {
        match self {
            CommandBody::Name { dev_name } => put_str(buf, "device name", dev_name)?,
            CommandBody::SensorCapabilities {
                dev_name,
                sensor_mask,
                triggers,
            } => {
                put_str(buf, "device name", dev_name)?;
                buf.put_u8(*sensor_mask);
                buf.put_u8(count(triggers.len(), "trigger list")?);
                for trigger in triggers {
                    buf.put_u8(trigger.op);
                    varint::put(buf, trigger.threshold);
                    put_str(buf, "trigger target", &trigger.target)?;
                }
            }
            CommandBody::SwitchTopology {
                dev_name,
                controlled,
            } => {
                put_str(buf, "device name", dev_name)?;
                buf.put_u8(count(controlled.len(), "controlled device list")?);
                for name in controlled {
                    put_str(buf, "controlled device name", name)?;
                }
            }
            CommandBody::SensorReading { values } => {
                buf.put_u8(count(values.len(), "sensor value list")?);
                for value in values {
                    varint::put(buf, *value);
                }
            }
            CommandBody::SingleValue { value } => buf.put_u8(*value),
            CommandBody::Timestamp { value } => varint::put(buf, *value),
        }
        Ok(())
    }

    fn decode(kind: BodyKind, reader: &mut Reader<'_>) -> Result<Self, ProtocolError> {
        let body = match kind {
            BodyKind::Name => CommandBody::Name {
                dev_name: reader.short_str("device name")?,
            },
            BodyKind::SensorCapabilities => {
                let dev_name = reader.short_str("device name")?;
                let sensor_mask = reader.u8()?;
                let len = reader.u8()?;
                let mut triggers = Vec::with_capacity(len as usize);
                for _ in 0..len {
                    let op = reader.u8()?;
                    let threshold = reader.varint()?;
                    let target = reader.short_str("trigger target")?;
                    triggers.push(Trigger {
                        op,
                        threshold,
                        target,
                    });
                }
                CommandBody::SensorCapabilities {
                    dev_name,
                    sensor_mask,
                    triggers,
                }
            }
            BodyKind::SwitchTopology => {
                let dev_name = reader.short_str("device name")?;
                let len = reader.u8()?;
                let controlled = (0..len)
                    .map(|_| reader.short_str("controlled device name"))
                    .collect::<Result<Vec<_>, _>>()?;
                CommandBody::SwitchTopology {
                    dev_name,
                    controlled,
                }
            }
            BodyKind::SensorReading => {
                let len = reader.u8()?;
                let values = (0..len)
                    .map(|_| reader.varint())
                    .collect::<Result<Vec<_>, _>>()?;
                CommandBody::SensorReading { values }
            }
            BodyKind::SingleValue => CommandBody::SingleValue { value: reader.u8()? },
            BodyKind::Timestamp => CommandBody::Timestamp {
                value: reader.varint()?,
            },
        };
        Ok(body)
    }
}

fn count(len: usize, field: &'static str) -> Result<u8, ProtocolError> {
    u8::try_from(len).map_err(|_| ProtocolError::FieldTooLong { field, len })
}

fn put_str(buf: &mut BytesMut, field: &'static str, value: &str) -> Result<(), ProtocolError> {
    buf.put_u8(count(value.len(), field)?);
    buf.put_slice(value.as_bytes());
    Ok(())
}

/// Bounds-checked cursor over a payload.
struct Reader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(data: &'a [u8]) -> Self {
        Reader { data, pos: 0 }
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], ProtocolError> {
        let remaining = self.data.len() - self.pos;
        if remaining < n {
            return Err(ProtocolError::Truncated {
                offset: self.pos,
                needed: n - remaining,
            });
        }
        let slice = &self.data[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    fn u8(&mut self) -> Result<u8, ProtocolError> {
        Ok(self.take(1)?[0])
    }

    fn varint(&mut self) -> Result<u64, ProtocolError> {
        let (value, used) = varint::decode(&self.data[self.pos..]).map_err(|e| e.at(self.pos))?;
        self.pos += used;
        Ok(value)
    }

    fn short_str(&mut self, field: &'static str) -> Result<String, ProtocolError> {
        let len = self.u8()? as usize;
        let bytes = self.take(len)?;
        String::from_utf8(bytes.to_vec()).map_err(|_| ProtocolError::InvalidUtf8 { field })
    }
}
