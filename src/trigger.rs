use crate::messages::{DeviceType, Trigger};
use crate::registry::DeviceRecord;

/// Number of sensor channels an environment sensor can expose.
pub const CHANNELS: usize = 4;

/// Channel value for a sensor the device does not have.
pub const NO_READING: i64 = -1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Greater,
    Less,
}

impl Trigger {
    pub fn target_state(&self) -> u8 {
        self.op & 0x01
    }

    pub fn direction(&self) -> Direction {
        if self.op & 0x02 != 0 {
            Direction::Greater
        } else {
            Direction::Less
        }
    }

    pub fn channel(&self) -> usize {
        ((self.op >> 2) & 0x03) as usize
    }

    pub fn fires(&self, channels: &[i64; CHANNELS]) -> bool {
        let threshold = i64::try_from(self.threshold).unwrap_or(i64::MAX);
        compare(self.direction(), channels[self.channel()], threshold)
    }
}

/// A "less than" rule never fires on [`NO_READING`]; a "greater than" rule
/// compares it like any other value.
pub fn compare(direction: Direction, reading: i64, threshold: i64) -> bool {
    match direction {
        Direction::Greater => reading > threshold,
        Direction::Less => reading < threshold && reading != NO_READING,
    }
}

/// Spread a reading over the four channel slots. Bit `i` of `mask` marks
/// channel `i` as present; present channels consume `values` in ascending
/// bit order. Slots without a value hold [`NO_READING`].
pub fn channels(mask: u8, values: &[u64]) -> [i64; CHANNELS] {
    let mut slots = [NO_READING; CHANNELS];
    let mut values = values.iter();
    for (bit, slot) in slots.iter_mut().enumerate() {
        if mask & (1 << bit) == 0 {
            continue;
        }
        if let Some(&value) = values.next() {
            *slot = i64::try_from(value).unwrap_or(i64::MAX);
        }
    }
    slots
}

/// A state change to request from a device, addressed by name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Actuation {
    pub target: String,
    pub state: u8,
}

/// Actuations implied by the latest status of `record`.
///
/// A switch drives every device it controls to its own state. An environment
/// sensor fires each trigger whose condition holds for the current reading.
/// Other device types never actuate.
pub fn evaluate(record: &DeviceRecord) -> Vec<Actuation> {
    match record.device_type {
        DeviceType::Switch => {
            let state = u8::from(record.status);
            record
                .controlled
                .iter()
                .map(|name| Actuation {
                    target: name.clone(),
                    state,
                })
                .collect()
        }
        DeviceType::EnvSensor => {
            let slots = record.channels();
            record
                .triggers
                .iter()
                .filter(|trigger| trigger.fires(&slots))
                .map(|trigger| Actuation {
                    target: trigger.target.clone(),
                    state: trigger.target_state(),
                })
                .collect()
        }
        _ => Vec::new(),
    }
}
