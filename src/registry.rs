use std::collections::BTreeMap;

use log::{debug, info, warn};
use serde_derive::Serialize;

use crate::messages::{CommandBody, DeviceType, Payload, Trigger};
use crate::trigger::{self, CHANNELS};

/// Everything the hub knows about one device.
#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
pub struct DeviceRecord {
    pub address: u64,
    pub name: String,
    pub device_type: DeviceType,
    pub status: bool,
    pub present: bool,
    /// Names of the devices a switch drives.
    pub controlled: Vec<String>,
    pub sensor_mask: u8,
    pub triggers: Vec<Trigger>,
    pub last_values: Vec<u64>,
    pub last_seen_time: Option<u64>,
}

impl DeviceRecord {
    /// Build a record from a `WhoIsHere`/`IAmHere` announcement. Returns
    /// `None` if the payload carries no identity body.
    pub fn from_announcement(payload: &Payload, present: bool, time: Option<u64>) -> Option<Self> {
        let mut record = DeviceRecord {
            address: payload.src,
            name: String::new(),
            device_type: payload.device_type,
            status: false,
            present,
            controlled: Vec::new(),
            sensor_mask: 0,
            triggers: Vec::new(),
            last_values: Vec::new(),
            last_seen_time: time,
        };

        match payload.body.as_ref()? {
            CommandBody::Name { dev_name } => record.name = dev_name.clone(),
            CommandBody::SensorCapabilities {
                dev_name,
                sensor_mask,
                triggers,
            } => {
                record.name = dev_name.clone();
                record.sensor_mask = *sensor_mask;
                record.triggers = triggers.clone();
            }
            CommandBody::SwitchTopology {
                dev_name,
                controlled,
            } => {
                record.name = dev_name.clone();
                record.controlled = controlled.clone();
            }
            _ => return None,
        }

        Some(record)
    }

    /// Latest reading spread over the channel slots.
    pub fn channels(&self) -> [i64; CHANNELS] {
        trigger::channels(self.sensor_mask, &self.last_values)
    }
}

/// Devices keyed by mesh address. Records are never removed; a device that
/// stops answering is only marked absent.
#[derive(Serialize, Debug, Default)]
#[serde(transparent)]
pub struct Registry {
    devices: BTreeMap<u64, DeviceRecord>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.devices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }

    pub fn get(&self, address: u64) -> Option<&DeviceRecord> {
        self.devices.get(&address)
    }

    /// Records in ascending address order.
    pub fn iter(&self) -> impl Iterator<Item = &DeviceRecord> {
        self.devices.values()
    }

    /// Create or replace the record for the announcing device.
    pub fn upsert_discovered(
        &mut self,
        payload: &Payload,
        present: bool,
        time: Option<u64>,
    ) -> Option<&DeviceRecord> {
        let Some(record) = DeviceRecord::from_announcement(payload, present, time) else {
            warn!(
                "Announcement from {:#x} ({:?}) carries no identity",
                payload.src, payload.device_type
            );
            return None;
        };

        info!(
            "Registered {:?} {} at {:#x} (present: {})",
            record.device_type, record.name, record.address, record.present
        );
        self.devices.insert(record.address, record);
        self.devices.get(&payload.src)
    }

    /// Fold a `Status` report into the sender's record. Only the fields the
    /// report speaks for are touched.
    pub fn apply_status(&mut self, payload: &Payload, time: Option<u64>) -> Option<&DeviceRecord> {
        let Some(record) = self.devices.get_mut(&payload.src) else {
            warn!("Status from unknown device {:#x}", payload.src);
            return None;
        };

        match (record.device_type, payload.body.as_ref()) {
            (
                DeviceType::Switch | DeviceType::Lamp | DeviceType::Socket,
                Some(CommandBody::SingleValue { value }),
            ) => {
                record.status = *value == 1;
                debug!("{} is now {}", record.name, if record.status { "on" } else { "off" });
            }
            (DeviceType::EnvSensor, Some(CommandBody::SensorReading { values })) => {
                let expected = record.sensor_mask.count_ones() as usize;
                if values.len() != expected {
                    warn!(
                        "{} reported {} value(s), mask 0x{:02X} expects {}",
                        record.name,
                        values.len(),
                        record.sensor_mask,
                        expected
                    );
                }
                record.last_values = values.clone();
                debug!("{} reads {:?}", record.name, record.channels());
            }
            (device_type, body) => {
                warn!(
                    "Ignoring status for {} ({:?}) with body {:?}",
                    record.name, device_type, body
                );
                return None;
            }
        }

        if time.is_some() {
            record.last_seen_time = time;
        }
        Some(&*record)
    }

    /// Returns `true` if the device was present before.
    pub fn mark_absent(&mut self, address: u64) -> bool {
        match self.devices.get_mut(&address) {
            Some(record) if record.present => {
                record.present = false;
                info!("{} ({:#x}) stopped responding", record.name, address);
                true
            }
            _ => false,
        }
    }

    pub fn mark_all_present(&mut self) {
        for record in self.devices.values_mut() {
            record.present = true;
        }
    }

    /// First record, in ascending address order, carrying `name`.
    pub fn lookup_by_name(&self, name: &str) -> Option<&DeviceRecord> {
        self.devices.values().find(|record| record.name == name)
    }

    pub fn snapshot_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}
