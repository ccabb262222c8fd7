//! Conversion from btleplug types to peripheral records.

use btleplug::api::{CharPropFlags, PeripheralProperties, Service};
use std::collections::BTreeSet;

use crate::peripheral::{
    AdvertisingData, CharacteristicInfo, CharacteristicProperty, DescriptorInfo, GattTopology,
    Peripheral, ServiceInfo,
};

const PROPERTY_FLAGS: [(CharPropFlags, CharacteristicProperty); 8] = [
    (CharPropFlags::BROADCAST, CharacteristicProperty::Broadcast),
    (CharPropFlags::READ, CharacteristicProperty::Read),
    (
        CharPropFlags::WRITE_WITHOUT_RESPONSE,
        CharacteristicProperty::WriteWithoutResponse,
    ),
    (CharPropFlags::WRITE, CharacteristicProperty::Write),
    (CharPropFlags::NOTIFY, CharacteristicProperty::Notify),
    (CharPropFlags::INDICATE, CharacteristicProperty::Indicate),
    (
        CharPropFlags::AUTHENTICATED_SIGNED_WRITES,
        CharacteristicProperty::AuthenticatedSignedWrites,
    ),
    (
        CharPropFlags::EXTENDED_PROPERTIES,
        CharacteristicProperty::ExtendedProperties,
    ),
];

/// Build a peripheral record from advertised properties.
///
/// Host stacks do not report connectability, so `is_connectable` is left
/// unset.
pub fn peripheral_record(
    identifier: String,
    properties: Option<PeripheralProperties>,
    connected: bool,
) -> Peripheral {
    let properties = properties.unwrap_or_default();

    Peripheral {
        id: identifier,
        name: properties.local_name.clone(),
        rssi: properties.rssi,
        advertising: AdvertisingData {
            local_name: properties.local_name,
            service_uuids: properties.services,
            is_connectable: None,
            tx_power_level: properties.tx_power_level,
            manufacturer_data: properties.manufacturer_data,
            service_data: properties.service_data,
        },
        connected,
        connecting: false,
        services: None,
    }
}

/// Map btleplug property flags to a property list.
pub fn characteristic_properties(flags: CharPropFlags) -> Vec<CharacteristicProperty> {
    PROPERTY_FLAGS
        .iter()
        .filter(|(flag, _)| flags.contains(*flag))
        .map(|(_, property)| *property)
        .collect()
}

/// Flatten discovered services into a [`GattTopology`].
pub fn gatt_topology(services: &BTreeSet<Service>) -> GattTopology {
    let mut topology = GattTopology::default();

    for service in services {
        topology.services.push(ServiceInfo {
            uuid: service.uuid,
            primary: service.primary,
        });

        for characteristic in &service.characteristics {
            topology.characteristics.push(CharacteristicInfo {
                service: characteristic.service_uuid,
                uuid: characteristic.uuid,
                properties: characteristic_properties(characteristic.properties),
                descriptors: characteristic
                    .descriptors
                    .iter()
                    .map(|d| DescriptorInfo::new(d.uuid))
                    .collect(),
            });
        }
    }

    topology
}

#[cfg(test)]
mod tests {
    use super::*;
    use btleplug::api::{Characteristic, Descriptor};
    use pretty_assertions::assert_eq;
    use uuid::Uuid;

    const SERVICE: Uuid = Uuid::from_u128(0x0000_180f_0000_1000_8000_00805f9b34fb);
    const BATTERY_LEVEL: Uuid = Uuid::from_u128(0x0000_2a19_0000_1000_8000_00805f9b34fb);
    const CCCD: Uuid = Uuid::from_u128(0x0000_2902_0000_1000_8000_00805f9b34fb);

    #[test]
    fn test_peripheral_record_from_properties() {
        let properties = PeripheralProperties {
            local_name: Some("FSC-BP109T".to_string()),
            rssi: Some(-55),
            tx_power_level: Some(4),
            services: vec![SERVICE],
            ..Default::default()
        };

        let record = peripheral_record("AA:BB".to_string(), Some(properties), false);

        assert_eq!(record.id, "AA:BB");
        assert_eq!(record.name.as_deref(), Some("FSC-BP109T"));
        assert_eq!(record.rssi, Some(-55));
        assert_eq!(record.advertising.service_uuids, vec![SERVICE]);
        assert_eq!(record.advertising.tx_power_level, Some(4));
        assert!(!record.connected);
        assert!(!record.connecting);
    }

    #[test]
    fn test_peripheral_record_without_properties() {
        let record = peripheral_record("AA:BB".to_string(), None, true);
        assert_eq!(record.name, None);
        assert_eq!(record.rssi, None);
        assert!(record.connected);
    }

    #[test]
    fn test_characteristic_properties() {
        let properties = characteristic_properties(CharPropFlags::READ | CharPropFlags::NOTIFY);
        assert_eq!(
            properties,
            vec![CharacteristicProperty::Read, CharacteristicProperty::Notify]
        );
        assert!(characteristic_properties(CharPropFlags::empty()).is_empty());
    }

    #[test]
    fn test_gatt_topology() {
        let descriptor = Descriptor {
            uuid: CCCD,
            service_uuid: SERVICE,
            characteristic_uuid: BATTERY_LEVEL,
        };
        let characteristic = Characteristic {
            uuid: BATTERY_LEVEL,
            service_uuid: SERVICE,
            properties: CharPropFlags::READ | CharPropFlags::NOTIFY,
            descriptors: BTreeSet::from([descriptor]),
        };
        let service = Service {
            uuid: SERVICE,
            primary: true,
            characteristics: BTreeSet::from([characteristic]),
        };

        let topology = gatt_topology(&BTreeSet::from([service]));

        assert_eq!(
            topology,
            GattTopology {
                services: vec![ServiceInfo {
                    uuid: SERVICE,
                    primary: true,
                }],
                characteristics: vec![CharacteristicInfo {
                    service: SERVICE,
                    uuid: BATTERY_LEVEL,
                    properties: vec![CharacteristicProperty::Read, CharacteristicProperty::Notify],
                    descriptors: vec![DescriptorInfo::new(CCCD)],
                }],
            }
        );
    }
}
