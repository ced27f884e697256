/*!
 # LED strip output

 Drives the power of an ELK-BLEDOM style Bluetooth LED strip from the switch
 state. Only power commands are used; the strip keeps whatever color and
 brightness it was last given.
*/

use std::time::Duration;

use btleplug::api::{
    Central, CharPropFlags, Characteristic, Manager as _, Peripheral as _, ScanFilter, WriteType,
};
use btleplug::platform::{Adapter, Manager, Peripheral};
use tokio::time;
use tracing::{debug, error, info, instrument, trace, warn};
use uuid::Uuid;

use crate::state::SwitchState;
use crate::{Error, Result};

/// Maximum time to wait for device discovery
const DISCOVERY_TIMEOUT: Duration = Duration::from_secs(10);

/// Attempts per power command
const MAX_RETRIES: u8 = 3;

const FFF3: Uuid = Uuid::from_u128(0x0000fff3_0000_1000_8000_00805f9b34fb);
const FFE1: Uuid = Uuid::from_u128(0x0000ffe1_0000_1000_8000_00805f9b34fb);

/// Supported device families
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceType {
    ElkBle,
    LedBle,
    Melk,
    ElkBulb,
    ElkLampl,
    Unknown,
}

impl DeviceType {
    /// Recognizes a device by its advertised name
    pub fn from_name(name: &str) -> Self {
        if name.starts_with("ELK-BLE") {
            DeviceType::ElkBle
        } else if name.starts_with("LEDBLE") {
            DeviceType::LedBle
        } else if name.starts_with("MELK") {
            DeviceType::Melk
        } else if name.starts_with("ELK-BULB") {
            DeviceType::ElkBulb
        } else if name.starts_with("ELK-LAMPL") {
            DeviceType::ElkLampl
        } else {
            DeviceType::Unknown
        }
    }

    fn write_uuid(&self) -> Uuid {
        match self {
            DeviceType::LedBle => FFE1,
            _ => FFF3,
        }
    }

    /// Power command for this family
    pub fn power_command(&self, state: SwitchState) -> [u8; 9] {
        match (self, state) {
            (DeviceType::ElkBle, SwitchState::On) => {
                [0x7e, 0x00, 0x04, 0xf0, 0x00, 0x01, 0xff, 0x00, 0xef]
            }
            (_, SwitchState::On) => [0x7e, 0x00, 0x04, 0x01, 0x00, 0x00, 0x00, 0x00, 0xef],
            (_, SwitchState::Off) => [0x7e, 0x00, 0x04, 0x00, 0x00, 0x00, 0xff, 0x00, 0xef],
        }
    }
}

/// A connected LED strip used as the switched device
pub struct LedSwitch {
    peripheral: Peripheral,
    write_characteristic: Characteristic,
    device_type: DeviceType,
    /// Delay after each command, in milliseconds
    pub command_delay: u64,
}

#[instrument(skip(manager))]
async fn get_central(manager: &Manager) -> Result<Adapter> {
    debug!("Getting default Bluetooth adapter");
    manager
        .adapters()
        .await?
        .into_iter()
        .next()
        .ok_or_else(|| {
            error!("No Bluetooth adapters found");
            Error::NoBluetoothAdapters
        })
}

impl LedSwitch {
    /// Scans for a strip and connects to it.
    ///
    /// With an address (MAC or platform id) only that device is accepted,
    /// otherwise the first compatible device wins.
    #[instrument]
    pub async fn connect(addr: Option<&str>) -> Result<LedSwitch> {
        info!("Initializing BLE LED switch");
        let manager = Manager::new().await?;
        let central = get_central(&manager).await?;

        info!("Scanning for compatible BLE devices...");
        central.start_scan(ScanFilter::default()).await?;

        let start_time = std::time::Instant::now();
        let mut found: Option<(Peripheral, DeviceType)> = None;

        while found.is_none() && start_time.elapsed() < DISCOVERY_TIMEOUT {
            for p in central.peripherals().await? {
                let Ok(Some(props)) = p.properties().await else {
                    continue;
                };
                let Some(name) = props.local_name else {
                    continue;
                };

                if let Some(addr) = addr {
                    let addr = addr.to_lowercase();
                    if p.address().to_string().to_lowercase() != addr
                        && p.id().to_string().to_lowercase() != addr
                    {
                        continue;
                    }
                }

                let device_type = DeviceType::from_name(&name);
                debug!("Found device: {} (type: {:?})", name, device_type);
                if device_type == DeviceType::Unknown && addr.is_none() {
                    continue;
                }
                if device_type == DeviceType::Unknown {
                    warn!("Device {} is not a known LED strip, trying anyway", name);
                }
                found = Some((p, device_type));
                break;
            }

            if found.is_none() {
                trace!("Still scanning...");
                time::sleep(Duration::from_millis(500)).await;
            }
        }

        central.stop_scan().await?;

        let Some((peripheral, device_type)) = found else {
            error!(
                "No compatible LED device found within {} seconds",
                DISCOVERY_TIMEOUT.as_secs()
            );
            return Err(Error::NoCompatibleDevice);
        };

        info!("Connecting to device...");
        if !peripheral.is_connected().await? {
            peripheral.connect().await?;
        }
        debug!("Discovering services...");
        peripheral.discover_services().await?;

        let write_uuid = device_type.write_uuid();
        let write_characteristic = peripheral
            .characteristics()
            .into_iter()
            .find(|c| c.uuid == write_uuid)
            .ok_or(Error::CharacteristicNotFound(write_uuid.to_string()))?;
        debug!("Found write characteristic: {}", write_characteristic.uuid);

        info!("Connected to {:?} LED strip", device_type);
        Ok(LedSwitch {
            peripheral,
            write_characteristic,
            device_type,
            command_delay: 15,
        })
    }

    pub fn device_type(&self) -> DeviceType {
        self.device_type
    }

    /// Powers the strip on or off
    #[instrument(skip(self))]
    pub async fn apply(&self, state: SwitchState) -> Result<()> {
        self.send_command(&self.device_type.power_command(state)).await?;
        time::sleep(Duration::from_millis(self.command_delay)).await;
        info!("LED strip powered {}", state);
        Ok(())
    }

    #[instrument(skip(self, command), fields(cmd_length = command.len()))]
    async fn send_command(&self, command: &[u8]) -> Result<()> {
        // Prefer WriteWithResponse when supported
        let write_type = if self
            .write_characteristic
            .properties
            .contains(CharPropFlags::WRITE)
        {
            WriteType::WithResponse
        } else {
            WriteType::WithoutResponse
        };

        for attempt in 1..=MAX_RETRIES {
            trace!("Sending BLE command (attempt {}/{})", attempt, MAX_RETRIES);
            match self
                .peripheral
                .write(&self.write_characteristic, command, write_type)
                .await
            {
                Ok(()) => return Ok(()),
                Err(e) if attempt < MAX_RETRIES => {
                    warn!("Command failed (attempt {}/{}): {}", attempt, MAX_RETRIES, e);
                    time::sleep(Duration::from_millis(300)).await;
                }
                Err(e) => {
                    error!("Command failed permanently: {}", e);
                    return Err(Error::BleError(e.to_string()));
                }
            }
        }

        Err(Error::CommandTimeout(MAX_RETRIES))
    }
}
