//! BLE Connection Module
//!
//! Opens the serial service on a discovered device and owns the native
//! handles for as long as the link is up.

use crate::infrastructure::bluetooth::backend::{CharRole, DeviceEvents, SetupError, WriteError};
use crate::infrastructure::bluetooth::protocol::GattProfile;
use tracing::{debug, info, warn};
use windows::core::GUID;
use windows::Devices::Bluetooth::GenericAttributeProfile::{
    GattCharacteristic, GattClientCharacteristicConfigurationDescriptorValue,
    GattCommunicationStatus, GattDeviceService, GattValueChangedEventArgs,
};
use windows::Devices::Bluetooth::{BluetoothCacheMode, BluetoothConnectionStatus, BluetoothLEDevice};
use windows::Devices::Enumeration::DeviceAccessStatus;
use windows::Foundation::TypedEventHandler;
use windows::Storage::Streams::{DataReader, DataWriter};

/// HRESULT for ERROR_DEVICE_NOT_AVAILABLE, returned when the radio is off.
const HR_DEVICE_NOT_AVAILABLE: u32 = 0x800710DF;
/// E_BLUETOOTH_ATT_WRITE_NOT_PERMITTED
const HR_ATT_WRITE_NOT_PERMITTED: u32 = 0x80650003;
/// E_ACCESSDENIED
const HR_ACCESS_DENIED: u32 = 0x80070005;
/// RPC_E_DISCONNECTED
const HR_DISCONNECTED: u32 = 0x80010108;

/// An open serial link and every native handle it holds.
pub struct OpenLink {
    device: BluetoothLEDevice,
    service: GattDeviceService,
    tx: GattCharacteristic,
    rx: GattCharacteristic,
    value_token: i64,
    status_token: i64,
}

fn hresult(e: &windows::core::Error) -> u32 {
    e.code().0 as u32
}

/// Open the device at `address` and set up the serial service.
pub fn open_link(
    address: u64,
    profile: &GattProfile,
    events: DeviceEvents,
) -> Result<OpenLink, SetupError> {
    info!("Getting Bluetooth LE device {:#X}", address);
    let device = BluetoothLEDevice::FromBluetoothAddressAsync(address)
        .and_then(|op| op.get())
        .map_err(|e| {
            if hresult(&e) == HR_DEVICE_NOT_AVAILABLE {
                SetupError::RadioOff
            } else {
                SetupError::DeviceUnavailable(e.message())
            }
        })?;

    let service = find_service(&device, profile)?;
    let tx = find_characteristic(&service, profile.tx, CharRole::Tx)?;
    let rx = find_characteristic(&service, profile.rx, CharRole::Rx)?;
    enable_notifications(&rx)?;

    let platform = |e: windows::core::Error| SetupError::Platform(e.message());

    // Inbound data handler
    let data_events = events.clone();
    let value_handler = TypedEventHandler::new(
        move |_: windows::core::Ref<GattCharacteristic>,
              args: windows::core::Ref<GattValueChangedEventArgs>| {
            if let Some(args) = args.as_ref() {
                let value = args.CharacteristicValue()?;
                let reader = DataReader::FromBuffer(&value)?;
                let length = reader.UnconsumedBufferLength()? as usize;
                let mut bytes = vec![0u8; length];
                reader.ReadBytes(&mut bytes)?;
                data_events.data_received(bytes);
            }
            Ok(())
        },
    );
    let value_token = rx.ValueChanged(&value_handler).map_err(platform)?;

    // Connection status handler
    let status_handler =
        TypedEventHandler::new(move |dev: windows::core::Ref<BluetoothLEDevice>, _| {
            if let Some(dev) = dev.as_ref() {
                if dev.ConnectionStatus()? == BluetoothConnectionStatus::Disconnected {
                    // Teardown removes this very handler, so run it elsewhere.
                    let events = events.clone();
                    std::thread::spawn(move || events.link_lost());
                }
            }
            Ok(())
        });
    let status_token = match device.ConnectionStatusChanged(&status_handler) {
        Ok(token) => token,
        Err(e) => {
            let _ = rx.RemoveValueChanged(value_token);
            return Err(platform(e));
        }
    };

    info!("Serial service ready");
    Ok(OpenLink {
        device,
        service,
        tx,
        rx,
        value_token,
        status_token,
    })
}

fn find_service(
    device: &BluetoothLEDevice,
    profile: &GattProfile,
) -> Result<GattDeviceService, SetupError> {
    let not_found = |e: windows::core::Error| SetupError::ServiceNotFound(e.message());

    let result = device
        .GetGattServicesForUuidWithCacheModeAsync(
            GUID::from_u128(profile.service),
            BluetoothCacheMode::Uncached,
        )
        .and_then(|op| op.get())
        .map_err(not_found)?;

    let status = result.Status().map_err(not_found)?;
    let services = result.Services().map_err(not_found)?;
    if status != GattCommunicationStatus::Success || services.Size().map_err(not_found)? == 0 {
        return Err(SetupError::ServiceNotFound(format!("{:?}", status)));
    }
    let service = services.GetAt(0).map_err(not_found)?;
    debug!("GattService found");

    let access = service
        .RequestAccessAsync()
        .and_then(|op| op.get())
        .map_err(|e| SetupError::AccessDenied(e.message()))?;
    if access != DeviceAccessStatus::Allowed {
        return Err(SetupError::AccessDenied(format!("{:?}", access)));
    }

    Ok(service)
}

fn find_characteristic(
    service: &GattDeviceService,
    uuid: u128,
    role: CharRole,
) -> Result<GattCharacteristic, SetupError> {
    let missing = |status: String| SetupError::CharacteristicMissing { role, status };

    let result = service
        .GetCharacteristicsForUuidWithCacheModeAsync(
            GUID::from_u128(uuid),
            BluetoothCacheMode::Uncached,
        )
        .and_then(|op| op.get())
        .map_err(|e| missing(e.message()))?;

    let status = result.Status().map_err(|e| missing(e.message()))?;
    let characteristics = result.Characteristics().map_err(|e| missing(e.message()))?;
    let count = characteristics.Size().map_err(|e| missing(e.message()))?;
    if status != GattCommunicationStatus::Success || count == 0 {
        return Err(missing(format!("{:?}", status)));
    }

    debug!("Found {} characteristic", role);
    characteristics.GetAt(0).map_err(|e| missing(e.message()))
}

fn enable_notifications(rx: &GattCharacteristic) -> Result<(), SetupError> {
    debug!("Setting Notify descriptor");
    let status = rx
        .WriteClientCharacteristicConfigurationDescriptorAsync(
            GattClientCharacteristicConfigurationDescriptorValue::Notify,
        )
        .and_then(|op| op.get())
        .map_err(|e| SetupError::NotifyFailed(e.message()))?;

    if status != GattCommunicationStatus::Success {
        return Err(SetupError::NotifyRejected(format!("{:?}", status)));
    }
    Ok(())
}

impl OpenLink {
    /// Write one buffer to TX and wait for the result.
    pub fn write(&self, data: &[u8]) -> Result<(), WriteError> {
        let rejected = |e: windows::core::Error| match hresult(&e) {
            HR_ATT_WRITE_NOT_PERMITTED | HR_ACCESS_DENIED => WriteError::NotPermitted(e.message()),
            HR_DISCONNECTED => WriteError::LinkLost,
            _ => WriteError::Rejected(e.message()),
        };

        let writer = DataWriter::new().map_err(rejected)?;
        writer.WriteBytes(data).map_err(rejected)?;
        let buffer = writer.DetachBuffer().map_err(rejected)?;

        let status = self
            .tx
            .WriteValueAsync(&buffer)
            .and_then(|op| op.get())
            .map_err(rejected)?;

        match status {
            GattCommunicationStatus::Success => Ok(()),
            GattCommunicationStatus::Unreachable => Err(WriteError::LinkLost),
            other => Err(WriteError::Rejected(format!("{:?}", other))),
        }
    }

    /// Unsubscribe and dispose of every handle.
    pub fn close(self) {
        if let Err(e) = self.rx.RemoveValueChanged(self.value_token) {
            warn!("Failed to unsubscribe RX: {}", e.message());
        }
        if let Err(e) = self.device.RemoveConnectionStatusChanged(self.status_token) {
            warn!("Failed to unsubscribe connection status: {}", e.message());
        }
        let _ = self.service.Close();
        let _ = self.device.Close();
        info!("Released device handles");
    }
}
