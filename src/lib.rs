#![doc = include_str!("../README.md")]
mod format;
mod logger;
mod profile;
mod protocol;
mod result;
mod session;
mod store;
mod supervisor;
mod transport;
mod types;
mod utils;
mod uuids;

use async_trait::async_trait;
use btleplug::{
    api::{
        BDAddr, Central, CentralEvent, CharPropFlags, Characteristic, Peripheral, ScanFilter,
        Service, WriteType,
    },
    platform::{Adapter, Peripheral as Periphery, PeripheralId as PeripheryId},
};
use core::time::Duration;
use futures::StreamExt;
use pretty_hex::PrettyHex;
use std::sync::Arc;
use tokio::{sync::RwLock, time::timeout};
use tracing as log;
use uuid::Uuid;

pub use format::Format;
pub use logger::{LoggingToggle, SampleLogger};
pub use macaddr::MacAddr6 as MacAddr;
pub use profile::{Profile, Revision};
pub use protocol::{decode_frame, read_command, FrameAssembler, FrameKind, MIN_FRAME_LEN};
pub use result::{Error, ErrorKind, Result};
pub use session::{DeviceSession, Timings};
pub use store::DeviceStateStore;
pub use supervisor::PollSupervisor;
pub use transport::{NotifyStream, Transport};
pub use types::{CellVoltages, DeviceConfig, DeviceId, DeviceState, PackStatus, Record};

impl DeviceId {
    pub async fn match_periphery(&self, periphery: &Periphery) -> Result<bool> {
        Ok(match self {
            DeviceId::Mac(mac) => periphery.address().as_ref() == mac.as_bytes(),
            DeviceId::Name(name) => periphery
                .properties()
                .await?
                .and_then(|props| props.local_name.map(|local_name| &local_name == name))
                .unwrap_or(false),
        })
    }
}

/// BLE link to one smart BMS device.
///
/// Resolves the device by MAC or advertised name, scanning when it is not
/// already known to the adapter. Implements [`Transport`] for the polling
/// session.
pub struct Client {
    device_id: DeviceId,
    adapter: Adapter,
    periphery_id: Arc<RwLock<Option<PeripheryId>>>,
    options: Options,
}

/// Client options
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Options {
    pub scan_timeout: Duration,
    pub request_timeout: Duration,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            scan_timeout: Duration::from_secs(30),
            request_timeout: Duration::from_secs(5),
        }
    }
}

impl Client {
    /// Create client for BMS device
    pub fn new(adapter: &Adapter, device_id: &DeviceId, options: &Options) -> Self {
        let adapter = adapter.clone();
        let device_id = device_id.clone();
        let periphery_id = Arc::new(RwLock::new(None));
        let options = *options;
        Self {
            device_id,
            adapter,
            periphery_id,
            options,
        }
    }

    /// Connect to device if not connected
    pub async fn open(&self) -> Result<()> {
        let periphery = self.find_periphery().await?;

        if periphery.is_connected().await? {
            log::debug!("Periphery already connected: {periphery:?}");
        } else {
            log::debug!("Connect periphery: {periphery:?}");
            periphery.connect().await?;
        }

        Ok(())
    }

    /// Disconnect from device if connected
    pub async fn close(&self) -> Result<()> {
        if let Some(periphery_id) = self.get_periphery_id().await {
            let periphery = self.adapter.peripheral(&periphery_id).await?;
            if periphery.is_connected().await? {
                log::debug!("Disconnect periphery: {periphery:?}");
                periphery.disconnect().await?;
            }
        }
        Ok(())
    }

    /// Get device identifier
    pub fn device_id(&self) -> &DeviceId {
        &self.device_id
    }

    /// Get bluetooth device MAC address
    pub async fn address(&self) -> Result<BDAddr> {
        let periphery = self.get_periphery().await?;

        Ok(periphery.address())
    }

    /// Get bluetooth device MAC address
    pub async fn mac_address(&self) -> Result<MacAddr> {
        self.address()
            .await
            .map(|address| address.into_inner().into())
    }

    /// Get bluetooth device name
    pub async fn device_name(&self) -> Result<String> {
        let periphery = self.get_periphery().await?;

        periphery
            .properties()
            .await?
            .and_then(|props| props.local_name)
            .ok_or(Error::NotFound)
    }

    async fn get_periphery_id(&self) -> Option<PeripheryId> {
        self.periphery_id.read().await.clone()
    }

    async fn set_periphery_id(&self, periphery_id: Option<PeripheryId>) {
        *self.periphery_id.write().await = periphery_id;
    }

    async fn get_periphery(&self) -> Result<Periphery> {
        if let Some(periphery_id) = self.get_periphery_id().await {
            if let Ok(periphery) = self.adapter.peripheral(&periphery_id).await {
                return Ok(periphery);
            }
        }
        self.set_periphery_id(None).await;
        Err(Error::LostConnection)
    }

    async fn find_periphery(&self) -> Result<Periphery> {
        // try use already known
        if let Some(periphery_id) = self.get_periphery_id().await {
            if let Ok(periphery) = self.adapter.peripheral(&periphery_id).await {
                return Ok(periphery);
            }
        }

        // try find by device id
        for periphery in self.adapter.peripherals().await? {
            if self.device_id.match_periphery(&periphery).await? {
                self.set_periphery_id(periphery.id().clone().into()).await;
                return Ok(periphery);
            }
        }

        log::info!("Start scan peripherals");
        self.adapter
            .start_scan(ScanFilter {
                services: vec![uuids::service::SMART_BMS],
            })
            .await?;

        let scan_result = timeout(self.options.scan_timeout, self.scan())
            .await
            .map_err(From::from)
            .unwrap_or_else(Err);

        log::info!("Stop scan peripherals");
        if let Err(error) = self.adapter.stop_scan().await {
            log::error!("Error while stopping scan: {error}");
        }

        match &scan_result {
            Ok(periphery) => self.set_periphery_id(periphery.id().clone().into()).await,
            Err(error) => log::error!("Error while scanning peripherals: {error}"),
        }

        scan_result
    }

    async fn scan(&self) -> Result<Periphery> {
        let mut events = self.adapter.events().await?;

        while let Some(event) = events.next().await {
            log::trace!("Adapter event: {event:?}");
            if let CentralEvent::DeviceDiscovered(periphery_id) = event {
                let periphery = self.adapter.peripheral(&periphery_id).await?;
                if check_service(&periphery, &uuids::service::SMART_BMS).await?
                    && self.device_id.match_periphery(&periphery).await?
                {
                    log::info!("Found peripheral: {periphery:?}");
                    return Ok(periphery);
                }
            }
        }

        Err(Error::NotFound)
    }

    /// Find BMS devices
    pub async fn find(adapter: &Adapter, options: &Options) -> Result<Vec<DeviceId>> {
        log::info!("Start scan peripherals");
        adapter
            .start_scan(ScanFilter {
                services: vec![uuids::service::SMART_BMS],
            })
            .await?;

        let mut found_peripheries = Vec::default();

        let scan_result = timeout(
            options.scan_timeout,
            Self::scan_all(adapter, &mut found_peripheries),
        )
        .await
        .or_else(|_| Ok(Ok(()))) // ignore timeout
        .unwrap_or_else(Err);

        log::info!("Stop scan peripherals");
        if let Err(error) = adapter.stop_scan().await {
            log::error!("Error while stopping scan: {error}");
        }

        if let Err(error) = &scan_result {
            log::error!("Error while scanning peripherals: {error}");
        }

        scan_result?;

        Ok(found_peripheries)
    }

    async fn scan_all(adapter: &Adapter, found_peripheries: &mut Vec<DeviceId>) -> Result<()> {
        let mut events = adapter.events().await?;

        while let Some(event) = events.next().await {
            log::trace!("Adapter event: {event:?}");
            if let CentralEvent::DeviceDiscovered(periphery_id) = event {
                let periphery = adapter.peripheral(&periphery_id).await?;
                if check_service(&periphery, &uuids::service::SMART_BMS).await? {
                    log::info!("Found peripheral: {periphery:?}");
                    found_peripheries.push(DeviceId::Mac(periphery.address().into_inner().into()));
                }
            }
        }

        Err(Error::NotFound)
    }

    fn pick_write_type(characteristic: &Characteristic) -> WriteType {
        if characteristic
            .properties
            .contains(CharPropFlags::WRITE_WITHOUT_RESPONSE)
        {
            WriteType::WithoutResponse
        } else {
            WriteType::WithResponse
        }
    }
}

#[async_trait]
impl Transport for Client {
    async fn connect(&self) -> Result<()> {
        self.open().await
    }

    async fn disconnect(&self) -> Result<()> {
        self.close().await
    }

    async fn subscribe(&self) -> Result<NotifyStream> {
        let periphery = self.get_periphery().await?;

        periphery.discover_services().await?;

        let characteristic = find_service_characteristic(
            &periphery,
            &uuids::service::SMART_BMS,
            &uuids::characteristic::NOTIFY,
            CharPropFlags::NOTIFY,
        )
        .ok_or(Error::NotFound)?;

        periphery.subscribe(&characteristic).await?;

        let uuid = characteristic.uuid;
        let notifications = periphery.notifications().await?;

        Ok(notifications
            .filter_map(move |notification| {
                let value = (notification.uuid == uuid).then_some(notification.value);
                async move { value }
            })
            .boxed())
    }

    async fn write_command(&self, data: &[u8]) -> Result<()> {
        let periphery = self.get_periphery().await?;

        let characteristic = find_service_characteristic(
            &periphery,
            &uuids::service::SMART_BMS,
            &uuids::characteristic::WRITE,
            CharPropFlags::empty(),
        )
        .ok_or(Error::NotFound)?;

        log::trace!("Send command");
        log::trace!("{:?}", data.hex_dump());

        match timeout(
            self.options.request_timeout,
            periphery.write(&characteristic, data, Self::pick_write_type(&characteristic)),
        )
        .await
        {
            Ok(result) => Ok(result?),
            Err(elapsed) => Err(elapsed.into()),
        }
    }
}

async fn check_service(periphery: &Periphery, service_uuid: &Uuid) -> Result<bool> {
    Ok(periphery
        .properties()
        .await?
        .map(|props| props.services.iter().any(|uuid| uuid == service_uuid))
        .unwrap_or(false))
}

fn find_service(periphery: &Periphery, service_uuid: &Uuid) -> Option<Service> {
    log::trace!("Services: {:?}", periphery.services());
    periphery
        .services()
        .iter()
        .find(|service| &service.uuid == service_uuid)
        .cloned()
}

fn find_service_characteristic(
    periphery: &Periphery,
    service_uuid: &Uuid,
    characteristic_uuid: &Uuid,
    characteristic_properties: CharPropFlags,
) -> Option<Characteristic> {
    find_service(periphery, service_uuid).and_then(|service| {
        service
            .characteristics
            .iter()
            .find(|characteristic| {
                &characteristic.uuid == characteristic_uuid
                    && characteristic
                        .properties
                        .contains(characteristic_properties)
            })
            .cloned()
    })
}
