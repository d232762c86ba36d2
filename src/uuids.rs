use btleplug::api::bleuuid::uuid_from_u16;
use uuid::Uuid;

pub mod service {
    use super::*;

    pub const SMART_BMS: Uuid = uuid_from_u16(0xff00);
}

pub mod characteristic {
    use super::*;

    /// Notify channel streaming response frames
    pub const NOTIFY: Uuid = uuid_from_u16(0xff01);
    /// Write channel accepting read commands
    pub const WRITE: Uuid = uuid_from_u16(0xff02);
}
