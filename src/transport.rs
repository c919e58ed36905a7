use crate::address::Address;
use crate::error::Result;
use crate::protocol;

/// Byte-oriented send channel to the device. Sends must not block.
pub trait Transport {
    fn send(&mut self, message: &[u8]) -> Result<()>;
}

/// Records every message; useful offline and in tests.
impl Transport for Vec<Vec<u8>> {
    fn send(&mut self, message: &[u8]) -> Result<()> {
        self.push(message.to_vec());
        Ok(())
    }
}

/// A transport paired with the device id that outbound SysEx must carry.
pub struct Link<'a> {
    pub device_id: u8,
    pub transport: &'a mut dyn Transport,
}

impl<'a> Link<'a> {
    pub fn new(device_id: u8, transport: &'a mut dyn Transport) -> Self {
        Self {
            device_id,
            transport,
        }
    }

    pub fn request(&mut self, address: Address, length: u32) -> Result<()> {
        log::debug!("RQ1 {} length {:#X}", address, length);
        self.transport
            .send(&protocol::data_request(self.device_id, address, length))
    }

    pub fn send_data(&mut self, address: Address, data: &[u8]) -> Result<()> {
        log::debug!("DT1 {} ({} bytes)", address, data.len());
        self.transport
            .send(&protocol::data_set(self.device_id, address, data))
    }

    pub fn identify(&mut self) -> Result<()> {
        self.transport
            .send(&protocol::identity_request(protocol::BROADCAST_ID))
    }
}
