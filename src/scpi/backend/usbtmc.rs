//! USBTMC (USB Test & Measurement Class) transport over `rusb`, framing
//! each transfer with the USBTMC bulk header
//! (`original_source/src/scpi/scpi_usbtmc_libusb.c`).

use std::time::Duration;

use rusb::{DeviceHandle, GlobalContext};

use crate::error::{Error, ErrorKind, Result};
use crate::scpi::core::Transport;

const MAX_TRANSFER_LENGTH: usize = 2048;
const TRANSFER_TIMEOUT: Duration = Duration::from_millis(1000);
const BULK_HEADER_SIZE: usize = 12;

const DEV_DEP_MSG_OUT: u8 = 1;
const REQUEST_DEV_DEP_MSG_IN: u8 = 2;
const DEV_DEP_MSG_IN: u8 = 2;
const EOM: u8 = 0x01;

const USBTMC_REQ_GET_CAPABILITIES: u8 = 7;
const USB488_REQ_REN_CONTROL: u8 = 160;
const USB488_REQ_GO_TO_LOCAL: u8 = 161;

const USBTMC_INT_CAP_LISTEN_ONLY: u8 = 0x01;
const USBTMC_INT_CAP_TALK_ONLY: u8 = 0x02;
const USBTMC_DEV_CAP_TERMCHAR: u8 = 0x01;
const USB488_DEV_CAP_DT1: u8 = 0x01;
const USB488_DEV_CAP_RL1: u8 = 0x02;
const USB488_DEV_CAP_SR1: u8 = 0x04;
const USB488_DEV_CAP_SCPI: u8 = 0x08;

/// Capability bits read from the device's `GET_CAPABILITIES` response
/// during `open()` (`scpi_usbtmc_libusb.c`'s `usbtmc_int_cap`/
/// `usbtmc_dev_cap`/`usb488_dev_cap` fields).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UsbtmcCapabilities {
    /// Device only supports being a listener (USBTMC interface capability).
    pub listen_only: bool,
    /// Device only supports being a talker (USBTMC interface capability).
    pub talk_only: bool,
    /// Device honors a configurable termination character.
    pub term_char: bool,
    /// Device implements the USB488 SCPI subclass.
    pub scpi: bool,
    /// Device supports service request (SR1).
    pub service_request: bool,
    /// Device supports remote/local state (RL1); gates whether
    /// `REN_CONTROL`/`GO_TO_LOCAL` are issued at all.
    pub remote_local: bool,
    /// Device supports a trigger message (DT1).
    pub device_trigger: bool,
}

impl UsbtmcCapabilities {
    fn parse(raw: &[u8; 0x18]) -> Self {
        let usbtmc_int_cap = raw[4];
        let usbtmc_dev_cap = raw[5];
        let usb488_dev_cap = raw[15];
        UsbtmcCapabilities {
            listen_only: usbtmc_int_cap & USBTMC_INT_CAP_LISTEN_ONLY != 0,
            talk_only: usbtmc_int_cap & USBTMC_INT_CAP_TALK_ONLY != 0,
            term_char: usbtmc_dev_cap & USBTMC_DEV_CAP_TERMCHAR != 0,
            scpi: usb488_dev_cap & USB488_DEV_CAP_SCPI != 0,
            service_request: usb488_dev_cap & USB488_DEV_CAP_SR1 != 0,
            remote_local: usb488_dev_cap & USB488_DEV_CAP_RL1 != 0,
            device_trigger: usb488_dev_cap & USB488_DEV_CAP_DT1 != 0,
        }
    }
}

/// Devices that advertise USB488 remote-lockout support (RL1) but are
/// known to not actually implement it.
const BLACKLIST_REMOTE: &[(u16, u16)] = &[
    (0x1ab1, 0x0588), // Rigol DS1000 series
    (0x1ab1, 0x04b0), // Rigol DS2000 series
    (0x1ab1, 0x04b1), // Rigol DS4000 series
    (0x1ab1, 0x0515), // Rigol MSO5000 series
    (0x0957, 0x0588), // Agilent DSO1000 series (rebadged Rigol DS1000)
    (0x0b21, 0xffff), // All Yokogawa devices
    (0xf4ec, 0xffff), // All Siglent SDS devices
];

/// Devices that need a USB port reset performed during `open()`.
const WHITELIST_USB_RESET: &[(u16, u16)] = &[
    (0xf4ec, 0xffff), // All Siglent SDS devices
];

fn blacklisted(list: &[(u16, u16)], vid: u16, pid: u16) -> bool {
    list.iter().any(|&(bvid, bpid)| bvid == vid && (bpid == 0xffff || bpid == pid))
}

/// A SCPI device reached over USBTMC/USB488.
pub struct UsbtmcTransport {
    vendor_id: u16,
    product_id: u16,
    bus_address: (u8, u8),
    handle: Option<DeviceHandle<GlobalContext>>,
    interface: u8,
    bulk_in_ep: u8,
    bulk_out_ep: u8,
    b_tag: u8,
    response_complete: bool,
    capabilities: UsbtmcCapabilities,
}

impl UsbtmcTransport {
    /// Construct a transport for the device identified by `vendor_id`/
    /// `product_id` at the given USB `bus_address` (bus, address), as
    /// produced by enumeration (`usbtmc/<bus>.<address>`).
    pub fn new(vendor_id: u16, product_id: u16, bus_address: (u8, u8)) -> Self {
        UsbtmcTransport {
            vendor_id,
            product_id,
            bus_address,
            handle: None,
            interface: 0,
            bulk_in_ep: 0,
            bulk_out_ep: 0,
            b_tag: 0,
            response_complete: true,
            capabilities: UsbtmcCapabilities::default(),
        }
    }

    /// Capabilities read from the device during `open()`; all `false` until
    /// then.
    pub fn capabilities(&self) -> UsbtmcCapabilities {
        self.capabilities
    }

    fn handle_mut(&mut self) -> Result<&mut DeviceHandle<GlobalContext>> {
        self.handle
            .as_mut()
            .ok_or_else(|| Error::new(ErrorKind::DeviceClosed, "usbtmc transport is not open"))
    }

    fn next_b_tag(&mut self) -> u8 {
        self.b_tag = self.b_tag.wrapping_add(1);
        if self.b_tag == 0 {
            self.b_tag = 1;
        }
        self.b_tag
    }

    fn send_remote_lockout(&mut self) -> Result<()> {
        if !self.capabilities.remote_local || blacklisted(BLACKLIST_REMOTE, self.vendor_id, self.product_id) {
            return Ok(());
        }
        let handle = self.handle_mut()?;
        let request_type = rusb::request_type(rusb::Direction::In, rusb::RequestType::Class, rusb::Recipient::Interface);
        handle
            .read_control(request_type, USB488_REQ_REN_CONTROL, 1, self.interface as u16, &mut [0u8; 1], TRANSFER_TIMEOUT)
            .map_err(Error::from)?;
        Ok(())
    }

    fn send_go_to_local(&mut self) -> Result<()> {
        if !self.capabilities.remote_local {
            return Ok(());
        }
        let interface = self.interface as u16;
        let handle = self.handle_mut()?;
        let request_type = rusb::request_type(rusb::Direction::In, rusb::RequestType::Class, rusb::Recipient::Interface);
        handle
            .read_control(request_type, USB488_REQ_GO_TO_LOCAL, 0, interface, &mut [0u8; 1], TRANSFER_TIMEOUT)
            .map_err(Error::from)?;
        Ok(())
    }

    fn probe_capabilities(&mut self) -> Result<[u8; 0x18]> {
        let mut buf = [0u8; 0x18];
        let handle = self.handle_mut()?;
        let request_type = rusb::request_type(rusb::Direction::In, rusb::RequestType::Class, rusb::Recipient::Interface);
        handle
            .read_control(request_type, USBTMC_REQ_GET_CAPABILITIES, 0, 0, &mut buf, TRANSFER_TIMEOUT)
            .map_err(Error::from)?;
        Ok(buf)
    }

    fn write_bulk_out_header(buf: &mut [u8], msg_id: u8, b_tag: u8, transfer_size: u32, eom: bool) {
        buf[0] = msg_id;
        buf[1] = b_tag;
        buf[2] = !b_tag;
        buf[3] = 0;
        buf[4..8].copy_from_slice(&transfer_size.to_le_bytes());
        buf[8] = if eom { EOM } else { 0 };
        buf[9..12].copy_from_slice(&[0, 0, 0]);
    }
}

impl Transport for UsbtmcTransport {
    fn open(&mut self) -> Result<()> {
        let devices = rusb::devices()?;
        let mut found = None;
        for device in devices.iter() {
            let desc = device.device_descriptor()?;
            if desc.vendor_id() == self.vendor_id
                && desc.product_id() == self.product_id
                && device.bus_number() == self.bus_address.0
                && device.address() == self.bus_address.1
            {
                found = Some(device);
                break;
            }
        }
        let device = found.ok_or_else(|| Error::new(ErrorKind::NotApplicable, "usbtmc device not found on bus"))?;
        let config = device.active_config_descriptor()?;
        let mut interface_number = None;
        let mut bulk_in = None;
        let mut bulk_out = None;
        for interface in config.interfaces() {
            for descriptor in interface.descriptors() {
                if descriptor.class_code() == 0xfe && descriptor.sub_class_code() == 0x03 && descriptor.protocol_code() == 0x01 {
                    interface_number = Some(descriptor.interface_number());
                    for endpoint in descriptor.endpoint_descriptors() {
                        if endpoint.transfer_type() == rusb::TransferType::Bulk {
                            match endpoint.direction() {
                                rusb::Direction::In => bulk_in = Some(endpoint.address()),
                                rusb::Direction::Out => bulk_out = Some(endpoint.address()),
                            }
                        }
                    }
                }
            }
        }
        let interface = interface_number.ok_or_else(|| Error::new(ErrorKind::NotApplicable, "no USBTMC interface found"))?;
        let mut handle = device.open()?;
        if handle.kernel_driver_active(interface).unwrap_or(false) {
            handle.detach_kernel_driver(interface)?;
        }
        handle.claim_interface(interface)?;
        self.handle = Some(handle);
        self.interface = interface;
        self.bulk_in_ep = bulk_in.ok_or_else(|| Error::new(ErrorKind::NotApplicable, "no USBTMC bulk-in endpoint"))?;
        self.bulk_out_ep = bulk_out.ok_or_else(|| Error::new(ErrorKind::NotApplicable, "no USBTMC bulk-out endpoint"))?;

        if blacklisted(WHITELIST_USB_RESET, self.vendor_id, self.product_id) {
            if let Some(handle) = self.handle.as_mut() {
                let _ = handle.reset();
            }
        }
        if let Ok(raw) = self.probe_capabilities() {
            self.capabilities = UsbtmcCapabilities::parse(&raw);
        }
        self.send_remote_lockout()?;
        Ok(())
    }

    fn connection_id(&self) -> String {
        format!("usbtmc/{}.{}", self.bus_address.0, self.bus_address.1)
    }

    fn send(&mut self, data: &[u8]) -> Result<()> {
        let b_tag = self.next_b_tag();
        let mut buf = vec![0u8; BULK_HEADER_SIZE + data.len() + 3];
        UsbtmcTransport::write_bulk_out_header(&mut buf, DEV_DEP_MSG_OUT, b_tag, data.len() as u32, true);
        buf[BULK_HEADER_SIZE..BULK_HEADER_SIZE + data.len()].copy_from_slice(data);
        let total_len = BULK_HEADER_SIZE + data.len();
        let padded_len = (total_len + 3) & !3;
        buf.truncate(padded_len);
        let ep = self.bulk_out_ep;
        self.handle_mut()?.write_bulk(ep, &buf, TRANSFER_TIMEOUT)?;
        self.response_complete = false;
        Ok(())
    }

    fn read_begin(&mut self) -> Result<()> {
        let b_tag = self.next_b_tag();
        let mut header = [0u8; BULK_HEADER_SIZE];
        UsbtmcTransport::write_bulk_out_header(&mut header, REQUEST_DEV_DEP_MSG_IN, b_tag, MAX_TRANSFER_LENGTH as u32, true);
        let ep = self.bulk_out_ep;
        self.handle_mut()?.write_bulk(ep, &header, TRANSFER_TIMEOUT)?;
        self.response_complete = false;
        Ok(())
    }

    fn read_data(&mut self, buf: &mut [u8]) -> Result<usize> {
        let ep = self.bulk_in_ep;
        let mut raw = vec![0u8; MAX_TRANSFER_LENGTH];
        let mut n = self.handle_mut()?.read_bulk(ep, &mut raw, TRANSFER_TIMEOUT)?;
        if n < BULK_HEADER_SIZE {
            // Some scopes occasionally answer the first bulk-in with a short
            // or empty transfer; retry exactly once before treating it as
            // malformed.
            n = self.handle_mut()?.read_bulk(ep, &mut raw, TRANSFER_TIMEOUT)?;
        }
        if n < BULK_HEADER_SIZE {
            return Err(Error::new(ErrorKind::BadData, "usbtmc bulk-in transfer shorter than header"));
        }
        let msg_id = raw[0];
        if msg_id != DEV_DEP_MSG_IN {
            return Err(Error::new(ErrorKind::BadData, "unexpected usbtmc MsgID in bulk-in header"));
        }
        let transfer_size = u32::from_le_bytes([raw[4], raw[5], raw[6], raw[7]]) as usize;
        let eom = raw[8] & EOM != 0;
        let payload_len = transfer_size.min(n - BULK_HEADER_SIZE);
        let copy_len = payload_len.min(buf.len());
        buf[..copy_len].copy_from_slice(&raw[BULK_HEADER_SIZE..BULK_HEADER_SIZE + copy_len]);
        self.response_complete = eom;
        Ok(copy_len)
    }

    fn read_complete(&self) -> bool {
        self.response_complete
    }

    fn close(&mut self) -> Result<()> {
        let _ = self.send_go_to_local();
        if let Some(mut handle) = self.handle.take() {
            let _ = handle.release_interface(self.interface);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn capabilities_parse_expected_bits() {
        let mut raw = [0u8; 0x18];
        raw[4] = USBTMC_INT_CAP_TALK_ONLY;
        raw[5] = USBTMC_DEV_CAP_TERMCHAR;
        raw[15] = USB488_DEV_CAP_SCPI | USB488_DEV_CAP_RL1;
        let caps = UsbtmcCapabilities::parse(&raw);
        assert!(caps.talk_only);
        assert!(!caps.listen_only);
        assert!(caps.term_char);
        assert!(caps.scpi);
        assert!(caps.remote_local);
        assert!(!caps.service_request);
    }

    #[test]
    fn blacklist_matches_exact_and_wildcard_pid() {
        assert!(blacklisted(BLACKLIST_REMOTE, 0x1ab1, 0x0588));
        assert!(blacklisted(BLACKLIST_REMOTE, 0x0b21, 0x1234));
        assert!(!blacklisted(BLACKLIST_REMOTE, 0x0b21 + 1, 0x1234));
    }

    #[test]
    fn b_tag_wraps_without_hitting_zero() {
        let mut t = UsbtmcTransport::new(0x1234, 0x5678, (1, 2));
        t.b_tag = 254;
        assert_eq!(t.next_b_tag(), 255);
        assert_eq!(t.next_b_tag(), 1);
    }
}
