//! LIFX LAN protocol transport: UDP broadcast discovery plus unicast
//! control frames, all on port 56700. Only the handful of messages the
//! dispatcher needs are implemented.

use std::collections::HashSet;
use std::io;
use std::net::{Ipv4Addr, SocketAddr};
use std::time::Duration;

use async_trait::async_trait;
use log::{debug, info, warn};
use tokio::net::UdpSocket;
use tokio::time::{timeout, Instant};

use crate::error::{ControlError, Result};
use crate::registry::DeviceRecord;
use crate::transport::{DeviceHandle, DeviceStatus, DiscoveredDevice, Transport};
use crate::util::validate::{ColorSpec, HardwareId};

pub const LIFX_PORT: u16 = 56700;

const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(2);

/// Wire codec for the LIFX binary header and the payloads we speak.
/// Everything is little-endian; the header is a fixed 36 bytes.
pub(crate) mod wire {
    use bytes::{Buf, BufMut, BytesMut};

    use crate::transport::DeviceStatus;
    use crate::util::validate::ColorSpec;

    pub const HEADER_SIZE: usize = 36;

    const PROTOCOL_NUMBER: u16 = 1024;
    const ADDRESSABLE: u16 = 1 << 12;
    const TAGGED: u16 = 1 << 13;

    pub const GET_SERVICE: u16 = 2;
    pub const STATE_SERVICE: u16 = 3;
    pub const SET_POWER: u16 = 21;
    pub const ACKNOWLEDGEMENT: u16 = 45;
    pub const LIGHT_GET: u16 = 101;
    pub const LIGHT_SET_COLOR: u16 = 102;
    pub const LIGHT_STATE: u16 = 107;

    pub const RES_REQUIRED: u8 = 1;
    pub const ACK_REQUIRED: u8 = 2;

    /// One decoded (or to-be-encoded) LIFX frame. In replies, `target`
    /// carries the device's own hardware address.
    #[derive(Debug, Clone, PartialEq, Eq)]
    pub struct Frame {
        pub source: u32,
        pub target: [u8; 6],
        pub flags: u8,
        pub sequence: u8,
        pub message_type: u16,
        pub payload: Vec<u8>,
    }

    pub fn encode(frame: &Frame, tagged: bool) -> BytesMut {
        let mut buf = BytesMut::with_capacity(HEADER_SIZE + frame.payload.len());

        // Frame segment.
        buf.put_u16_le((HEADER_SIZE + frame.payload.len()) as u16);
        let mut protocol = PROTOCOL_NUMBER | ADDRESSABLE;
        if tagged {
            protocol |= TAGGED;
        }
        buf.put_u16_le(protocol);
        buf.put_u32_le(frame.source);

        // Frame address segment: 6 target octets padded to 8, then six
        // reserved bytes, flags, sequence.
        buf.put_slice(&frame.target);
        buf.put_u16_le(0);
        buf.put_slice(&[0u8; 6]);
        buf.put_u8(frame.flags);
        buf.put_u8(frame.sequence);

        // Protocol header segment.
        buf.put_u64_le(0);
        buf.put_u16_le(frame.message_type);
        buf.put_u16_le(0);

        buf.put_slice(&frame.payload);
        buf
    }

    pub fn decode(mut data: &[u8]) -> Option<Frame> {
        if data.len() < HEADER_SIZE {
            return None;
        }

        let size = data.get_u16_le() as usize;
        if size < HEADER_SIZE {
            return None;
        }
        let _protocol = data.get_u16_le();
        let source = data.get_u32_le();

        let mut target = [0u8; 6];
        data.copy_to_slice(&mut target);
        data.advance(2 + 6);
        let flags = data.get_u8();
        let sequence = data.get_u8();

        data.advance(8);
        let message_type = data.get_u16_le();
        data.advance(2);

        Some(Frame {
            source,
            target,
            flags,
            sequence,
            message_type,
            payload: data.to_vec(),
        })
    }

    pub fn set_power_payload(on: bool) -> Vec<u8> {
        let level: u16 = if on { u16::MAX } else { 0 };
        level.to_le_bytes().to_vec()
    }

    pub fn set_color_payload(color: ColorSpec) -> Vec<u8> {
        let mut buf = BytesMut::with_capacity(13);
        buf.put_u8(0); // reserved
        buf.put_u16_le(color.hue);
        buf.put_u16_le(color.saturation);
        buf.put_u16_le(color.brightness);
        buf.put_u16_le(color.kelvin);
        buf.put_u32_le(0); // transition duration in ms, immediate
        buf.to_vec()
    }

    /// Parses a `LIGHT_STATE` payload: HSBK, a reserved word, then the
    /// power level. The trailing label and reserved fields are ignored.
    pub fn parse_light_state(payload: &[u8]) -> Option<DeviceStatus> {
        if payload.len() < 12 {
            return None;
        }
        let mut data = payload;
        let color = ColorSpec {
            hue: data.get_u16_le(),
            saturation: data.get_u16_le(),
            brightness: data.get_u16_le(),
            kelvin: data.get_u16_le(),
        };
        data.advance(2);
        let power = data.get_u16_le();
        Some(DeviceStatus {
            power: power > 0,
            color,
        })
    }

    /// A `STATE_SERVICE` payload advertising the UDP service.
    pub fn is_udp_service(payload: &[u8]) -> bool {
        payload.first() == Some(&1)
    }
}

/// Real LIFX transport over the local network.
///
/// Each instance carries a random nonzero `source` tag; devices echo it in
/// every reply, which is what lets the receive loops drop frames meant for
/// other clients on the same network.
#[derive(Debug, Clone)]
pub struct LifxTransport {
    source: u32,
    request_timeout: Duration,
}

impl LifxTransport {
    pub fn new() -> Self {
        LifxTransport {
            // Sources 0 and 1 are reserved by the protocol.
            source: rand::random::<u32>() | 2,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }

    /// Overrides the per-request reply timeout used by connect and by
    /// every control call.
    pub fn with_request_timeout(mut self, request_timeout: Duration) -> Self {
        self.request_timeout = request_timeout;
        self
    }
}

impl Default for LifxTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Transport for LifxTransport {
    async fn scan(&self, scan_timeout: Duration) -> Result<Vec<DiscoveredDevice>> {
        let broadcast_failed = |err: io::Error| ControlError::DeviceUnreachable {
            address: Ipv4Addr::BROADCAST,
            detail: format!("discovery broadcast failed: {}", err),
        };

        let socket = UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0))
            .await
            .map_err(broadcast_failed)?;
        socket.set_broadcast(true).map_err(broadcast_failed)?;

        let probe = wire::Frame {
            source: self.source,
            target: [0u8; 6],
            flags: 0,
            sequence: 0,
            message_type: wire::GET_SERVICE,
            payload: Vec::new(),
        };
        socket
            .send_to(&wire::encode(&probe, true), (Ipv4Addr::BROADCAST, LIFX_PORT))
            .await
            .map_err(broadcast_failed)?;

        let deadline = Instant::now() + scan_timeout;
        let mut found = Vec::new();
        let mut seen = HashSet::new();
        let mut buffer = [0u8; 1024];

        loop {
            let now = Instant::now();
            if now >= deadline {
                break;
            }

            match timeout(deadline - now, socket.recv_from(&mut buffer)).await {
                Ok(Ok((number_of_bytes, src_addr))) => {
                    let Some(reply) = wire::decode(&buffer[..number_of_bytes]) else {
                        continue;
                    };
                    if reply.source != self.source
                        || reply.message_type != wire::STATE_SERVICE
                        || !wire::is_udp_service(&reply.payload)
                    {
                        debug!("ignoring frame type {} from {}", reply.message_type, src_addr);
                        continue;
                    }
                    let SocketAddr::V4(addr) = src_addr else {
                        continue;
                    };
                    let identifier = HardwareId::from_octets(reply.target);
                    // Devices answer a single probe more than once; keep
                    // the first response per identifier.
                    if seen.insert(identifier) {
                        info!("found device {} at {}", identifier, addr.ip());
                        found.push(DiscoveredDevice {
                            identifier,
                            address: *addr.ip(),
                        });
                    }
                }
                Ok(Err(err)) => {
                    warn!("failed to receive discovery response: {}", err);
                    break;
                }
                Err(_) => break, // scan window elapsed
            }
        }

        Ok(found)
    }

    async fn connect(&self, record: &DeviceRecord) -> Result<Box<dyn DeviceHandle>> {
        let unreachable = |detail: String| ControlError::DeviceUnreachable {
            address: record.address,
            detail,
        };

        let socket = UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0))
            .await
            .map_err(|e| unreachable(e.to_string()))?;
        socket
            .connect((record.address, LIFX_PORT))
            .await
            .map_err(|e| unreachable(e.to_string()))?;

        let mut handle = LifxHandle {
            socket,
            address: record.address,
            target: record.identifier.octets(),
            source: self.source,
            sequence: 0,
            request_timeout: self.request_timeout,
        };

        // Reachability probe: a unicast GetService, answered by any live
        // bulb regardless of its state.
        match handle
            .roundtrip(wire::GET_SERVICE, wire::RES_REQUIRED, Vec::new(), wire::STATE_SERVICE)
            .await
        {
            Ok(Some(_)) => Ok(Box::new(handle)),
            Ok(None) => Err(unreachable(format!(
                "no response within {:?}",
                self.request_timeout
            ))),
            Err(err) => Err(unreachable(err.to_string())),
        }
    }
}

struct LifxHandle {
    socket: UdpSocket,
    address: Ipv4Addr,
    target: [u8; 6],
    source: u32,
    sequence: u8,
    request_timeout: Duration,
}

impl LifxHandle {
    /// Sends one frame and waits for the matching reply type, ignoring
    /// anything with a foreign source or a stale sequence number. `None`
    /// means the timeout elapsed without a match.
    async fn roundtrip(
        &mut self,
        message_type: u16,
        flags: u8,
        payload: Vec<u8>,
        expect: u16,
    ) -> io::Result<Option<wire::Frame>> {
        self.sequence = self.sequence.wrapping_add(1);
        let frame = wire::Frame {
            source: self.source,
            target: self.target,
            flags,
            sequence: self.sequence,
            message_type,
            payload,
        };
        self.socket.send(&wire::encode(&frame, false)).await?;

        let deadline = Instant::now() + self.request_timeout;
        let mut buffer = [0u8; 1024];
        loop {
            let now = Instant::now();
            if now >= deadline {
                return Ok(None);
            }
            match timeout(deadline - now, self.socket.recv(&mut buffer)).await {
                Ok(Ok(number_of_bytes)) => {
                    let Some(reply) = wire::decode(&buffer[..number_of_bytes]) else {
                        continue;
                    };
                    if reply.source == self.source
                        && reply.sequence == self.sequence
                        && reply.message_type == expect
                    {
                        return Ok(Some(reply));
                    }
                    debug!(
                        "ignoring frame type {} (sequence {}) from {}",
                        reply.message_type, reply.sequence, self.address
                    );
                }
                Ok(Err(err)) => return Err(err),
                Err(_) => return Ok(None),
            }
        }
    }

    /// Fire-and-confirm send: success only once the device acknowledges.
    async fn send_with_ack(&mut self, message_type: u16, payload: Vec<u8>) -> Result<()> {
        match self
            .roundtrip(message_type, wire::ACK_REQUIRED, payload, wire::ACKNOWLEDGEMENT)
            .await
        {
            Ok(Some(_)) => Ok(()),
            Ok(None) => Err(ControlError::DeviceCommandFailed {
                address: self.address,
                detail: format!("no acknowledgement within {:?}", self.request_timeout),
            }),
            Err(err) => Err(ControlError::DeviceUnreachable {
                address: self.address,
                detail: err.to_string(),
            }),
        }
    }
}

#[async_trait]
impl DeviceHandle for LifxHandle {
    async fn set_power(&mut self, on: bool) -> Result<()> {
        self.send_with_ack(wire::SET_POWER, wire::set_power_payload(on))
            .await
    }

    async fn set_brightness(&mut self, level: u16) -> Result<()> {
        // The protocol has no brightness-only message; read the current
        // HSBK and rewrite it with the new brightness.
        let status = self.get_status().await?;
        let mut color = status.color;
        color.brightness = level;
        self.set_color(color).await
    }

    async fn set_color(&mut self, color: ColorSpec) -> Result<()> {
        self.send_with_ack(wire::LIGHT_SET_COLOR, wire::set_color_payload(color))
            .await
    }

    async fn get_status(&mut self) -> Result<DeviceStatus> {
        match self
            .roundtrip(wire::LIGHT_GET, wire::RES_REQUIRED, Vec::new(), wire::LIGHT_STATE)
            .await
        {
            Ok(Some(reply)) => {
                wire::parse_light_state(&reply.payload).ok_or_else(|| {
                    ControlError::DeviceCommandFailed {
                        address: self.address,
                        detail: "malformed state reply".to_string(),
                    }
                })
            }
            Ok(None) => Err(ControlError::DeviceUnreachable {
                address: self.address,
                detail: format!("no status reply within {:?}", self.request_timeout),
            }),
            Err(err) => Err(ControlError::DeviceUnreachable {
                address: self.address,
                detail: err.to_string(),
            }),
        }
    }
}
