//! Shade command service: owns the outbound FIFO, drives the
//! acknowledgment/settle-window protocol, and routes inbound indications
//! (design §4.3).
//!
//! This is the "Shade service / RF coordinator" thread of design §5: it
//! blocks on {shade-request, shade-indication, system-indication, periodic
//! tick, discovery}. Discovery and network-join passes are run as nested
//! async calls that temporarily own the service's attention, since both
//! are single-shot exclusive modes with their own timeout.

use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::channel::{Channel, Receiver as ChannelReceiver, Sender as ChannelSender};
use embassy_futures::select::{select3, Either3};
use embassy_time::{Duration, Ticker};
use log::{debug, info, warn};

use crate::outbound::{DeliveryOutcome, DeliveryRequest, DestinationKind, OutboundHandle, RequestQueue, RequestRecord, RequestToken};
use crate::protocol::frame::encode as frame_encode;
use crate::protocol::RecordType;
use crate::serial::framer::RoutedFrame;
use crate::shade::battery::{classify, sweep_one_shade, SweepResult};
use crate::shade::command::ShadeCommand;
use crate::shade::discovery::{run_discovery, run_network_join, BeaconInbound, DiscoveredDevice, DiscoveryMode};
use crate::shade::indication::{parse_indication_body, IndicationDedup, IndicationEvent, ShadeEvent};

const TICK_PERIOD: Duration = Duration::from_millis(200);
const COMMAND_CHANNEL_SIZE: usize = 16;
const INDICATION_CHANNEL_SIZE: usize = 32;

/// Everything that can arrive on the service's request channel: a shade
/// command to enqueue, or a request to run the weekly battery sweep against
/// a device list the caller already knows about (design §4.3, §8).
pub enum ServiceRequest {
    Execute(ShadeCommand),
    BatterySweep(Vec<(u16, bool)>),
}

pub type CommandChannel = Channel<CriticalSectionRawMutex, ServiceRequest, COMMAND_CHANNEL_SIZE>;
pub type IndicationChannel = Channel<CriticalSectionRawMutex, RoutedFrame, INDICATION_CHANNEL_SIZE>;

/// Sink the service forwards parsed indication data to (design §6's
/// database collaborator). Implemented inline in tests; production wiring
/// is the persisted-store or a log-only sink, per the caller's choice.
pub trait IndicationSink: Send + 'static {
    fn record(&mut self, event: ShadeEvent);
    fn fault(&mut self, low_count: usize);
}

#[derive(Clone, Copy)]
enum HeadActivity {
    Idle,
    AwaitingAck(RequestToken),
    Settling(RequestToken),
}

pub struct ShadeService<S: IndicationSink> {
    queue: RequestQueue,
    outbound: OutboundHandle,
    commands: ChannelReceiver<'static, CriticalSectionRawMutex, ServiceRequest, COMMAND_CHANNEL_SIZE>,
    indications: ChannelReceiver<'static, CriticalSectionRawMutex, RoutedFrame, INDICATION_CHANNEL_SIZE>,
    beacons: BeaconInbound,
    dedup: IndicationDedup,
    ticker: Ticker,
    head: HeadActivity,
    sink: S,
}

/// Handle used by other tasks (scheduler, remote coordinator) to submit
/// commands. Cheap to clone.
#[derive(Clone)]
pub struct ShadeServiceHandle {
    commands: ChannelSender<'static, CriticalSectionRawMutex, ServiceRequest, COMMAND_CHANNEL_SIZE>,
}

impl ShadeServiceHandle {
    pub async fn submit(&self, command: ShadeCommand) {
        self.commands.send(ServiceRequest::Execute(command)).await;
    }

    /// Ask the running service to sweep `shades` (device ID, is-tilt-motor)
    /// for battery level. Runs in line with the service's own request
    /// handling, the same way a discovery pass temporarily owns its
    /// attention.
    pub async fn request_battery_sweep(&self, shades: Vec<(u16, bool)>) {
        self.commands.send(ServiceRequest::BatterySweep(shades)).await;
    }
}

/// Sender half of the indication channel, handed to the frame dispatcher so
/// it can route `ShadeDataInd`/`GroupSetInd`/`SystemInd` frames to the
/// running service.
pub type IndicationSender = ChannelSender<'static, CriticalSectionRawMutex, RoutedFrame, INDICATION_CHANNEL_SIZE>;

impl<S: IndicationSink> ShadeService<S> {
    pub fn new(outbound: OutboundHandle, beacons: BeaconInbound, sink: S) -> (Self, ShadeServiceHandle, IndicationSender) {
        let commands: &'static CommandChannel = Box::leak(Box::new(Channel::new()));
        let indications: &'static IndicationChannel = Box::leak(Box::new(Channel::new()));
        let service = ShadeService {
            queue: RequestQueue::new(),
            outbound,
            commands: commands.receiver(),
            indications: indications.receiver(),
            beacons,
            dedup: IndicationDedup::new(),
            ticker: Ticker::every(TICK_PERIOD),
            head: HeadActivity::Idle,
            sink,
        };
        (service, ShadeServiceHandle { commands: commands.sender() }, indications.sender())
    }

    pub async fn run(mut self) {
        loop {
            self.step().await;
        }
    }

    async fn step(&mut self) {
        match self.head {
            HeadActivity::Idle => {
                let outcome = select3(self.commands.receive(), self.indications.receive(), self.ticker.next()).await;
                match outcome {
                    Either3::First(request) => self.handle_request(request).await,
                    Either3::Second(frame) => self.handle_indication(frame),
                    Either3::Third(_) => {}
                }
                self.try_advance();
            }
            HeadActivity::AwaitingAck(token) => {
                let outcome = select3(self.commands.receive(), self.indications.receive(), self.outbound.next_result()).await;
                match outcome {
                    Either3::First(request) => self.handle_request(request).await,
                    Either3::Second(frame) => self.handle_indication(frame),
                    Either3::Third(result) => match result.outcome {
                        DeliveryOutcome::Success => {
                            let ticks = self.queue.get(token).map(|r| r.ack_wait_ticks).unwrap_or(5);
                            debug!("shade service: delivery acknowledged, settling for {ticks} ticks");
                            self.head = HeadActivity::Settling(token);
                        }
                        DeliveryOutcome::Timeout => {
                            warn!("shade service: delivery timed out, dropping record");
                            self.queue.remove(token);
                            self.head = HeadActivity::Idle;
                            self.try_advance();
                        }
                    },
                }
            }
            HeadActivity::Settling(token) => {
                let outcome = select3(self.commands.receive(), self.indications.receive(), self.ticker.next()).await;
                match outcome {
                    Either3::First(request) => self.handle_request(request).await,
                    Either3::Second(frame) => self.handle_indication(frame),
                    Either3::Third(_) => {
                        let done = match self.queue.get_mut(token) {
                            Some(record) => {
                                record.ack_wait_ticks = record.ack_wait_ticks.saturating_sub(1);
                                record.ack_wait_ticks == 0
                            }
                            None => true,
                        };
                        if done {
                            self.queue.remove(token);
                            self.head = HeadActivity::Idle;
                            self.try_advance();
                        }
                    }
                }
            }
        }
    }

    async fn handle_request(&mut self, request: ServiceRequest) {
        match request {
            ServiceRequest::Execute(command) => self.enqueue(command),
            ServiceRequest::BatterySweep(shades) => {
                info!("battery sweep requested over {} known shade(s)", shades.len());
                self.battery_sweep(&shades).await;
            }
        }
    }

    fn enqueue(&mut self, command: ShadeCommand) {
        let (record_type, body) = command.encode();
        let mut frame_payload = vec![record_type as u8];
        frame_payload.extend_from_slice(&body);
        let framed_bytes = frame_encode(frame_payload.len() as u8, &frame_payload);
        let expected_reply = confirmation_code_for(record_type);
        let mut record = RequestRecord::new(DestinationKind::Shade, command.address(), 1, expected_reply, framed_bytes);
        record.ack_wait_ticks = command.settle_ticks();
        self.queue.push(record);
    }

    fn try_advance(&mut self) {
        if !matches!(self.head, HeadActivity::Idle) {
            return;
        }
        let Some(token) = self.queue.head() else { return };
        let Some(record) = self.queue.get(token) else { return };
        let request = DeliveryRequest { destination_kind: DestinationKind::Shade, framed_bytes: record.framed_bytes.clone() };
        match self.outbound.try_deliver(request) {
            Ok(_id) => {
                if let Some(record) = self.queue.get_mut(token) {
                    record.state = crate::outbound::RecordState::WaitingForSerialAck;
                }
                self.head = HeadActivity::AwaitingAck(token);
            }
            Err(e) => {
                warn!("shade service: could not start delivery: {e}");
            }
        }
    }

    fn handle_indication(&mut self, frame: RoutedFrame) {
        match frame.record_type {
            RecordType::SystemInd => {
                debug!("shade service: system indication, {} bytes", frame.body.len());
            }
            RecordType::ShadeDataInd | RecordType::GroupSetInd => {
                let now = embassy_time::Instant::now();
                let Some(device_bytes) = frame.body.get(0..2) else { return };
                let device_id = u16::from_le_bytes([device_bytes[0], device_bytes[1]]);
                if self.dedup.is_duplicate(device_id, &frame.body, now) {
                    debug!("shade service: dropped duplicate indication from {device_id:#06x}");
                    return;
                }
                for event in parse_indication_body(&frame.body) {
                    self.sink.record(event);
                }
            }
            other => {
                debug!("shade service: unexpected frame type {other:?} on indication channel");
            }
        }
    }

    /// Run one discovery pass. Issues a beacon request directly (outside
    /// the FIFO, since discovery owns the link exclusively while it runs)
    /// and emits a "set discovered flag" command for every new device.
    pub async fn discover(&mut self, mode: DiscoveryMode, device_type_filter: Option<u8>) -> Vec<DiscoveredDevice> {
        let outbound = self.outbound.clone();
        let issue_beacon = || {
            let framed = frame_encode(1, &[RecordType::BeaconReq as u8]);
            let _ = outbound.try_deliver(DeliveryRequest { destination_kind: DestinationKind::Shade, framed_bytes: framed });
        };
        let found = run_discovery(&self.beacons, issue_beacon, mode, device_type_filter).await;
        for device in &found {
            self.enqueue(ShadeCommand::SetDiscoveredFlag { address: crate::address::Address::DeviceId(device.device_id) });
            self.sink.record(ShadeEvent {
                device_id: device.device_id,
                event: IndicationEvent::DeviceDiscovered { unique_id: device.unique_id, device_type: device.device_type },
            });
        }
        info!("discovery pass found {} device(s)", found.len());
        found
    }

    /// Put the radio into network-join mode: accept the first beacon whose
    /// network ID is neither "all" nor factory-default.
    pub async fn join_network(&mut self, all_networks_id: u16, factory_default_id: u16) -> Option<u16> {
        run_network_join(&self.beacons, all_networks_id, factory_default_id).await.map(|beacon| beacon.network_id)
    }

    /// Weekly battery sweep over every battery-powered shade's device ID.
    pub async fn battery_sweep(&mut self, shades: &[(u16, bool)]) -> SweepResult {
        let mut readings = Vec::with_capacity(shades.len());
        for &(device_id, is_tilt_motor) in shades {
            let outbound = self.outbound.clone();
            let send_query = || {
                let (record_type, body) = ShadeCommand::BatteryQuery { address: crate::address::Address::DeviceId(device_id) }.encode();
                let mut payload = vec![record_type as u8];
                payload.extend_from_slice(&body);
                let framed = frame_encode(payload.len() as u8, &payload);
                let _ = outbound.try_deliver(DeliveryRequest { destination_kind: DestinationKind::Shade, framed_bytes: framed });
            };
            let reading = sweep_one_shade(device_id, &self.beacons, send_query).await;
            readings.push((device_id, reading.map(|r| classify(r, is_tilt_motor))));
        }
        let result = SweepResult { readings };
        if result.any_low() {
            self.sink.fault(result.low_battery_count());
        }
        result
    }
}

fn confirmation_code_for(record_type: RecordType) -> u8 {
    match record_type {
        RecordType::ShadeDataReq => RecordType::ShadeDataConf as u8,
        RecordType::GroupSetReq => RecordType::GroupSetConf as u8,
        RecordType::BeaconReq => RecordType::BeaconConf as u8,
        other => other as u8,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::address::Address;

    #[test]
    fn confirmation_code_maps_request_to_its_own_conf() {
        assert_eq!(confirmation_code_for(RecordType::ShadeDataReq), RecordType::ShadeDataConf as u8);
        assert_eq!(confirmation_code_for(RecordType::GroupSetReq), RecordType::GroupSetConf as u8);
    }

    #[test]
    fn enqueue_sets_settle_ticks_from_command() {
        let mut queue = RequestQueue::new();
        let cmd = ShadeCommand::BatteryQuery { address: Address::DeviceId(3) };
        let (record_type, body) = cmd.encode();
        let mut payload = vec![record_type as u8];
        payload.extend_from_slice(&body);
        let framed = frame_encode(payload.len() as u8, &payload);
        let mut record = RequestRecord::new(DestinationKind::Shade, cmd.address(), 1, confirmation_code_for(record_type), framed);
        record.ack_wait_ticks = cmd.settle_ticks();
        let token = queue.push(record);
        assert_eq!(queue.get(token).unwrap().ack_wait_ticks, 9);
    }
}
