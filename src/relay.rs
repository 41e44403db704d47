//! Relay between the scanning subsystem and the output sink.
//!
//! Scan callbacks push parsed [`Observation`]s into a channel; the relay
//! thread tracks each one and forwards every reportable record as a
//! `beacon` NDJSON line on the output channel. The output side is a bounded
//! `SyncSender` and is only ever `try_send`-ed, so a slow consumer loses
//! lines rather than stalling the scanner.

use std::io;
use std::sync::mpsc::{Receiver, SyncSender, TrySendError};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Instant;

use crate::comm;
use crate::observation::Observation;
use crate::protocol::{DeviceMessage, MsgBuffer, VERSION};
use crate::tracker::Tracker;

/// Stack size for the relay thread
const RELAY_STACK_SIZE: usize = 16 * 1024;

pub struct Relay {
    tracker: Arc<Tracker>,
    output_tx: SyncSender<MsgBuffer>,
    started: Instant,
}

impl Relay {
    pub fn new(tracker: Arc<Tracker>, output_tx: SyncSender<MsgBuffer>) -> Self {
        Self {
            tracker,
            output_tx,
            started: Instant::now(),
        }
    }

    /// Track one observation and queue it for output if it is reportable.
    ///
    /// Returns `true` when a message was queued.
    pub fn handle(&self, obs: Observation) -> bool {
        let Some(record) = self.tracker.track(obs) else {
            return false;
        };

        let Some(buf) = comm::encode_observation(&record, self.uptime_millis()) else {
            log::warn!("Failed to serialize beacon {}", record.identity());
            return false;
        };
        self.send(buf)
    }

    /// Build a status message from the current tracker state.
    pub fn status(&self) -> Option<MsgBuffer> {
        let stats = self.tracker.stats();
        let msg = DeviceMessage::Status {
            tracked: saturate(stats.tracked),
            groups: saturate(stats.groups),
            uptime: saturate(self.started.elapsed().as_secs()),
            version: VERSION,
        };
        comm::encode_message(&msg)
    }

    /// Queue a status message. Returns `true` when it was queued.
    pub fn send_status(&self) -> bool {
        match self.status() {
            Some(buf) => self.send(buf),
            None => false,
        }
    }

    /// Process observations until every scan sender is dropped.
    pub fn run(self, scan_rx: Receiver<Observation>) {
        log::info!("Relay started");

        let mut reported: u32 = 0;
        while let Ok(obs) = scan_rx.recv() {
            if self.handle(obs) {
                reported = reported.wrapping_add(1);
            }
        }

        let stats = self.tracker.stats();
        log::info!(
            "Relay stopped: {} reported, {} tracked, {} groups",
            reported,
            stats.tracked,
            stats.groups,
        );
    }

    /// Run the relay on its own named thread.
    pub fn spawn(self, scan_rx: Receiver<Observation>) -> io::Result<JoinHandle<()>> {
        thread::Builder::new()
            .name("tracker".into())
            .stack_size(RELAY_STACK_SIZE)
            .spawn(move || self.run(scan_rx))
    }

    fn send(&self, buf: MsgBuffer) -> bool {
        match self.output_tx.try_send(buf) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                log::warn!("Output queue full, dropping message");
                false
            }
            Err(TrySendError::Disconnected(_)) => {
                log::warn!("Output channel closed, dropping message");
                false
            }
        }
    }

    fn uptime_millis(&self) -> u32 {
        (self.started.elapsed().as_millis() & 0xFFFF_FFFF) as u32
    }
}

fn saturate<T: TryInto<u32>>(n: T) -> u32 {
    n.try_into().unwrap_or(u32::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::mpsc;

    const MAC: &str = "B4:1E:52:AB:CD:EF";

    fn uid_frame() -> Observation {
        Observation::builder()
            .address(MAC)
            .service_uuid(0xFEAA)
            .identifier(&[0xed, 0xd1])
            .identifier(&[0x00, 0x01])
            .rssi(-60)
            .build()
            .unwrap()
    }

    fn tlm_frame(fields: &[u64]) -> Observation {
        Observation::builder()
            .address(MAC)
            .service_uuid(0xFEAA)
            .beacon_type(0x20)
            .data_only(true)
            .rssi(-70)
            .data_fields(fields)
            .build()
            .unwrap()
    }

    fn line(buf: &MsgBuffer) -> &str {
        core::str::from_utf8(buf).unwrap()
    }

    // ── handle() ────────────────────────────────────────────────────

    #[test]
    fn reportable_record_is_queued_as_beacon_line() {
        let (tx, rx) = mpsc::sync_channel(4);
        let relay = Relay::new(Arc::new(Tracker::new()), tx);

        assert!(relay.handle(uid_frame()));
        let msg = rx.try_recv().unwrap();
        assert!(line(&msg).contains(r#""type":"beacon""#));
        assert!(line(&msg).contains(r#""mac":"B4:1E:52:AB:CD:EF""#));
        assert!(line(&msg).ends_with('\n'));
    }

    #[test]
    fn data_only_frame_is_not_queued() {
        let (tx, rx) = mpsc::sync_channel(4);
        let relay = Relay::new(Arc::new(Tracker::new()), tx);

        relay.handle(uid_frame());
        let _ = rx.try_recv();

        assert!(!relay.handle(tlm_frame(&[3000])));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn merged_fields_appear_on_next_report() {
        let (tx, rx) = mpsc::sync_channel(4);
        let relay = Relay::new(Arc::new(Tracker::new()), tx);

        relay.handle(uid_frame());
        relay.handle(tlm_frame(&[3000, 22]));
        relay.handle(uid_frame());

        let _first = rx.try_recv().unwrap();
        let second = rx.try_recv().unwrap();
        assert!(line(&second).contains(r#""extra":[3000,22]"#));
    }

    #[test]
    fn first_single_frame_is_not_reported() {
        // single-frame tracking reports the record it replaced
        let (tx, rx) = mpsc::sync_channel(4);
        let relay = Relay::new(Arc::new(Tracker::new()), tx);
        let obs = Observation::builder()
            .address(MAC)
            .identifier(&[0x42])
            .rssi(-50)
            .build()
            .unwrap();

        assert!(!relay.handle(obs.clone()));
        assert!(relay.handle(obs));
        assert!(line(&rx.try_recv().unwrap()).contains(r#""rssi":-50"#));
    }

    #[test]
    fn full_output_queue_drops_message() {
        let (tx, rx) = mpsc::sync_channel(1);
        let relay = Relay::new(Arc::new(Tracker::new()), tx);

        assert!(relay.handle(uid_frame()));
        assert!(!relay.handle(uid_frame()));
        assert!(rx.try_recv().is_ok());
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn closed_output_channel_drops_message() {
        let (tx, rx) = mpsc::sync_channel(1);
        drop(rx);
        let tracker = Arc::new(Tracker::new());
        let relay = Relay::new(Arc::clone(&tracker), tx);

        assert!(!relay.handle(uid_frame()));
        // still tracked
        assert_eq!(tracker.stats().tracked, 1);
    }

    // ── status ──────────────────────────────────────────────────────

    #[test]
    fn status_reports_tracker_sizes() {
        let (tx, rx) = mpsc::sync_channel(4);
        let relay = Relay::new(Arc::new(Tracker::new()), tx);
        relay.handle(uid_frame());
        let _ = rx.try_recv();

        assert!(relay.send_status());
        let msg = rx.try_recv().unwrap();
        let json = line(&msg);
        assert!(json.contains(r#""type":"status""#));
        assert!(json.contains(r#""tracked":1"#));
        assert!(json.contains(r#""groups":1"#));
        assert!(json.contains(&format!(r#""version":"{}""#, VERSION)));
    }

    #[test]
    fn saturate_clamps_to_u32() {
        assert_eq!(saturate(5), 5);
        assert_eq!(saturate(usize::MAX), u32::MAX);
        assert_eq!(saturate(u64::from(u32::MAX) + 1), u32::MAX);
        assert_eq!(saturate(60u64), 60);
    }

    // ── run / spawn ─────────────────────────────────────────────────

    #[test]
    fn spawned_relay_drains_scan_channel() {
        let (scan_tx, scan_rx) = mpsc::sync_channel::<Observation>(16);
        let (out_tx, out_rx) = mpsc::sync_channel(16);
        let tracker = Arc::new(Tracker::new());
        let handle = Relay::new(Arc::clone(&tracker), out_tx).spawn(scan_rx).unwrap();

        let producers: Vec<_> = (0..2)
            .map(|_| {
                let scan_tx = scan_tx.clone();
                thread::spawn(move || {
                    scan_tx.send(uid_frame()).unwrap();
                    scan_tx.send(tlm_frame(&[1])).unwrap();
                })
            })
            .collect();
        for p in producers {
            p.join().unwrap();
        }
        drop(scan_tx);
        handle.join().unwrap();

        // two identity frames reported, telemetry never
        let lines: Vec<_> = out_rx.try_iter().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines.iter().all(|l| line(l).contains(r#""type":"beacon""#)));
        assert_eq!(tracker.stats().tracked, 1);
    }
}
