//! The frame producer: a single wall-clock-paced loop that assembles one
//! ETI frame per 24 ms and fans it out to the configured sinks. All frame
//! counters live here; the shared ensemble state is read once per frame
//! under the reader lock.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};
use std::thread;
use std::time::{Duration, Instant};

use chrono::{DateTime, Timelike, Utc};
use derive_more::Debug;
use thiserror::Error;

use crate::config::{AnnouncementType, Config};
use crate::dab::ensemble::{ConfigError, Ensemble, Label};
use crate::dab::fic::{CifContext, FicCarousel};
use crate::edi::frame::EdiTimestamp;
use crate::edi::{EdiError, EdiOutput};
use crate::eti::{self, EtiError, SubchannelPayload};
use crate::inputs::{self, InputError, SubchannelInput};
use crate::outputs::EtiFileSink;

pub const FRAME_DURATION: Duration = Duration::from_millis(24);

/// Seconds between the Unix epoch and 2000-01-01T00:00:00Z, the EDI epoch.
const EDI_EPOCH_OFFSET: i64 = 946_684_800;

#[derive(Debug, Error)]
pub enum MuxError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Input(#[from] InputError),

    #[error(transparent)]
    Eti(#[from] EtiError),

    #[error(transparent)]
    Edi(#[from] EdiError),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Typed remote-control mutations. A controller pushes these over a
/// channel; the producer drains and applies them between frames.
#[derive(Debug, Clone)]
pub enum RcEvent {
    SetEnsembleLabel {
        text: String,
        short_mask: Option<u16>,
    },
    SetServiceLabel {
        sid: u32,
        text: String,
        short_mask: Option<u16>,
    },
    SetDynamicLabel {
        component_uid: String,
        text: String,
        charset: u8,
    },
    TriggerAnnouncement {
        sid: u32,
        typ: AnnouncementType,
        subchannel: Option<u8>,
        timeout: Option<Duration>,
    },
    StopAnnouncement {
        sid: u32,
    },
    SetLogLevel(log::LevelFilter),
}

/// Remote-control surface: typed mutations applied under the writer lock.
#[derive(Clone)]
pub struct RcHandle {
    ensemble: Arc<RwLock<Ensemble>>,
}

impl RcHandle {
    pub fn apply(&self, event: RcEvent) {
        match event {
            RcEvent::SetEnsembleLabel { text, short_mask } => {
                if let Err(e) = self.set_ensemble_label(&text, short_mask) {
                    log::warn!("Rejected ensemble label: {}", e);
                }
            }
            RcEvent::SetServiceLabel {
                sid,
                text,
                short_mask,
            } => match self.set_service_label(sid, &text, short_mask) {
                Ok(false) => log::warn!("No such service: 0x{:X}", sid),
                Ok(true) => {}
                Err(e) => log::warn!("Rejected service label: {}", e),
            },
            RcEvent::SetDynamicLabel {
                component_uid,
                text,
                charset,
            } => {
                if !self.set_dynamic_label(&component_uid, &text, charset) {
                    log::warn!("No such component: {}", component_uid);
                }
            }
            RcEvent::TriggerAnnouncement {
                sid,
                typ,
                subchannel,
                timeout,
            } => {
                if !self.trigger_announcement(sid, typ, subchannel, timeout) {
                    log::warn!("Announcement refused for service 0x{:X}", sid);
                }
            }
            RcEvent::StopAnnouncement { sid } => {
                self.stop_announcement(sid);
            }
            RcEvent::SetLogLevel(level) => self.set_log_level(level),
        }
    }

    pub fn set_ensemble_label(&self, text: &str, short_mask: Option<u16>) -> Result<(), ConfigError> {
        let label = Label::new(text, short_mask)?;
        self.ensemble.write().unwrap().set_ensemble_label(label);
        Ok(())
    }

    pub fn set_service_label(
        &self,
        sid: u32,
        text: &str,
        short_mask: Option<u16>,
    ) -> Result<bool, ConfigError> {
        let label = Label::new(text, short_mask)?;
        Ok(self.ensemble.write().unwrap().set_service_label(sid, label))
    }

    pub fn set_dynamic_label(&self, component_uid: &str, text: &str, charset: u8) -> bool {
        self.ensemble
            .write()
            .unwrap()
            .set_dynamic_label(component_uid, text, charset)
    }

    pub fn trigger_announcement(
        &self,
        sid: u32,
        typ: AnnouncementType,
        subchannel: Option<u8>,
        timeout: Option<Duration>,
    ) -> bool {
        let deadline = timeout.map(|t| Instant::now() + t);
        self.ensemble
            .write()
            .unwrap()
            .trigger_announcement(sid, typ, subchannel, deadline)
    }

    pub fn stop_announcement(&self, sid: u32) -> bool {
        self.ensemble.write().unwrap().stop_announcement(sid)
    }

    pub fn set_log_level(&self, level: log::LevelFilter) {
        log::set_max_level(level);
        log::info!("Log level set to {}", level);
    }

    /// Snapshot accessor for tests and status reporting.
    pub fn with_ensemble<T>(&self, f: impl FnOnce(&Ensemble) -> T) -> T {
        f(&self.ensemble.read().unwrap())
    }
}

struct MuxInput {
    scid: u8,
    want: usize,
    input: Box<dyn SubchannelInput>,
    starved: bool,
}

#[derive(Debug)]
pub struct Mux {
    ensemble: Arc<RwLock<Ensemble>>,
    #[debug(skip)]
    carousel: FicCarousel,
    #[debug(skip)]
    inputs: Vec<MuxInput>,
    #[debug(skip)]
    eti_sinks: Vec<EtiFileSink>,
    #[debug(skip)]
    edi: Option<EdiOutput>,
    #[debug(skip)]
    rc_events: Option<std::sync::mpsc::Receiver<RcEvent>>,
    frame_number: u32,
    tist_enabled: bool,
    shutdown: Arc<AtomicBool>,
}

impl Mux {
    pub fn from_config(cfg: &Config) -> Result<Self, MuxError> {
        let ensemble = Ensemble::from_config(cfg)?;
        let carousel = FicCarousel::new(&ensemble);

        // inputs in SCID order, matching STC words and MSC layout
        let mut inputs = Vec::with_capacity(ensemble.subchannels.len());
        for sc in ensemble.subchannels_by_scid() {
            inputs.push(MuxInput {
                scid: sc.id,
                want: sc.payload_len(),
                input: inputs::open_input(&sc.input_uri)?,
                starved: false,
            });
        }

        let edi = match &cfg.ensemble.edi_output {
            Some(edi_cfg) => Some(EdiOutput::from_config(edi_cfg)?),
            None => None,
        };
        let tist_enabled = cfg
            .ensemble
            .edi_output
            .as_ref()
            .map(|e| e.enable_tist)
            .unwrap_or(false);

        Ok(Mux {
            ensemble: Arc::new(RwLock::new(ensemble)),
            carousel,
            inputs,
            eti_sinks: Vec::new(),
            edi,
            rc_events: None,
            frame_number: 0,
            tist_enabled,
            shutdown: Arc::new(AtomicBool::new(false)),
        })
    }

    /// Subscribes the producer to a remote-control event stream, drained
    /// before each frame.
    pub fn attach_rc_events(&mut self, events: std::sync::mpsc::Receiver<RcEvent>) {
        self.rc_events = Some(events);
    }

    pub fn add_eti_sink(&mut self, sink: EtiFileSink) {
        self.eti_sinks.push(sink);
    }

    pub fn rc_handle(&self) -> RcHandle {
        RcHandle {
            ensemble: Arc::clone(&self.ensemble),
        }
    }

    /// Shared flag; setting it makes `run` finish the frame in flight,
    /// flush the sinks and return.
    pub fn shutdown_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.shutdown)
    }

    pub fn frame_number(&self) -> u32 {
        self.frame_number
    }

    /// Produces and distributes one frame. Either the complete frame
    /// reaches the sinks or nothing does.
    pub fn produce_frame_at(&mut self, now: DateTime<Utc>) -> Result<Vec<u8>, MuxError> {
        let ensemble_arc = Arc::clone(&self.ensemble);

        if let Some(events) = &self.rc_events {
            let handle = RcHandle {
                ensemble: Arc::clone(&ensemble_arc),
            };
            while let Ok(event) = events.try_recv() {
                handle.apply(event);
            }
        }

        // expired announcements need the writer lock; check cheaply first
        {
            let expired = ensemble_arc
                .read()
                .unwrap()
                .active_announcements
                .iter()
                .any(|a| a.deadline.map(|d| d <= Instant::now()).unwrap_or(false));
            if expired {
                ensemble_arc
                    .write()
                    .unwrap()
                    .expire_announcements(Instant::now());
            }
        }

        let ensemble = ensemble_arc.read().unwrap();

        let ctx = CifContext {
            cif: self.frame_number,
            now,
        };
        let fic = self.carousel.tick(&ensemble, &ctx);

        // pull every input; starved inputs degrade to silence
        let deadline = Instant::now() + Duration::from_millis(5);
        let mut payloads = Vec::with_capacity(self.inputs.len());
        for slot in &mut self.inputs {
            let data = match slot.input.read_frame(slot.want, deadline) {
                Ok(data) => {
                    if slot.starved {
                        log::info!("Subchannel {} input recovered", slot.scid);
                        slot.starved = false;
                    }
                    data
                }
                Err(e) => {
                    if !slot.starved {
                        log::warn!("Subchannel {} starved ({}), emitting zero fill", slot.scid, e);
                        slot.starved = true;
                    }
                    vec![0u8; slot.want]
                }
            };
            payloads.push(SubchannelPayload {
                scid: slot.scid,
                data,
            });
        }

        let tist_ticks = self.tist_enabled.then(|| frac_ticks(&now));

        let frame = eti::build_frame(&ensemble, &fic, &payloads, self.frame_number, tist_ticks)?;

        for sink in &mut self.eti_sinks {
            if let Err(e) = sink.write_frame(&frame) {
                log::warn!("ETI sink write failed: {}", e);
            }
        }

        if let Some(edi) = &mut self.edi {
            let seconds = (now.timestamp() - EDI_EPOCH_OFFSET).max(0) as u32;
            let timestamp = EdiTimestamp {
                seconds,
                ticks: frac_ticks(&now),
            };
            edi.send_frame(&ensemble, &fic, &payloads, self.frame_number, Some(timestamp))?;
        }

        self.frame_number = self.frame_number.wrapping_add(1);

        Ok(frame)
    }

    pub fn produce_frame(&mut self) -> Result<Vec<u8>, MuxError> {
        self.produce_frame_at(Utc::now())
    }

    /// The paced producer loop: one frame per 24 ms slot until shutdown.
    pub fn run(&mut self) -> Result<(), MuxError> {
        let mut next = Instant::now();

        while !self.shutdown.load(Ordering::Relaxed) {
            self.produce_frame()?;

            next += FRAME_DURATION;
            let now = Instant::now();
            if next > now {
                thread::sleep(next - now);
            } else {
                // fell behind the frame clock; resynchronize rather than
                // bursting
                next = now;
            }
        }

        self.finish();
        Ok(())
    }

    fn finish(&mut self) {
        for sink in &mut self.eti_sinks {
            if let Err(e) = sink.finalize() {
                log::warn!("ETI sink finalize failed: {}", e);
            }
        }
        if let Some(edi) = &mut self.edi {
            edi.flush();
        }
        log::info!("Producer stopped after {} frames", self.frame_number);
    }
}

/// Sub-second part of `now` in 1/16384 s ticks (24 bits).
fn frac_ticks(now: &DateTime<Utc>) -> u32 {
    let nanos = now.nanosecond() % 1_000_000_000; // leap second carries over
    ((nanos as u64 * 16_384) / 1_000_000_000) as u32 & 0xFF_FF_FF
}
