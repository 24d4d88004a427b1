//! The FIC carousel: schedules FIG encoders by repetition class and packs
//! their output into CRC-protected 32-byte FIBs.

use chrono::{DateTime, Utc};

use crate::dab::ensemble::Ensemble;
use crate::dab::{fig0, fig1};
use crate::utils;

/// Per-frame context handed to encoders that look at the clock.
#[derive(Debug, Clone, Copy)]
pub struct CifContext {
    /// Monotonic CIF counter; one CIF per 24 ms ETI frame.
    pub cif: u32,
    pub now: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RepetitionClass {
    /// ~100 ms.
    A,
    /// ~1 s.
    B,
    /// ~1 min.
    C,
    /// Triggered externally, never scheduled by timer.
    OnDemand,
}

impl RepetitionClass {
    /// Period in CIFs.
    pub fn period(&self) -> Option<u32> {
        match self {
            RepetitionClass::A => Some(4),
            RepetitionClass::B => Some(40),
            RepetitionClass::C => Some(2400),
            RepetitionClass::OnDemand => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Priority {
    Normal,
    High,
}

#[derive(Debug, Clone, Copy)]
pub struct FillResult {
    pub written: usize,
    pub complete: bool,
}

impl FillResult {
    pub fn complete(written: usize) -> Self {
        FillResult {
            written,
            complete: true,
        }
    }

    pub fn partial(written: usize) -> Self {
        FillResult {
            written,
            complete: false,
        }
    }
}

/// One FIG encoder. `fill` writes a whole FIG (header byte included) into
/// `buf` or writes nothing when its next atomic unit does not fit; iterative
/// encoders persist their position and report `complete` on wrap-around.
pub trait FigEncoder: Send {
    fn fig_type(&self) -> u8;
    fn extension(&self) -> u8;
    fn repetition_class(&self, ensemble: &Ensemble) -> RepetitionClass;
    fn priority(&self, _ensemble: &Ensemble) -> Priority {
        Priority::Normal
    }
    fn fill(&mut self, buf: &mut [u8], ensemble: &Ensemble, ctx: &CifContext) -> FillResult;
}

/// FIG header byte: 3-bit type, 5-bit length of the following data.
pub(crate) fn fig_header(fig_type: u8, data_len: usize) -> u8 {
    debug_assert!(data_len <= 29);
    (fig_type << 5) | (data_len as u8 & 0x1F)
}

const FIB_DATA: usize = 30;

struct CarouselEntry {
    encoder: Box<dyn FigEncoder>,
    countdown: u32,
}

pub struct FicCarousel {
    entries: Vec<CarouselEntry>,
    last_fingerprint: u16,
    announcements_active: bool,
}

impl FicCarousel {
    /// Registers the FIG set the configured ensemble needs.
    pub fn new(ensemble: &Ensemble) -> Self {
        let mut encoders: Vec<Box<dyn FigEncoder>> = vec![
            Box::new(fig0::Fig0_0::new()),
            Box::new(fig0::Fig0_7::new()),
        ];

        if !ensemble.subchannels.is_empty() {
            encoders.push(Box::new(fig0::Fig0_1::new()));
        }
        if !ensemble.components.is_empty() {
            encoders.push(Box::new(fig0::Fig0_2::new()));
            encoders.push(Box::new(fig0::Fig0_8::new()));
        }
        if ensemble.components.iter().any(|c| c.packet.is_some()) {
            encoders.push(Box::new(fig0::Fig0_3::new()));
        }
        if !ensemble.services.is_empty() {
            encoders.push(Box::new(fig0::Fig0_5::new()));
            encoders.push(Box::new(fig0::Fig0_17::new()));
            encoders.push(Box::new(fig1::Fig1_1::new()));
        }
        if ensemble.services.iter().any(|s| !s.links.is_empty()) {
            encoders.push(Box::new(fig0::Fig0_6::new()));
        }
        encoders.push(Box::new(fig0::Fig0_9::new()));
        if ensemble.datetime_enabled {
            encoders.push(Box::new(fig0::Fig0_10::new()));
        }
        if ensemble.components.iter().any(|c| !c.ua_types.is_empty()) {
            encoders.push(Box::new(fig0::Fig0_13::new()));
        }
        if ensemble
            .subchannels
            .iter()
            .any(|s| matches!(s.fec_scheme, Some(crate::config::FecScheme::Rs)))
        {
            encoders.push(Box::new(fig0::Fig0_14::new()));
        }
        if ensemble
            .services
            .iter()
            .any(|s| s.announcements.is_some())
        {
            encoders.push(Box::new(fig0::Fig0_18::new()));
            encoders.push(Box::new(fig0::Fig0_19::new()));
        }
        if !ensemble.frequency_information.is_empty() {
            encoders.push(Box::new(fig0::Fig0_21::new()));
        }
        if ensemble.services.iter().any(|s| !s.other_ensembles.is_empty()) {
            encoders.push(Box::new(fig0::Fig0_24::new()));
        }
        encoders.push(Box::new(fig1::Fig1_0::new()));
        if ensemble.components.iter().any(|c| c.label.is_some()) {
            encoders.push(Box::new(fig1::Fig1_4::new()));
        }
        if ensemble
            .components
            .iter()
            .any(|c| c.dynamic_label.is_some())
        {
            encoders.push(Box::new(fig1::Fig2_1::new()));
        }
        if ensemble.ca.is_some() {
            encoders.push(Box::new(fig1::Fig6_0::new()));
            encoders.push(Box::new(fig1::Fig6_1::new()));
        }

        let entries = encoders
            .into_iter()
            .map(|encoder| CarouselEntry {
                encoder,
                // everything is due on the first frame
                countdown: 0,
            })
            .collect();

        FicCarousel {
            entries,
            last_fingerprint: ensemble.fingerprint,
            announcements_active: false,
        }
    }

    fn make_due(&mut self, fig_type: u8, extension: u8) {
        if let Some(entry) = self
            .entries
            .iter_mut()
            .find(|e| e.encoder.fig_type() == fig_type && e.encoder.extension() == extension)
        {
            entry.countdown = 0;
        }
    }

    /// Produces the FIC block for one ETI frame: `fib_count` FIBs of 32
    /// bytes each.
    pub fn tick(&mut self, ensemble: &Ensemble, ctx: &CifContext) -> Vec<u8> {
        // a configuration change makes FIG 0/7 due immediately
        if ensemble.fingerprint != self.last_fingerprint {
            self.last_fingerprint = ensemble.fingerprint;
            self.make_due(0, 7);
        }

        // a newly triggered announcement promotes FIG 0/19 out of its
        // dormant class C schedule at once
        let active = ensemble.has_active_announcements();
        if active && !self.announcements_active {
            self.make_due(0, 19);
        }
        self.announcements_active = active;

        for entry in &mut self.entries {
            entry.countdown = entry.countdown.saturating_sub(1);
        }

        // priority order: HIGH before NORMAL, due before not-due, then
        // registration order
        let mut order: Vec<usize> = (0..self.entries.len()).collect();
        order.sort_by_key(|&i| {
            let e = &self.entries[i];
            let high = e.encoder.priority(ensemble) == Priority::High;
            let due = e.countdown == 0;
            (!high, !due, i)
        });

        let fib_count = ensemble.mode.fib_count();
        let mut fic = Vec::with_capacity(fib_count * 32);

        // per-tick state: Done = finished its cycle, Parked = emitted a
        // partial pass or is not due; neither is asked again this tick
        let mut finished = vec![false; self.entries.len()];
        let mut parked: Vec<bool> = self
            .entries
            .iter()
            .map(|e| e.countdown != 0)
            .collect();

        for _ in 0..fib_count {
            let mut fib = [0xFFu8; FIB_DATA];
            let mut used = 0;

            for &i in &order {
                if finished[i] || parked[i] || used >= FIB_DATA {
                    continue;
                }

                let entry = &mut self.entries[i];
                let result = entry.encoder.fill(&mut fib[used..], ensemble, ctx);
                used += result.written;

                if result.complete {
                    finished[i] = true;
                    let class = entry.encoder.repetition_class(ensemble);
                    let high = entry.encoder.priority(ensemble) == Priority::High;
                    entry.countdown = match class.period() {
                        // HIGH entries (active announcements) re-emit on
                        // every frame
                        Some(_) if high => 1,
                        Some(period) => period,
                        None => u32::MAX,
                    };
                } else if result.written > 0 {
                    // made progress but has more; timer stays at zero and it
                    // continues next frame
                    parked[i] = true;
                }
                // written == 0, not complete: does not fit here; may still
                // fit in the next, emptier FIB
            }

            if used == 0 {
                // unused FIB: a filler FIG 0/0 so receivers never see raw
                // padding at offset zero
                fig0::Fig0_0::new().fill(&mut fib[..], ensemble, ctx);
            }

            fic.extend_from_slice(&fib);
            let crc = utils::crc16_ccitt(&fib);
            fic.extend_from_slice(&crc.to_be_bytes());
        }

        fic
    }
}
