//! FIG type 1/2/6 encoders: labels, dynamic labels and conditional access.

use crate::dab::ensemble::{DynamicLabelState, Ensemble};
use crate::dab::fic::{fig_header, CifContext, FigEncoder, FillResult, RepetitionClass};
use crate::dab::tables;

/// Type-1 second byte: charset, rfa, 3-bit extension. Labels are always
/// EBU Latin (charset 0).
fn fig1_byte(ext: u8) -> u8 {
    ext & 0x07
}

/// Type-6 second byte mirrors the type-0 shape: CN, OE, PD, extension.
fn fig6_byte(pd: bool, ext: u8) -> u8 {
    ((pd as u8) << 5) | (ext & 0x1F)
}

// FIG 1/0 - Ensemble label
pub struct Fig1_0;

impl Fig1_0 {
    pub fn new() -> Self {
        Fig1_0
    }
}

impl FigEncoder for Fig1_0 {
    fn fig_type(&self) -> u8 {
        1
    }

    fn extension(&self) -> u8 {
        0
    }

    fn repetition_class(&self, _ensemble: &Ensemble) -> RepetitionClass {
        RepetitionClass::B
    }

    fn fill(&mut self, buf: &mut [u8], ensemble: &Ensemble, _ctx: &CifContext) -> FillResult {
        // second byte + EId + 16 chars + flag field
        if buf.len() < 22 {
            return FillResult::partial(0);
        }

        buf[0] = fig_header(1, 21);
        buf[1] = fig1_byte(0);
        buf[2..4].copy_from_slice(&ensemble.id.to_be_bytes());
        buf[4..20].copy_from_slice(&ensemble.label.bytes());
        buf[20..22].copy_from_slice(&ensemble.label.mask.to_be_bytes());

        FillResult::complete(22)
    }
}

// FIG 1/1 - Programme service label
pub struct Fig1_1 {
    index: usize,
}

impl Fig1_1 {
    pub fn new() -> Self {
        Fig1_1 { index: 0 }
    }
}

impl FigEncoder for Fig1_1 {
    fn fig_type(&self) -> u8 {
        1
    }

    fn extension(&self) -> u8 {
        1
    }

    fn repetition_class(&self, _ensemble: &Ensemble) -> RepetitionClass {
        RepetitionClass::B
    }

    fn fill(&mut self, buf: &mut [u8], ensemble: &Ensemble, _ctx: &CifContext) -> FillResult {
        let services: Vec<_> = ensemble.services.iter().filter(|s| !s.is_data()).collect();
        if services.is_empty() {
            return FillResult::complete(0);
        }

        // one label per FIG
        if buf.len() < 22 {
            return FillResult::partial(0);
        }

        let service = services[self.index.min(services.len() - 1)];

        buf[0] = fig_header(1, 21);
        buf[1] = fig1_byte(1);
        buf[2..4].copy_from_slice(&(service.sid as u16).to_be_bytes());
        buf[4..20].copy_from_slice(&service.label.bytes());
        buf[20..22].copy_from_slice(&service.label.mask.to_be_bytes());

        self.index += 1;
        let complete = self.index >= services.len();
        if complete {
            self.index = 0;
        }

        FillResult {
            written: 22,
            complete,
        }
    }
}

// FIG 1/4 - Service component label
pub struct Fig1_4 {
    index: usize,
}

impl Fig1_4 {
    pub fn new() -> Self {
        Fig1_4 { index: 0 }
    }
}

impl FigEncoder for Fig1_4 {
    fn fig_type(&self) -> u8 {
        1
    }

    fn extension(&self) -> u8 {
        4
    }

    fn repetition_class(&self, _ensemble: &Ensemble) -> RepetitionClass {
        RepetitionClass::B
    }

    fn fill(&mut self, buf: &mut [u8], ensemble: &Ensemble, _ctx: &CifContext) -> FillResult {
        let comps: Vec<_> = ensemble
            .components
            .iter()
            .filter(|c| c.label.is_some())
            .collect();
        if comps.is_empty() {
            return FillResult::complete(0);
        }

        let comp = comps[self.index.min(comps.len() - 1)];
        let label = comp.label.as_ref().unwrap();
        let data_service = comp.service_id > 0xFFFF;
        let sid_len = if data_service { 4 } else { 2 };
        let total = 2 + 1 + sid_len + 18;

        if buf.len() < total {
            return FillResult::partial(0);
        }

        buf[0] = fig_header(1, total - 1);
        buf[1] = fig1_byte(4);
        buf[2] = ((data_service as u8) << 7) | (comp.scids & 0x0F);
        let mut at = 3;
        if data_service {
            buf[at..at + 4].copy_from_slice(&comp.service_id.to_be_bytes());
            at += 4;
        } else {
            buf[at..at + 2].copy_from_slice(&(comp.service_id as u16).to_be_bytes());
            at += 2;
        }
        buf[at..at + 16].copy_from_slice(&label.bytes());
        buf[at + 16..at + 18].copy_from_slice(&label.mask.to_be_bytes());

        self.index += 1;
        let complete = self.index >= comps.len();
        if complete {
            self.index = 0;
        }

        FillResult {
            written: total,
            complete,
        }
    }
}

/// The dynamic label text in its transport charset, segmented into 16-byte
/// chunks (at most 8 segments).
fn dynamic_label_segments(dl: &DynamicLabelState) -> Vec<Vec<u8>> {
    let encoded: Vec<u8> = match dl.charset {
        // UCS-2 big-endian
        6 => dl
            .text
            .encode_utf16()
            .flat_map(|unit| unit.to_be_bytes())
            .collect(),
        // UTF-8
        15 => dl.text.as_bytes().to_vec(),
        // EBU Latin
        _ => dl.text.chars().map(tables::ebu_latin).collect(),
    };

    let mut segments: Vec<Vec<u8>> = encoded.chunks(16).take(8).map(|c| c.to_vec()).collect();
    if segments.is_empty() {
        segments.push(Vec::new());
    }
    segments
}

// FIG 2/1 - Dynamic label
// One segment per FIG; the toggle bit tells receivers a new text started.
pub struct Fig2_1 {
    comp_index: usize,
    seg_index: usize,
}

impl Fig2_1 {
    pub fn new() -> Self {
        Fig2_1 {
            comp_index: 0,
            seg_index: 0,
        }
    }
}

impl FigEncoder for Fig2_1 {
    fn fig_type(&self) -> u8 {
        2
    }

    fn extension(&self) -> u8 {
        1
    }

    fn repetition_class(&self, _ensemble: &Ensemble) -> RepetitionClass {
        RepetitionClass::A
    }

    fn fill(&mut self, buf: &mut [u8], ensemble: &Ensemble, _ctx: &CifContext) -> FillResult {
        let comps: Vec<_> = ensemble
            .components
            .iter()
            .filter(|c| c.dynamic_label.is_some() && c.service_id <= 0xFFFF)
            .collect();
        if comps.is_empty() {
            return FillResult::complete(0);
        }

        if self.comp_index >= comps.len() {
            self.comp_index = 0;
            self.seg_index = 0;
        }

        let comp = comps[self.comp_index];
        let dl = comp.dynamic_label.as_ref().unwrap();
        let segments = dynamic_label_segments(dl);
        if self.seg_index >= segments.len() {
            self.seg_index = 0;
        }
        let segment = &segments[self.seg_index];

        let total = 2 + 2 + 1 + segment.len();
        if buf.len() < total {
            return FillResult::partial(0);
        }

        let first = self.seg_index == 0;
        let last = self.seg_index == segments.len() - 1;

        buf[0] = fig_header(2, total - 1);
        buf[1] = ((dl.charset & 0x0F) << 4) | ((dl.toggle as u8) << 3) | 0x01;
        buf[2..4].copy_from_slice(&(comp.service_id as u16).to_be_bytes());
        buf[4] = ((first as u8) << 7) | ((last as u8) << 6) | (self.seg_index as u8 & 0x0F);
        buf[5..5 + segment.len()].copy_from_slice(segment);

        // advance segment-first, then component
        self.seg_index += 1;
        if self.seg_index >= segments.len() {
            self.seg_index = 0;
            self.comp_index += 1;
        }
        let complete = self.comp_index >= comps.len();
        if complete {
            self.comp_index = 0;
        }

        FillResult {
            written: total,
            complete,
        }
    }
}

// FIG 6/0 - CA organisation
pub struct Fig6_0;

impl Fig6_0 {
    pub fn new() -> Self {
        Fig6_0
    }
}

impl FigEncoder for Fig6_0 {
    fn fig_type(&self) -> u8 {
        6
    }

    fn extension(&self) -> u8 {
        0
    }

    fn repetition_class(&self, _ensemble: &Ensemble) -> RepetitionClass {
        RepetitionClass::C
    }

    fn fill(&mut self, buf: &mut [u8], ensemble: &Ensemble, _ctx: &CifContext) -> FillResult {
        let systems = match &ensemble.ca {
            Some(ca) => &ca.systems,
            None => return FillResult::complete(0),
        };

        let count = systems.len().min(14);
        let total = 2 + 2 * count;
        if buf.len() < total {
            return FillResult::partial(0);
        }

        buf[0] = fig_header(6, total - 1);
        buf[1] = fig6_byte(false, 0);
        let mut at = 2;
        for caid in systems.iter().take(count) {
            buf[at..at + 2].copy_from_slice(&caid.to_be_bytes());
            at += 2;
        }

        FillResult::complete(total)
    }
}

// FIG 6/1 - CA service
pub struct Fig6_1 {
    index: usize,
}

impl Fig6_1 {
    pub fn new() -> Self {
        Fig6_1 { index: 0 }
    }
}

impl FigEncoder for Fig6_1 {
    fn fig_type(&self) -> u8 {
        6
    }

    fn extension(&self) -> u8 {
        1
    }

    fn repetition_class(&self, _ensemble: &Ensemble) -> RepetitionClass {
        RepetitionClass::C
    }

    fn fill(&mut self, buf: &mut [u8], ensemble: &Ensemble, _ctx: &CifContext) -> FillResult {
        let services: Vec<_> = ensemble
            .services
            .iter()
            .filter(|s| s.ca_system.is_some())
            .collect();
        if services.is_empty() {
            return FillResult::complete(0);
        }

        let pd = services[self.index.min(services.len() - 1)].is_data();

        let mut payload = [0u8; 29];
        payload[0] = fig6_byte(pd, 1);
        let mut len = 1;

        while self.index < services.len() {
            let service = services[self.index];
            if service.is_data() != pd {
                break;
            }

            let sid_len: usize = if service.is_data() { 4 } else { 2 };
            if 1 + len + sid_len + 2 > buf.len() {
                break;
            }

            if service.is_data() {
                payload[len..len + 4].copy_from_slice(&service.sid.to_be_bytes());
                len += 4;
            } else {
                payload[len..len + 2].copy_from_slice(&(service.sid as u16).to_be_bytes());
                len += 2;
            }
            payload[len..len + 2].copy_from_slice(&service.ca_system.unwrap().to_be_bytes());
            len += 2;

            self.index += 1;
        }

        if len == 1 {
            return FillResult::partial(0);
        }

        buf[0] = fig_header(6, len);
        buf[1..1 + len].copy_from_slice(&payload[..len]);

        let complete = self.index >= services.len();
        if complete {
            self.index = 0;
        }

        FillResult {
            written: 1 + len,
            complete,
        }
    }
}
