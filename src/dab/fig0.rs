//! FIG type 0 encoders: multiplex configuration information.
//!
//! Field layouts follow ETSI EN 300 401; each `fill` writes one complete
//! FIG (header byte, type-0 second byte, payload) or nothing at all. A FIG
//! record is never split across FIBs.

use chrono::{Datelike, Timelike};

use crate::config::{FrequencyKind, SubchannelType};
use crate::dab::ensemble::Ensemble;
use crate::dab::fic::{fig_header, CifContext, FigEncoder, FillResult, Priority, RepetitionClass};
use crate::utils;

/// Type-0 second byte: CN, OE, PD, 5-bit extension.
fn fig0_byte(pd: bool, ext: u8) -> u8 {
    ((pd as u8) << 5) | (ext & 0x1F)
}

fn put_sid(out: &mut [u8], sid: u32, data_service: bool) -> usize {
    if data_service {
        out[..4].copy_from_slice(&sid.to_be_bytes());
        4
    } else {
        out[..2].copy_from_slice(&(sid as u16).to_be_bytes());
        2
    }
}

// FIG 0/0 - Ensemble information
// EID, change flags, alarm flag, CIF counter. Also used as FIB filler.
pub struct Fig0_0;

impl Fig0_0 {
    pub fn new() -> Self {
        Fig0_0
    }
}

impl Default for Fig0_0 {
    fn default() -> Self {
        Self::new()
    }
}

impl FigEncoder for Fig0_0 {
    fn fig_type(&self) -> u8 {
        0
    }

    fn extension(&self) -> u8 {
        0
    }

    fn repetition_class(&self, _ensemble: &Ensemble) -> RepetitionClass {
        RepetitionClass::A
    }

    fn fill(&mut self, buf: &mut [u8], ensemble: &Ensemble, ctx: &CifContext) -> FillResult {
        if buf.len() < 6 {
            return FillResult::partial(0);
        }

        let cif_hi = ((ctx.cif / 250) % 20) as u8;
        let cif_lo = (ctx.cif % 250) as u8;

        buf[0] = fig_header(0, 5);
        buf[1] = fig0_byte(false, 0);
        buf[2..4].copy_from_slice(&ensemble.id.to_be_bytes());
        buf[4] = ((ensemble.alarm_flag as u8) << 5) | cif_hi;
        buf[5] = cif_lo;

        FillResult::complete(6)
    }
}

// FIG 0/1 - Sub-channel organisation
pub struct Fig0_1 {
    index: usize,
}

impl Fig0_1 {
    pub fn new() -> Self {
        Fig0_1 { index: 0 }
    }

    /// Short form for UEP (table index), long form for EEP.
    fn encode_entry(sc: &crate::dab::ensemble::Subchannel, out: &mut [u8; 4]) -> usize {
        out[0] = (sc.id << 2) | ((sc.start_address >> 8) as u8 & 0x03);
        out[1] = sc.start_address as u8;

        match sc.protection.eep_level_option() {
            Some((level, set_b)) => {
                let option: u8 = if set_b { 0b001 } else { 0b000 };
                out[2] = 0x80
                    | (option << 4)
                    | ((level - 1) << 2)
                    | ((sc.size_cu >> 8) as u8 & 0x03);
                out[3] = sc.size_cu as u8;
                4
            }
            None => {
                let level = sc.protection.uep_level().unwrap_or(5);
                let index =
                    crate::dab::tables::uep_table_index(sc.bitrate, level).unwrap_or(0);
                out[2] = index & 0x3F;
                3
            }
        }
    }
}

impl FigEncoder for Fig0_1 {
    fn fig_type(&self) -> u8 {
        0
    }

    fn extension(&self) -> u8 {
        1
    }

    fn repetition_class(&self, _ensemble: &Ensemble) -> RepetitionClass {
        RepetitionClass::B
    }

    fn fill(&mut self, buf: &mut [u8], ensemble: &Ensemble, _ctx: &CifContext) -> FillResult {
        let subs = ensemble.subchannels_by_scid();
        if subs.is_empty() {
            return FillResult::complete(0);
        }

        let mut payload = [0u8; 29];
        payload[0] = fig0_byte(false, 1);
        let mut len = 1;

        while self.index < subs.len() {
            let mut entry = [0u8; 4];
            let entry_len = Self::encode_entry(subs[self.index], &mut entry);
            if 1 + len + entry_len > buf.len() {
                break;
            }
            payload[len..len + entry_len].copy_from_slice(&entry[..entry_len]);
            len += entry_len;
            self.index += 1;
        }

        if len == 1 {
            return FillResult::partial(0);
        }

        buf[0] = fig_header(0, len);
        buf[1..1 + len].copy_from_slice(&payload[..len]);

        let complete = self.index >= subs.len();
        if complete {
            self.index = 0;
        }

        FillResult {
            written: 1 + len,
            complete,
        }
    }
}

// FIG 0/2 - Service organisation (stream and packet references)
pub struct Fig0_2 {
    index: usize,
}

impl Fig0_2 {
    pub fn new() -> Self {
        Fig0_2 { index: 0 }
    }

    fn encode_service(ensemble: &Ensemble, sid: u32, out: &mut [u8; 29]) -> Option<usize> {
        let service = ensemble.service(sid)?;
        let comps = ensemble.service_components(sid);
        if comps.is_empty() {
            return Some(0);
        }

        let mut len = put_sid(out, sid, service.is_data());
        out[len] = (comps.len() as u8).min(15) & 0x0F;
        len += 1;

        let ca = service.ca_system.is_some();

        for comp in comps.iter().take(15) {
            match &comp.packet {
                Some(packet) => {
                    // TMId 3: packet service component, 12-bit SCId
                    out[len] = (0b11 << 6) | ((packet.scid >> 6) as u8 & 0x3F);
                    out[len + 1] =
                        ((packet.scid as u8 & 0x3F) << 2) | ((comp.primary as u8) << 1) | ca as u8;
                }
                None => {
                    let sc = ensemble.subchannel(comp.subchannel_id);
                    let (tmid, ty) = match sc.map(|s| s.typ) {
                        Some(SubchannelType::DabPlus) => (0b00, 63u8),
                        Some(SubchannelType::Audio) => (0b00, 0),
                        // stream data
                        _ => (0b01, 0),
                    };
                    out[len] = (tmid << 6) | (ty & 0x3F);
                    out[len + 1] =
                        (comp.subchannel_id << 2) | ((comp.primary as u8) << 1) | ca as u8;
                }
            }
            len += 2;
        }

        Some(len)
    }
}

impl FigEncoder for Fig0_2 {
    fn fig_type(&self) -> u8 {
        0
    }

    fn extension(&self) -> u8 {
        2
    }

    fn repetition_class(&self, _ensemble: &Ensemble) -> RepetitionClass {
        RepetitionClass::B
    }

    fn fill(&mut self, buf: &mut [u8], ensemble: &Ensemble, _ctx: &CifContext) -> FillResult {
        let services = &ensemble.services;
        if services.is_empty() {
            return FillResult::complete(0);
        }

        // one PD value per FIG: emit a run of services sharing it
        let pd = services[self.index.min(services.len() - 1)].is_data();

        let mut payload = [0u8; 29];
        payload[0] = fig0_byte(pd, 2);
        let mut len = 1;

        while self.index < services.len() {
            let service = &services[self.index];
            if service.is_data() != pd {
                break;
            }
            let mut entry = [0u8; 29];
            match Self::encode_service(ensemble, service.sid, &mut entry) {
                Some(0) | None => {
                    self.index += 1;
                    continue;
                }
                Some(entry_len) => {
                    if 1 + len + entry_len > buf.len() {
                        break;
                    }
                    payload[len..len + entry_len].copy_from_slice(&entry[..entry_len]);
                    len += entry_len;
                    self.index += 1;
                }
            }
        }

        if len == 1 {
            return FillResult::partial(0);
        }

        buf[0] = fig_header(0, len);
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

// FIG 0/3 - Service component in packet mode
pub struct Fig0_3 {
    index: usize,
}

impl Fig0_3 {
    pub fn new() -> Self {
        Fig0_3 { index: 0 }
    }
}

impl FigEncoder for Fig0_3 {
    fn fig_type(&self) -> u8 {
        0
    }

    fn extension(&self) -> u8 {
        3
    }

    fn repetition_class(&self, _ensemble: &Ensemble) -> RepetitionClass {
        RepetitionClass::B
    }

    fn fill(&mut self, buf: &mut [u8], ensemble: &Ensemble, _ctx: &CifContext) -> FillResult {
        let packet_comps: Vec<_> = ensemble
            .components
            .iter()
            .filter(|c| c.packet.is_some())
            .collect();
        if packet_comps.is_empty() {
            return FillResult::complete(0);
        }

        let mut payload = [0u8; 29];
        payload[0] = fig0_byte(false, 3);
        let mut len = 1;

        while self.index < packet_comps.len() {
            let comp = packet_comps[self.index];
            let packet = comp.packet.as_ref().unwrap();

            if 1 + len + 5 > buf.len() {
                break;
            }

            payload[len] = (packet.scid >> 4) as u8;
            payload[len + 1] = ((packet.scid as u8 & 0x0F) << 4) | 0; // rfa + CAOrg absent
            payload[len + 2] = ((packet.datagroups as u8) << 7) | (packet.dscty & 0x3F);
            payload[len + 3] = (comp.subchannel_id << 2) | ((packet.address >> 8) as u8 & 0x03);
            payload[len + 4] = packet.address as u8;
            len += 5;
            self.index += 1;
        }

        if len == 1 {
            return FillResult::partial(0);
        }

        buf[0] = fig_header(0, len);
        buf[1..1 + len].copy_from_slice(&payload[..len]);

        let complete = self.index >= packet_comps.len();
        if complete {
            self.index = 0;
        }

        FillResult {
            written: 1 + len,
            complete,
        }
    }
}

// FIG 0/5 - Service component language
pub struct Fig0_5 {
    index: usize,
}

impl Fig0_5 {
    pub fn new() -> Self {
        Fig0_5 { index: 0 }
    }
}

impl FigEncoder for Fig0_5 {
    fn fig_type(&self) -> u8 {
        0
    }

    fn extension(&self) -> u8 {
        5
    }

    fn repetition_class(&self, _ensemble: &Ensemble) -> RepetitionClass {
        RepetitionClass::B
    }

    fn fill(&mut self, buf: &mut [u8], ensemble: &Ensemble, _ctx: &CifContext) -> FillResult {
        // short form: one entry per stream component, language of its service
        let comps: Vec<_> = ensemble
            .components
            .iter()
            .filter(|c| c.packet.is_none())
            .collect();
        if comps.is_empty() {
            return FillResult::complete(0);
        }

        let mut payload = [0u8; 29];
        payload[0] = fig0_byte(false, 5);
        let mut len = 1;

        while self.index < comps.len() {
            let comp = comps[self.index];
            let language = ensemble
                .service(comp.service_id)
                .map(|s| s.language)
                .unwrap_or(0);

            if 1 + len + 2 > buf.len() {
                break;
            }

            payload[len] = comp.subchannel_id & 0x3F; // LS flag 0
            payload[len + 1] = language;
            len += 2;
            self.index += 1;
        }

        if len == 1 {
            return FillResult::partial(0);
        }

        buf[0] = fig_header(0, len);
        buf[1..1 + len].copy_from_slice(&payload[..len]);

        let complete = self.index >= comps.len();
        if complete {
            self.index = 0;
        }

        FillResult {
            written: 1 + len,
            complete,
        }
    }
}

// FIG 0/6 - Service linking
pub struct Fig0_6 {
    index: usize,
}

impl Fig0_6 {
    pub fn new() -> Self {
        Fig0_6 { index: 0 }
    }
}

impl FigEncoder for Fig0_6 {
    fn fig_type(&self) -> u8 {
        0
    }

    fn extension(&self) -> u8 {
        6
    }

    fn repetition_class(&self, _ensemble: &Ensemble) -> RepetitionClass {
        RepetitionClass::B
    }

    fn fill(&mut self, buf: &mut [u8], ensemble: &Ensemble, _ctx: &CifContext) -> FillResult {
        let links: Vec<_> = ensemble
            .services
            .iter()
            .flat_map(|s| s.links.iter())
            .collect();
        if links.is_empty() {
            return FillResult::complete(0);
        }

        let mut payload = [0u8; 29];
        payload[0] = fig0_byte(false, 6);
        let mut len = 1;

        while self.index < links.len() {
            let link = links[self.index];
            let ids = &link.ids;
            let id_list = !ids.is_empty();
            let entry_len = 2 + if id_list { 1 + 2 * ids.len().min(12) } else { 0 };

            if 1 + len + entry_len > buf.len() {
                break;
            }

            payload[len] = ((id_list as u8) << 7)
                | ((link.active as u8) << 6)
                | ((link.hard as u8) << 5)
                | ((link.international as u8) << 4)
                | ((link.lsn >> 8) as u8 & 0x0F);
            payload[len + 1] = link.lsn as u8;
            len += 2;

            if id_list {
                payload[len] = (link.kind.idlq() << 5) | (ids.len().min(12) as u8 & 0x0F);
                len += 1;
                for id in ids.iter().take(12) {
                    payload[len..len + 2].copy_from_slice(&id.to_be_bytes());
                    len += 2;
                }
            }

            self.index += 1;
        }

        if len == 1 {
            return FillResult::partial(0);
        }

        buf[0] = fig_header(0, len);
        buf[1..1 + len].copy_from_slice(&payload[..len]);

        let complete = self.index >= links.len();
        if complete {
            self.index = 0;
        }

        FillResult {
            written: 1 + len,
            complete,
        }
    }
}

// FIG 0/7 - Configuration information
// 10-bit fingerprint of the signalled configuration.
pub struct Fig0_7;

impl Fig0_7 {
    pub fn new() -> Self {
        Fig0_7
    }
}

impl FigEncoder for Fig0_7 {
    fn fig_type(&self) -> u8 {
        0
    }

    fn extension(&self) -> u8 {
        7
    }

    fn repetition_class(&self, _ensemble: &Ensemble) -> RepetitionClass {
        RepetitionClass::B
    }

    fn fill(&mut self, buf: &mut [u8], ensemble: &Ensemble, _ctx: &CifContext) -> FillResult {
        if buf.len() < 4 {
            return FillResult::partial(0);
        }

        let services = (ensemble.services.len() as u8).min(63);
        let count = ensemble.fingerprint & 0x3FF;

        buf[0] = fig_header(0, 3);
        buf[1] = fig0_byte(false, 7);
        buf[2] = (services << 2) | ((count >> 8) as u8 & 0x03);
        buf[3] = count as u8;

        FillResult::complete(4)
    }
}

// FIG 0/8 - Service component global definition
pub struct Fig0_8 {
    index: usize,
}

impl Fig0_8 {
    pub fn new() -> Self {
        Fig0_8 { index: 0 }
    }
}

impl FigEncoder for Fig0_8 {
    fn fig_type(&self) -> u8 {
        0
    }

    fn extension(&self) -> u8 {
        8
    }

    fn repetition_class(&self, _ensemble: &Ensemble) -> RepetitionClass {
        RepetitionClass::B
    }

    fn fill(&mut self, buf: &mut [u8], ensemble: &Ensemble, _ctx: &CifContext) -> FillResult {
        let comps = &ensemble.components;
        if comps.is_empty() {
            return FillResult::complete(0);
        }

        let pd = comps[self.index.min(comps.len() - 1)]
            .service_id
            > 0xFFFF;

        let mut payload = [0u8; 29];
        payload[0] = fig0_byte(pd, 8);
        let mut len = 1;

        while self.index < comps.len() {
            let comp = &comps[self.index];
            let data_service = comp.service_id > 0xFFFF;
            if data_service != pd {
                break;
            }

            let sid_len: usize = if data_service { 4 } else { 2 };
            let tail_len = if comp.packet.is_some() { 2 } else { 1 };
            if 1 + len + sid_len + 1 + tail_len > buf.len() {
                break;
            }

            let mut entry = [0u8; 8];
            let mut el = put_sid(&mut entry, comp.service_id, data_service);
            entry[el] = comp.scids & 0x0F; // ext flag 0, rfa 0
            el += 1;
            match &comp.packet {
                Some(packet) => {
                    entry[el] = 0x80 | ((packet.scid >> 8) as u8 & 0x0F);
                    entry[el + 1] = packet.scid as u8;
                    el += 2;
                }
                None => {
                    entry[el] = comp.subchannel_id & 0x3F;
                    el += 1;
                }
            }

            payload[len..len + el].copy_from_slice(&entry[..el]);
            len += el;
            self.index += 1;
        }

        if len == 1 {
            return FillResult::partial(0);
        }

        buf[0] = fig_header(0, len);
        buf[1..1 + len].copy_from_slice(&payload[..len]);

        let complete = self.index >= comps.len();
        if complete {
            self.index = 0;
        }

        FillResult {
            written: 1 + len,
            complete,
        }
    }
}

// FIG 0/9 - Country, LTO and international table
pub struct Fig0_9;

impl Fig0_9 {
    pub fn new() -> Self {
        Fig0_9
    }
}

impl FigEncoder for Fig0_9 {
    fn fig_type(&self) -> u8 {
        0
    }

    fn extension(&self) -> u8 {
        9
    }

    fn repetition_class(&self, _ensemble: &Ensemble) -> RepetitionClass {
        RepetitionClass::C
    }

    fn fill(&mut self, buf: &mut [u8], ensemble: &Ensemble, _ctx: &CifContext) -> FillResult {
        if buf.len() < 5 {
            return FillResult::partial(0);
        }

        // LTO: sign + half-hours magnitude
        let lto = if ensemble.lto < 0 {
            0x20 | (ensemble.lto.unsigned_abs() & 0x1F)
        } else {
            ensemble.lto as u8 & 0x1F
        };

        buf[0] = fig_header(0, 4);
        buf[1] = fig0_byte(false, 9);
        buf[2] = lto; // ext flag 0, rfa 0
        buf[3] = ensemble.ecc;
        buf[4] = 0x01; // international table: RDS PTY

        FillResult::complete(5)
    }
}

// FIG 0/10 - Date and time
pub struct Fig0_10;

impl Fig0_10 {
    pub fn new() -> Self {
        Fig0_10
    }
}

impl FigEncoder for Fig0_10 {
    fn fig_type(&self) -> u8 {
        0
    }

    fn extension(&self) -> u8 {
        10
    }

    fn repetition_class(&self, _ensemble: &Ensemble) -> RepetitionClass {
        RepetitionClass::C
    }

    fn fill(&mut self, buf: &mut [u8], _ensemble: &Ensemble, ctx: &CifContext) -> FillResult {
        // long form: MJD + hh:mm:ss.mmm
        if buf.len() < 8 {
            return FillResult::partial(0);
        }

        let now = ctx.now;
        let mjd = utils::mjd_from_ymd(now.year(), now.month(), now.day()) & 0x1_FFFF;
        let hours = now.hour() as u8;
        let minutes = now.minute() as u8;
        let seconds = now.second() as u8;
        let millis = (now.timestamp_subsec_millis() % 1000) as u16;

        buf[0] = fig_header(0, 7);
        buf[1] = fig0_byte(false, 10);
        buf[2] = ((mjd >> 10) & 0x7F) as u8; // rfu 0
        buf[3] = (mjd >> 2) as u8;
        // mjd tail, LSI 0, conf-ind 0, UTC (long form) flag, hours head
        buf[4] = ((mjd as u8 & 0x03) << 6) | (1 << 3) | (hours >> 2);
        buf[5] = ((hours & 0x03) << 6) | (minutes & 0x3F);
        buf[6] = ((seconds & 0x3F) << 2) | ((millis >> 8) as u8 & 0x03);
        buf[7] = millis as u8;

        FillResult::complete(8)
    }
}

// FIG 0/13 - User application information
pub struct Fig0_13 {
    index: usize,
}

impl Fig0_13 {
    pub fn new() -> Self {
        Fig0_13 { index: 0 }
    }
}

impl FigEncoder for Fig0_13 {
    fn fig_type(&self) -> u8 {
        0
    }

    fn extension(&self) -> u8 {
        13
    }

    fn repetition_class(&self, _ensemble: &Ensemble) -> RepetitionClass {
        RepetitionClass::B
    }

    fn fill(&mut self, buf: &mut [u8], ensemble: &Ensemble, _ctx: &CifContext) -> FillResult {
        let comps: Vec<_> = ensemble
            .components
            .iter()
            .filter(|c| !c.ua_types.is_empty())
            .collect();
        if comps.is_empty() {
            return FillResult::complete(0);
        }

        let pd = comps[self.index.min(comps.len() - 1)].service_id > 0xFFFF;

        let mut payload = [0u8; 29];
        payload[0] = fig0_byte(pd, 13);
        let mut len = 1;

        while self.index < comps.len() {
            let comp = comps[self.index];
            let data_service = comp.service_id > 0xFFFF;
            if data_service != pd {
                break;
            }

            let sid_len: usize = if data_service { 4 } else { 2 };
            let apps_len: usize = comp
                .ua_types
                .iter()
                .map(|ua| 2 + ua.data.len().min(23))
                .sum();
            let entry_len = sid_len + 1 + apps_len;
            if 1 + len + entry_len > buf.len() {
                break;
            }

            len += put_sid(&mut payload[len..], comp.service_id, data_service);
            payload[len] = ((comp.scids & 0x0F) << 4) | (comp.ua_types.len() as u8 & 0x0F);
            len += 1;
            for ua in &comp.ua_types {
                let data = &ua.data[..ua.data.len().min(23)];
                payload[len] = (ua.typ >> 3) as u8;
                payload[len + 1] = ((ua.typ as u8 & 0x07) << 5) | (data.len() as u8 & 0x1F);
                len += 2;
                payload[len..len + data.len()].copy_from_slice(data);
                len += data.len();
            }

            self.index += 1;
        }

        if len == 1 {
            return FillResult::partial(0);
        }

        buf[0] = fig_header(0, len);
        buf[1..1 + len].copy_from_slice(&payload[..len]);

        let complete = self.index >= comps.len();
        if complete {
            self.index = 0;
        }

        FillResult {
            written: 1 + len,
            complete,
        }
    }
}

// FIG 0/14 - FEC sub-channel organisation
pub struct Fig0_14 {
    index: usize,
}

impl Fig0_14 {
    pub fn new() -> Self {
        Fig0_14 { index: 0 }
    }
}

impl FigEncoder for Fig0_14 {
    fn fig_type(&self) -> u8 {
        0
    }

    fn extension(&self) -> u8 {
        14
    }

    fn repetition_class(&self, _ensemble: &Ensemble) -> RepetitionClass {
        RepetitionClass::B
    }

    fn fill(&mut self, buf: &mut [u8], ensemble: &Ensemble, _ctx: &CifContext) -> FillResult {
        let subs: Vec<_> = ensemble
            .subchannels_by_scid()
            .into_iter()
            .filter(|s| matches!(s.fec_scheme, Some(crate::config::FecScheme::Rs)))
            .collect();
        if subs.is_empty() {
            return FillResult::complete(0);
        }

        let mut payload = [0u8; 29];
        payload[0] = fig0_byte(false, 14);
        let mut len = 1;

        while self.index < subs.len() {
            if 1 + len + 1 > buf.len() {
                break;
            }
            // FEC scheme 1: RS(204,188)
            payload[len] = (subs[self.index].id << 2) | 0b01;
            len += 1;
            self.index += 1;
        }

        if len == 1 {
            return FillResult::partial(0);
        }

        buf[0] = fig_header(0, len);
        buf[1..1 + len].copy_from_slice(&payload[..len]);

        let complete = self.index >= subs.len();
        if complete {
            self.index = 0;
        }

        FillResult {
            written: 1 + len,
            complete,
        }
    }
}

// FIG 0/17 - Programme type
pub struct Fig0_17 {
    index: usize,
}

impl Fig0_17 {
    pub fn new() -> Self {
        Fig0_17 { index: 0 }
    }
}

impl FigEncoder for Fig0_17 {
    fn fig_type(&self) -> u8 {
        0
    }

    fn extension(&self) -> u8 {
        17
    }

    fn repetition_class(&self, _ensemble: &Ensemble) -> RepetitionClass {
        RepetitionClass::B
    }

    fn fill(&mut self, buf: &mut [u8], ensemble: &Ensemble, _ctx: &CifContext) -> FillResult {
        let services: Vec<_> = ensemble.services.iter().filter(|s| !s.is_data()).collect();
        if services.is_empty() {
            return FillResult::complete(0);
        }

        let mut payload = [0u8; 29];
        payload[0] = fig0_byte(false, 17);
        let mut len = 1;

        while self.index < services.len() {
            let service = services[self.index];
            if 1 + len + 4 > buf.len() {
                break;
            }

            payload[len..len + 2].copy_from_slice(&(service.sid as u16).to_be_bytes());
            payload[len + 2] = 0; // static PTY, no language or CC flags
            payload[len + 3] = service.pty & 0x1F;
            len += 4;
            self.index += 1;
        }

        if len == 1 {
            return FillResult::partial(0);
        }

        buf[0] = fig_header(0, len);
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

// FIG 0/18 - Announcement support
pub struct Fig0_18 {
    index: usize,
}

impl Fig0_18 {
    pub fn new() -> Self {
        Fig0_18 { index: 0 }
    }
}

impl FigEncoder for Fig0_18 {
    fn fig_type(&self) -> u8 {
        0
    }

    fn extension(&self) -> u8 {
        18
    }

    fn repetition_class(&self, _ensemble: &Ensemble) -> RepetitionClass {
        RepetitionClass::B
    }

    fn fill(&mut self, buf: &mut [u8], ensemble: &Ensemble, _ctx: &CifContext) -> FillResult {
        let services: Vec<_> = ensemble
            .services
            .iter()
            .filter(|s| s.announcements.is_some())
            .collect();
        if services.is_empty() {
            return FillResult::complete(0);
        }

        let mut payload = [0u8; 29];
        payload[0] = fig0_byte(false, 18);
        let mut len = 1;

        while self.index < services.len() {
            let service = services[self.index];
            let support = service.announcements.as_ref().unwrap();
            if 1 + len + 6 > buf.len() {
                break;
            }

            payload[len..len + 2].copy_from_slice(&(service.sid as u16).to_be_bytes());
            payload[len + 2..len + 4].copy_from_slice(&support.asu.to_be_bytes());
            payload[len + 4] = 0x01; // rfa, one cluster
            payload[len + 5] = support.cluster_id;
            len += 6;
            self.index += 1;
        }

        if len == 1 {
            return FillResult::partial(0);
        }

        buf[0] = fig_header(0, len);
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

// FIG 0/19 - Announcement switching
// Dormant at class C; an active announcement promotes the entry to class A
// and HIGH priority, re-emitted on every frame until cleared.
pub struct Fig0_19;

impl Fig0_19 {
    pub fn new() -> Self {
        Fig0_19
    }
}

impl FigEncoder for Fig0_19 {
    fn fig_type(&self) -> u8 {
        0
    }

    fn extension(&self) -> u8 {
        19
    }

    fn repetition_class(&self, ensemble: &Ensemble) -> RepetitionClass {
        if ensemble.has_active_announcements() {
            RepetitionClass::A
        } else {
            RepetitionClass::C
        }
    }

    fn priority(&self, ensemble: &Ensemble) -> Priority {
        if ensemble.has_active_announcements() {
            Priority::High
        } else {
            Priority::Normal
        }
    }

    fn fill(&mut self, buf: &mut [u8], ensemble: &Ensemble, _ctx: &CifContext) -> FillResult {
        let active = &ensemble.active_announcements;
        if active.is_empty() {
            return FillResult::complete(0);
        }

        let mut payload = [0u8; 29];
        payload[0] = fig0_byte(false, 19);
        let mut len = 1;

        for announcement in active {
            if 1 + len + 4 > buf.len() {
                break;
            }
            payload[len] = announcement.cluster_id;
            payload[len + 1..len + 3].copy_from_slice(&announcement.asw.to_be_bytes());
            payload[len + 3] = 0x80 | (announcement.subchannel & 0x3F); // new flag
            len += 4;
        }

        if len == 1 {
            return FillResult::partial(0);
        }

        buf[0] = fig_header(0, len);
        buf[1..1 + len].copy_from_slice(&payload[..len]);

        FillResult::complete(1 + len)
    }
}

// FIG 0/21 - Frequency information
pub struct Fig0_21 {
    index: usize,
}

impl Fig0_21 {
    pub fn new() -> Self {
        Fig0_21 { index: 0 }
    }
}

impl FigEncoder for Fig0_21 {
    fn fig_type(&self) -> u8 {
        0
    }

    fn extension(&self) -> u8 {
        21
    }

    fn repetition_class(&self, _ensemble: &Ensemble) -> RepetitionClass {
        RepetitionClass::B
    }

    fn fill(&mut self, buf: &mut [u8], ensemble: &Ensemble, _ctx: &CifContext) -> FillResult {
        let infos = &ensemble.frequency_information;
        if infos.is_empty() {
            return FillResult::complete(0);
        }

        let mut payload = [0u8; 29];
        payload[0] = fig0_byte(false, 21);
        let mut len = 1;

        while self.index < infos.len() {
            let info = &infos[self.index];
            let nfreq = info.frequencies.len().min(7);
            let (rm, freq_len) = match info.kind {
                FrequencyKind::Dab => (0b0000u8, 3usize),
                FrequencyKind::Fm => (0b1000, 2),
            };
            let entry_len = 3 + nfreq * freq_len;
            if 1 + len + entry_len > buf.len() {
                break;
            }

            payload[len..len + 2].copy_from_slice(&info.id.to_be_bytes());
            payload[len + 2] = (rm << 4) | (nfreq as u8 & 0x07);
            len += 3;

            for mhz in info.frequencies.iter().take(7) {
                match info.kind {
                    FrequencyKind::Dab => {
                        // DAB frequency coded as MHz * 16
                        let coded = (mhz * 16.0).round() as u32 & 0x7_FFFF;
                        payload[len] = (coded >> 16) as u8; // control field 0
                        payload[len + 1] = (coded >> 8) as u8;
                        payload[len + 2] = coded as u8;
                        len += 3;
                    }
                    FrequencyKind::Fm => {
                        // FM frequency coded as (MHz - 87.5) * 200
                        let coded = ((mhz - 87.5) * 200.0).round().clamp(0.0, 65535.0) as u16;
                        payload[len..len + 2].copy_from_slice(&coded.to_be_bytes());
                        len += 2;
                    }
                }
            }

            self.index += 1;
        }

        if len == 1 {
            return FillResult::partial(0);
        }

        buf[0] = fig_header(0, len);
        buf[1..1 + len].copy_from_slice(&payload[..len]);

        let complete = self.index >= infos.len();
        if complete {
            self.index = 0;
        }

        FillResult {
            written: 1 + len,
            complete,
        }
    }
}

// FIG 0/24 - Other ensemble services
pub struct Fig0_24 {
    index: usize,
}

impl Fig0_24 {
    pub fn new() -> Self {
        Fig0_24 { index: 0 }
    }
}

impl FigEncoder for Fig0_24 {
    fn fig_type(&self) -> u8 {
        0
    }

    fn extension(&self) -> u8 {
        24
    }

    fn repetition_class(&self, _ensemble: &Ensemble) -> RepetitionClass {
        RepetitionClass::B
    }

    fn fill(&mut self, buf: &mut [u8], ensemble: &Ensemble, _ctx: &CifContext) -> FillResult {
        let services: Vec<_> = ensemble
            .services
            .iter()
            .filter(|s| !s.other_ensembles.is_empty())
            .collect();
        if services.is_empty() {
            return FillResult::complete(0);
        }

        let pd = services[self.index.min(services.len() - 1)].is_data();

        let mut payload = [0u8; 29];
        payload[0] = fig0_byte(pd, 24);
        let mut len = 1;

        while self.index < services.len() {
            let service = services[self.index];
            if service.is_data() != pd {
                break;
            }

            let sid_len: usize = if service.is_data() { 4 } else { 2 };
            let neid = service.other_ensembles.len().min(11);
            let entry_len = sid_len + 1 + 2 * neid;
            if 1 + len + entry_len > buf.len() {
                break;
            }

            len += put_sid(&mut payload[len..], service.sid, service.is_data());
            payload[len] = neid as u8 & 0x0F; // rfa, CAId 0
            len += 1;
            for eid in service.other_ensembles.iter().take(neid) {
                payload[len..len + 2].copy_from_slice(&eid.to_be_bytes());
                len += 2;
            }

            self.index += 1;
        }

        if len == 1 {
            return FillResult::partial(0);
        }

        buf[0] = fig_header(0, len);
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
