//! The ensemble data model: constructed once from configuration, read by the
//! frame producer, mutated only through the remote-control surface.

use std::time::Instant;

use serde::Serialize;
use thiserror::Error;

use crate::config::{
    AnnouncementType, CaConfig, Config, FecScheme, FrequencyInfoConfig, Protection,
    ServiceLinkConfig, SubchannelConfig, SubchannelType, TransmissionMode, UserApplicationConfig,
};
use crate::dab::tables;
use crate::utils;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Duplicate subchannel id: {id}")]
    DuplicateSubchannelId { id: u8 },

    #[error("Duplicate service id: 0x{sid:X}")]
    DuplicateServiceId { sid: u32 },

    #[error("Subchannel id out of range: {id}")]
    SubchannelIdRange { id: u8 },

    #[error("Unknown bitrate {bitrate} kbps for protection profile of subchannel {uid}")]
    InvalidBitrate { uid: String, bitrate: u16 },

    #[error("CU overlap between subchannels {a} and {b}")]
    CuOverlap { a: u8, b: u8 },

    #[error("Ensemble capacity exceeded: {used} CU > {capacity} CU")]
    CapacityExceeded { used: u32, capacity: u16 },

    #[error("Component {uid} references unknown service 0x{sid:X}")]
    UnknownService { uid: String, sid: u32 },

    #[error("Component {uid} references unknown subchannel {id}")]
    UnknownSubchannel { uid: String, id: u8 },

    #[error("Label too long: {text:?}")]
    LabelTooLong { text: String },

    #[error("Short label mask 0x{mask:04X} invalid for {text:?}")]
    ShortLabelInvalid { text: String, mask: u16 },

    #[error("Packet component {uid} is missing its packet address")]
    MissingPacketAddress { uid: String },

    #[error("Packet address out of range: {address}")]
    PacketAddressRange { address: u16 },

    #[error("Value out of range for {field}: {value}")]
    ValueRange { field: &'static str, value: u32 },

    #[error("Conditional access enabled but no CA system ids configured")]
    EmptyCaSystems,

    #[error("Service 0x{sid:X} has too many components ({count}, max 11)")]
    TooManyComponents { sid: u32, count: usize },

    #[error("User application data of component {uid} does not fit one FIG")]
    FigTooLarge { uid: String },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Label {
    pub text: String,
    /// 16-bit flag field selecting the short label characters.
    pub mask: u16,
}

impl Label {
    pub fn from_config(cfg: &crate::config::LabelConfig) -> Result<Self, ConfigError> {
        Self::new(&cfg.text, cfg.short_mask)
    }

    pub fn new(text: &str, short_mask: Option<u16>) -> Result<Self, ConfigError> {
        let len = text.chars().count();
        if len > 16 {
            return Err(ConfigError::LabelTooLong {
                text: text.to_string(),
            });
        }

        let mask = match short_mask {
            Some(mask) => {
                // at most 8 characters, all within the label text
                let selected = mask.count_ones();
                let beyond = mask & (0xFFFFu16.checked_shr(len as u32).unwrap_or(0));
                if selected > 8 || beyond != 0 {
                    return Err(ConfigError::ShortLabelInvalid {
                        text: text.to_string(),
                        mask,
                    });
                }
                mask
            }
            None => {
                let take = len.min(8);
                if take == 0 {
                    0
                } else {
                    !(0xFFFFu16 >> take) // high `take` bits
                }
            }
        };

        Ok(Label {
            text: text.to_string(),
            mask,
        })
    }

    /// 16 EBU Latin code units, space padded.
    pub fn bytes(&self) -> [u8; 16] {
        tables::label_bytes(&self.text)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Subchannel {
    pub uid: String,
    pub id: u8,
    pub typ: SubchannelType,
    pub bitrate: u16,
    pub protection: Protection,
    pub start_address: u16,
    pub size_cu: u16,
    pub input_uri: String,
    pub fec_scheme: Option<FecScheme>,
}

impl Subchannel {
    pub fn tpl(&self) -> u8 {
        // validated at load time
        tables::tpl(self.protection, self.bitrate).unwrap_or(0)
    }

    /// Sub-Channel Stream Length in 64-bit words per 24 ms frame.
    pub fn stl(&self) -> u16 {
        self.size_cu
    }

    /// MSC payload bytes per 24 ms frame.
    pub fn payload_len(&self) -> usize {
        self.size_cu as usize * 8
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct AnnouncementSupport {
    pub cluster_id: u8,
    /// ASu flag field.
    pub asu: u16,
    pub subchannel: Option<u8>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Service {
    pub uid: String,
    pub sid: u32,
    pub label: Label,
    pub pty: u8,
    pub language: u8,
    pub announcements: Option<AnnouncementSupport>,
    pub ca_system: Option<u16>,
    pub links: Vec<ServiceLinkConfig>,
    pub other_ensembles: Vec<u16>,
}

impl Service {
    /// Data services carry 32-bit ids, programme services 16-bit.
    pub fn is_data(&self) -> bool {
        self.sid > 0xFFFF
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct PacketState {
    /// 12-bit service component id, unique among packet components.
    pub scid: u16,
    pub address: u16,
    pub datagroups: bool,
    pub dscty: u8,
}

#[derive(Debug, Clone, Serialize)]
pub struct DynamicLabelState {
    pub text: String,
    pub charset: u8,
    /// Flipped on every text change; receivers use it to drop stale segments.
    pub toggle: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct Component {
    pub uid: String,
    pub service_id: u32,
    pub subchannel_id: u8,
    pub primary: bool,
    /// Component id within the service (SCIdS).
    pub scids: u8,
    pub packet: Option<PacketState>,
    pub ua_types: Vec<UserApplicationConfig>,
    pub label: Option<Label>,
    pub dynamic_label: Option<DynamicLabelState>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ActiveAnnouncement {
    pub sid: u32,
    pub cluster_id: u8,
    /// ASw flag field.
    pub asw: u16,
    pub subchannel: u8,
    #[serde(skip)]
    pub deadline: Option<Instant>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Ensemble {
    pub id: u16,
    pub ecc: u8,
    pub mode: TransmissionMode,
    pub label: Label,
    pub alarm_flag: bool,
    pub datetime_enabled: bool,
    /// Local time offset in half-hours.
    pub lto: i8,
    pub ca: Option<CaConfig>,
    pub services: Vec<Service>,
    pub subchannels: Vec<Subchannel>,
    pub components: Vec<Component>,
    pub frequency_information: Vec<FrequencyInfoConfig>,
    /// 10-bit FIG 0/7 configuration fingerprint.
    pub fingerprint: u16,
    #[serde(skip)]
    pub active_announcements: Vec<ActiveAnnouncement>,
}

impl Ensemble {
    pub fn from_config(cfg: &Config) -> Result<Self, ConfigError> {
        let label = Label::from_config(&cfg.ensemble.label)?;

        let subchannels = Self::build_subchannels(cfg)?;
        let services = Self::build_services(cfg)?;
        let components = Self::build_components(cfg, &services, &subchannels)?;

        if let Some(ca) = &cfg.ensemble.conditional_access {
            if ca.enabled && ca.systems.is_empty() {
                return Err(ConfigError::EmptyCaSystems);
            }
        }

        let (datetime_enabled, lto) = match &cfg.ensemble.datetime {
            Some(dt) => {
                if dt.utc_offset < -24 || dt.utc_offset > 24 {
                    return Err(ConfigError::ValueRange {
                        field: "utc_offset",
                        value: dt.utc_offset.unsigned_abs() as u32,
                    });
                }
                (dt.enabled, dt.utc_offset)
            }
            None => (false, 0),
        };

        let mut ensemble = Ensemble {
            id: cfg.ensemble.id,
            ecc: cfg.ensemble.ecc,
            mode: cfg.ensemble.transmission_mode,
            label,
            alarm_flag: false,
            datetime_enabled,
            lto,
            ca: cfg
                .ensemble
                .conditional_access
                .clone()
                .filter(|ca| ca.enabled),
            services,
            subchannels,
            components,
            frequency_information: cfg.ensemble.frequency_information.clone(),
            fingerprint: 0,
            active_announcements: Vec::new(),
        };

        ensemble.fingerprint = ensemble.compute_fingerprint();

        Ok(ensemble)
    }

    fn build_subchannels(cfg: &Config) -> Result<Vec<Subchannel>, ConfigError> {
        let mut subchannels: Vec<Subchannel> = Vec::with_capacity(cfg.subchannels.len());
        let capacity = cfg.ensemble.transmission_mode.capacity_cu();

        for sc in &cfg.subchannels {
            if sc.id > 63 {
                return Err(ConfigError::SubchannelIdRange { id: sc.id });
            }
            if subchannels.iter().any(|s| s.id == sc.id) {
                return Err(ConfigError::DuplicateSubchannelId { id: sc.id });
            }

            let size_cu = tables::size_cu(sc.protection, sc.bitrate).ok_or_else(|| {
                ConfigError::InvalidBitrate {
                    uid: sc.uid.clone(),
                    bitrate: sc.bitrate,
                }
            })?;

            subchannels.push(Subchannel {
                uid: sc.uid.clone(),
                id: sc.id,
                typ: sc.typ,
                bitrate: sc.bitrate,
                protection: sc.protection,
                start_address: sc.start_address.unwrap_or(0),
                size_cu,
                input_uri: sc.input_uri.clone(),
                fec_scheme: sc.fec_scheme,
            });
        }

        Self::assign_start_addresses(&mut subchannels, &cfg.subchannels, capacity)?;

        Ok(subchannels)
    }

    /// Explicitly addressed subchannels keep their slots; the rest are placed
    /// first-fit in configuration order.
    fn assign_start_addresses(
        subchannels: &mut [Subchannel],
        configs: &[SubchannelConfig],
        capacity: u16,
    ) -> Result<(), ConfigError> {
        let mut placed: Vec<(u8, u16, u16)> = Vec::new(); // (id, start, end)

        for (sc, cfg) in subchannels.iter_mut().zip(configs) {
            if let Some(start) = cfg.start_address {
                if start > 1023 {
                    return Err(ConfigError::ValueRange {
                        field: "start_address",
                        value: start as u32,
                    });
                }
                sc.start_address = start;
                placed.push((sc.id, start, start + sc.size_cu));
            }
        }

        for (sc, cfg) in subchannels.iter_mut().zip(configs) {
            if cfg.start_address.is_none() {
                let mut start = 0u16;
                loop {
                    let end = start + sc.size_cu;
                    match placed
                        .iter()
                        .find(|(_, s, e)| start < *e && *s < end)
                        .copied()
                    {
                        Some((_, _, occupied_end)) => start = occupied_end,
                        None => break,
                    }
                }
                sc.start_address = start;
                placed.push((sc.id, start, start + sc.size_cu));
            }
        }

        // overlap + capacity checks over the final layout
        placed.sort_by_key(|(_, start, _)| *start);
        for pair in placed.windows(2) {
            if pair[1].1 < pair[0].2 {
                return Err(ConfigError::CuOverlap {
                    a: pair[0].0,
                    b: pair[1].0,
                });
            }
        }
        if let Some((_, _, end)) = placed.last() {
            if *end > capacity {
                return Err(ConfigError::CapacityExceeded {
                    used: *end as u32,
                    capacity,
                });
            }
        }

        Ok(())
    }

    fn build_services(cfg: &Config) -> Result<Vec<Service>, ConfigError> {
        let mut services: Vec<Service> = Vec::with_capacity(cfg.services.len());

        for sv in &cfg.services {
            if services.iter().any(|s| s.sid == sv.id) {
                return Err(ConfigError::DuplicateServiceId { sid: sv.id });
            }
            if sv.pty > 31 {
                return Err(ConfigError::ValueRange {
                    field: "pty",
                    value: sv.pty as u32,
                });
            }
            if sv.language > 127 {
                return Err(ConfigError::ValueRange {
                    field: "language",
                    value: sv.language as u32,
                });
            }

            let announcements = match &sv.announcements {
                Some(an) => {
                    if an.cluster_id > 7 {
                        return Err(ConfigError::ValueRange {
                            field: "cluster_id",
                            value: an.cluster_id as u32,
                        });
                    }
                    let asu = an.types.iter().fold(0u16, |acc, t| acc | t.flag());
                    Some(AnnouncementSupport {
                        cluster_id: an.cluster_id,
                        asu,
                        subchannel: an.subchannel,
                    })
                }
                None => None,
            };

            services.push(Service {
                uid: sv.uid.clone(),
                sid: sv.id,
                label: Label::from_config(&sv.label)?,
                pty: sv.pty,
                language: sv.language,
                announcements,
                ca_system: sv.ca_system,
                links: sv.service_links.clone(),
                other_ensembles: sv.other_ensembles.clone(),
            });
        }

        Ok(services)
    }

    fn build_components(
        cfg: &Config,
        services: &[Service],
        subchannels: &[Subchannel],
    ) -> Result<Vec<Component>, ConfigError> {
        let mut components: Vec<Component> = Vec::with_capacity(cfg.components.len());
        let mut next_packet_scid: u16 = 0;

        for co in &cfg.components {
            if !services.iter().any(|s| s.sid == co.service_id) {
                return Err(ConfigError::UnknownService {
                    uid: co.uid.clone(),
                    sid: co.service_id,
                });
            }
            if !subchannels.iter().any(|s| s.id == co.subchannel_id) {
                return Err(ConfigError::UnknownSubchannel {
                    uid: co.uid.clone(),
                    id: co.subchannel_id,
                });
            }

            let siblings = components
                .iter()
                .filter(|c: &&Component| c.service_id == co.service_id)
                .count();
            if siblings >= 11 {
                return Err(ConfigError::TooManyComponents {
                    sid: co.service_id,
                    count: siblings + 1,
                });
            }

            // a FIG 0/13 entry must fit a single FIG record
            let sid_len = if co.service_id > 0xFFFF { 4 } else { 2 };
            let ua_bytes: usize = co.ua_types.iter().map(|ua| 2 + ua.data.len()).sum();
            if co.ua_types.len() > 15
                || co.ua_types.iter().any(|ua| ua.data.len() > 23)
                || ua_bytes > 27 - sid_len
            {
                return Err(ConfigError::FigTooLarge {
                    uid: co.uid.clone(),
                });
            }

            let packet = if co.is_packet_mode {
                let pk = co
                    .packet
                    .as_ref()
                    .ok_or_else(|| ConfigError::MissingPacketAddress {
                        uid: co.uid.clone(),
                    })?;
                if pk.address > 1023 {
                    return Err(ConfigError::PacketAddressRange {
                        address: pk.address,
                    });
                }
                let scid = next_packet_scid;
                next_packet_scid += 1;
                Some(PacketState {
                    scid,
                    address: pk.address,
                    datagroups: pk.datagroups,
                    dscty: pk.dscty,
                })
            } else {
                None
            };

            let label = match &co.label {
                Some(l) => Some(Label::from_config(l)?),
                None => None,
            };

            let dynamic_label = co.dynamic_label.as_ref().map(|dl| DynamicLabelState {
                text: dl.text.clone(),
                charset: dl.charset,
                toggle: false,
            });

            components.push(Component {
                uid: co.uid.clone(),
                service_id: co.service_id,
                subchannel_id: co.subchannel_id,
                // the first component of a service is its primary one
                primary: siblings == 0,
                scids: siblings as u8,
                packet,
                ua_types: co.ua_types.clone(),
                label,
                dynamic_label,
            });
        }

        Ok(components)
    }

    pub fn service(&self, sid: u32) -> Option<&Service> {
        self.services.iter().find(|s| s.sid == sid)
    }

    pub fn subchannel(&self, id: u8) -> Option<&Subchannel> {
        self.subchannels.iter().find(|s| s.id == id)
    }

    pub fn component(&self, uid: &str) -> Option<&Component> {
        self.components.iter().find(|c| c.uid == uid)
    }

    /// Components of one service, primary first.
    pub fn service_components(&self, sid: u32) -> Vec<&Component> {
        let mut comps: Vec<&Component> =
            self.components.iter().filter(|c| c.service_id == sid).collect();
        comps.sort_by_key(|c| c.scids);
        comps
    }

    /// Subchannels in SCID order, the order both STC words and MSC payloads
    /// are emitted in.
    pub fn subchannels_by_scid(&self) -> Vec<&Subchannel> {
        let mut subs: Vec<&Subchannel> = self.subchannels.iter().collect();
        subs.sort_by_key(|s| s.id);
        subs
    }

    /// 10-bit fingerprint of the signalled configuration (FIG 0/7).
    fn compute_fingerprint(&self) -> u16 {
        let state = serde_json::json!({
            "id": self.id,
            "label": self.label,
            "services": self.services,
            "subchannels": self.subchannels,
            "components": self.components,
        });
        let bytes = serde_json::to_vec(&state).unwrap_or_default();
        utils::crc16_ccitt(&bytes) & 0x3FF
    }

    /// Recompute the fingerprint after a runtime mutation. Guaranteed to
    /// differ from the previous value even on a CRC collision.
    fn bump_fingerprint(&mut self) {
        let mut next = self.compute_fingerprint();
        if next == self.fingerprint {
            next = (next + 1) & 0x3FF;
        }
        self.fingerprint = next;
    }

    // --- remote-control mutations; callers hold the writer lock ---

    pub fn set_ensemble_label(&mut self, label: Label) {
        self.label = label;
        self.bump_fingerprint();
    }

    pub fn set_service_label(&mut self, sid: u32, label: Label) -> bool {
        let found = match self.services.iter_mut().find(|s| s.sid == sid) {
            Some(service) => {
                service.label = label;
                true
            }
            None => false,
        };
        if found {
            self.bump_fingerprint();
        }
        found
    }

    /// Updates a component's dynamic label; the toggle bit flips exactly
    /// when the text changes.
    pub fn set_dynamic_label(&mut self, component_uid: &str, text: &str, charset: u8) -> bool {
        let found = match self.components.iter_mut().find(|c| c.uid == component_uid) {
            Some(component) => {
                match &mut component.dynamic_label {
                    Some(dl) => {
                        if dl.text != text {
                            dl.toggle = !dl.toggle;
                            dl.text = text.to_string();
                        }
                        dl.charset = charset;
                    }
                    None => {
                        component.dynamic_label = Some(DynamicLabelState {
                            text: text.to_string(),
                            charset,
                            toggle: false,
                        });
                    }
                }
                true
            }
            None => false,
        };
        if found {
            self.bump_fingerprint();
        }
        found
    }

    /// Starts announcement signalling for a service. Returns false when the
    /// service does not exist or does not support announcements.
    pub fn trigger_announcement(
        &mut self,
        sid: u32,
        typ: AnnouncementType,
        subchannel: Option<u8>,
        deadline: Option<Instant>,
    ) -> bool {
        let support = match self.services.iter().find(|s| s.sid == sid) {
            Some(service) => match &service.announcements {
                Some(an) if an.asu & typ.flag() != 0 => an.clone(),
                _ => return false,
            },
            None => return false,
        };

        let target = match subchannel.or(support.subchannel).or_else(|| {
            self.service_components(sid)
                .first()
                .map(|c| c.subchannel_id)
        }) {
            Some(sc) => sc,
            None => return false,
        };

        match self
            .active_announcements
            .iter_mut()
            .find(|a| a.sid == sid)
        {
            Some(active) => {
                active.asw |= typ.flag();
                active.subchannel = target;
                active.deadline = deadline;
            }
            None => self.active_announcements.push(ActiveAnnouncement {
                sid,
                cluster_id: support.cluster_id,
                asw: typ.flag(),
                subchannel: target,
                deadline,
            }),
        }

        self.bump_fingerprint();
        true
    }

    pub fn stop_announcement(&mut self, sid: u32) -> bool {
        let before = self.active_announcements.len();
        self.active_announcements.retain(|a| a.sid != sid);
        let removed = self.active_announcements.len() != before;
        if removed {
            self.bump_fingerprint();
        }
        removed
    }

    /// Clears announcements whose deadline has passed. Returns true when
    /// anything expired.
    pub fn expire_announcements(&mut self, now: Instant) -> bool {
        let before = self.active_announcements.len();
        self.active_announcements
            .retain(|a| a.deadline.map(|d| d > now).unwrap_or(true));
        let expired = self.active_announcements.len() != before;
        if expired {
            self.bump_fingerprint();
        }
        expired
    }

    pub fn has_active_announcements(&self) -> bool {
        !self.active_announcements.is_empty()
    }
}
