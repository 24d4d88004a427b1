//! Configuration records as handed over by an external loader.
//!
//! The core never parses YAML itself; a loader deserializes into these
//! records and `Ensemble::from_config` validates them exhaustively, so the
//! rest of the pipeline never observes partial values.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub ensemble: EnsembleConfig,
    #[serde(default)]
    pub subchannels: Vec<SubchannelConfig>,
    #[serde(default)]
    pub services: Vec<ServiceConfig>,
    #[serde(default)]
    pub components: Vec<ComponentConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnsembleConfig {
    pub id: u16,
    pub ecc: u8,
    pub transmission_mode: TransmissionMode,
    pub label: LabelConfig,
    #[serde(default)]
    pub datetime: Option<DatetimeConfig>,
    #[serde(default)]
    pub conditional_access: Option<CaConfig>,
    #[serde(default)]
    pub edi_output: Option<EdiOutputConfig>,
    #[serde(default)]
    pub frequency_information: Vec<FrequencyInfoConfig>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransmissionMode {
    I,
    II,
    III,
    IV,
}

impl TransmissionMode {
    /// CUs available per 24 ms CIF.
    pub fn capacity_cu(&self) -> u16 {
        864
    }

    /// FIC bytes carried in each ETI frame.
    pub fn fic_len(&self) -> usize {
        match self {
            TransmissionMode::III => 128,
            _ => 96,
        }
    }

    pub fn fib_count(&self) -> usize {
        self.fic_len() / 32
    }

    /// MID field of the ETI FC word.
    pub fn mid(&self) -> u8 {
        match self {
            TransmissionMode::I => 1,
            TransmissionMode::II => 2,
            TransmissionMode::III => 3,
            TransmissionMode::IV => 0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LabelConfig {
    pub text: String,
    /// 16-bit flag field selecting up to 8 characters for the short label.
    /// Derived from the first 8 characters when absent.
    #[serde(default)]
    pub short_mask: Option<u16>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatetimeConfig {
    pub enabled: bool,
    /// Local time offset in half-hours, -12..=12.
    #[serde(default)]
    pub utc_offset: i8,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CaConfig {
    pub enabled: bool,
    #[serde(default)]
    pub systems: Vec<u16>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EdiOutputConfig {
    pub protocol: EdiProtocol,
    /// "host:port"; UDP destinations may be multicast (224.0.0.0/4).
    pub destination: String,
    #[serde(default)]
    pub tcp_mode: TcpMode,
    #[serde(default)]
    pub enable_pft: bool,
    /// 0 disables parity; 1..=5 select the (k, m) policy.
    #[serde(default)]
    pub pft_fec: u8,
    #[serde(default = "default_fragment_size")]
    pub pft_fragment_size: usize,
    #[serde(default)]
    pub enable_tist: bool,
    /// Transmit address carried in addressed PFT headers.
    #[serde(default)]
    pub source_id: Option<u16>,
}

fn default_fragment_size() -> usize {
    1400
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EdiProtocol {
    Udp,
    Tcp,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TcpMode {
    #[default]
    Client,
    Server,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubchannelConfig {
    pub uid: String,
    /// SubChId, 0..=63.
    pub id: u8,
    #[serde(rename = "type")]
    pub typ: SubchannelType,
    /// kbps.
    pub bitrate: u16,
    pub protection: Protection,
    pub input_uri: String,
    /// Explicit start address in CUs; assigned first-fit when absent.
    #[serde(default)]
    pub start_address: Option<u16>,
    #[serde(default)]
    pub fec_scheme: Option<FecScheme>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SubchannelType {
    /// HE-AAC with RS(120,110) applied upstream.
    DabPlus,
    /// MPEG Layer II.
    Audio,
    Packet,
    Data,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Protection {
    #[serde(rename = "EEP_1A")]
    Eep1A,
    #[serde(rename = "EEP_2A")]
    Eep2A,
    #[serde(rename = "EEP_3A")]
    Eep3A,
    #[serde(rename = "EEP_4A")]
    Eep4A,
    #[serde(rename = "EEP_1B")]
    Eep1B,
    #[serde(rename = "EEP_2B")]
    Eep2B,
    #[serde(rename = "EEP_3B")]
    Eep3B,
    #[serde(rename = "EEP_4B")]
    Eep4B,
    #[serde(rename = "UEP_1")]
    Uep1,
    #[serde(rename = "UEP_2")]
    Uep2,
    #[serde(rename = "UEP_3")]
    Uep3,
    #[serde(rename = "UEP_4")]
    Uep4,
    #[serde(rename = "UEP_5")]
    Uep5,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FecScheme {
    /// RS(204,188) applied to the packet stream.
    Rs,
    None,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceConfig {
    pub uid: String,
    /// 16-bit programme or 32-bit data service id.
    pub id: u32,
    pub label: LabelConfig,
    /// Programme type, 0..=31.
    #[serde(default)]
    pub pty: u8,
    /// 0..=127.
    #[serde(default)]
    pub language: u8,
    #[serde(default)]
    pub announcements: Option<AnnouncementConfig>,
    #[serde(default)]
    pub ca_system: Option<u16>,
    #[serde(default)]
    pub service_links: Vec<ServiceLinkConfig>,
    /// Ensemble ids carrying this service elsewhere (FIG 0/24).
    #[serde(default)]
    pub other_ensembles: Vec<u16>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnnouncementConfig {
    /// 0..=7.
    pub cluster_id: u8,
    #[serde(default)]
    pub types: Vec<AnnouncementType>,
    /// Subchannel carrying the announcement audio; defaults to the
    /// service's primary component's subchannel.
    #[serde(default)]
    pub subchannel: Option<u8>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnnouncementType {
    Alarm,
    Traffic,
    Travel,
    Warning,
    News,
    Weather,
    Event,
    Special,
    ProgrammeInfo,
    Sport,
    Financial,
}

impl AnnouncementType {
    /// Bit position inside the ASu/ASw flag fields.
    pub fn flag(&self) -> u16 {
        1 << match self {
            AnnouncementType::Alarm => 0,
            AnnouncementType::Traffic => 1,
            AnnouncementType::Travel => 2,
            AnnouncementType::Warning => 3,
            AnnouncementType::News => 4,
            AnnouncementType::Weather => 5,
            AnnouncementType::Event => 6,
            AnnouncementType::Special => 7,
            AnnouncementType::ProgrammeInfo => 8,
            AnnouncementType::Sport => 9,
            AnnouncementType::Financial => 10,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceLinkConfig {
    /// Linkage Set Number, 12 bits.
    pub lsn: u16,
    #[serde(default)]
    pub active: bool,
    #[serde(default)]
    pub hard: bool,
    #[serde(default)]
    pub international: bool,
    pub kind: LinkKind,
    #[serde(default)]
    pub ids: Vec<u16>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LinkKind {
    Dab,
    Rds,
    Drm,
    Amss,
}

impl LinkKind {
    /// ID List Qualifier.
    pub fn idlq(&self) -> u8 {
        match self {
            LinkKind::Dab => 0,
            LinkKind::Rds => 1,
            LinkKind::Drm => 2,
            LinkKind::Amss => 3,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComponentConfig {
    pub uid: String,
    pub service_id: u32,
    pub subchannel_id: u8,
    #[serde(default)]
    pub is_packet_mode: bool,
    #[serde(default)]
    pub packet: Option<PacketConfig>,
    /// User application declarations signalled via FIG 0/13.
    #[serde(default)]
    pub ua_types: Vec<UserApplicationConfig>,
    #[serde(default)]
    pub label: Option<LabelConfig>,
    #[serde(default)]
    pub dynamic_label: Option<DynamicLabelConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PacketConfig {
    /// Packet address, 0..=1023.
    pub address: u16,
    #[serde(default)]
    pub datagroups: bool,
    /// DSCTy; MOT is 60.
    #[serde(default = "default_dscty")]
    pub dscty: u8,
}

fn default_dscty() -> u8 {
    60
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserApplicationConfig {
    /// User application type, 11 bits (SlideShow 0x002, SPI 0x007, ...).
    #[serde(rename = "type")]
    pub typ: u16,
    #[serde(default)]
    pub data: Vec<u8>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DynamicLabelConfig {
    pub text: String,
    /// 0 = EBU Latin, 6 = UCS-2, 15 = UTF-8.
    #[serde(default)]
    pub charset: u8,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FrequencyInfoConfig {
    /// EId (DAB) or PI code (FM/RDS).
    pub id: u16,
    pub kind: FrequencyKind,
    /// MHz.
    pub frequencies: Vec<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FrequencyKind {
    Dab,
    Fm,
}
