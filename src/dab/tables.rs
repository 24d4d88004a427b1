//! Protection profile tables and the EBU Latin character set.

use crate::config::Protection;

pub const UEP_SIZES: [u16; 64] = [
    16, 21, 24, 29, 35, 24, 29, 35, 42, 52, 29, 35, 42, 52, 32, 42, 48, 58, 70, 40, 52, 58, 70, 84,
    48, 58, 70, 84, 104, 58, 70, 84, 104, 64, 84, 96, 116, 140, 80, 104, 116, 140, 168, 96, 116,
    140, 168, 208, 116, 140, 168, 208, 232, 128, 168, 192, 232, 280, 160, 208, 280, 192, 280, 416,
];

pub const UEP_PLS: [u8; 64] = [
    5, 4, 3, 2, 1, 5, 4, 3, 2, 1, 5, 4, 3, 2, 5, 4, 3, 2, 1, 5, 4, 3, 2, 1, 5, 4, 3, 2, 1, 5, 4, 3,
    2, 5, 4, 3, 2, 1, 5, 4, 3, 2, 1, 5, 4, 3, 2, 1, 5, 4, 3, 2, 1, 5, 4, 3, 2, 1, 5, 4, 2, 5, 3, 1,
];

pub const UEP_BITRATES: [u16; 64] = [
    32, 32, 32, 32, 32, 48, 48, 48, 48, 48, 56, 56, 56, 56, 64, 64, 64, 64, 64, 80, 80, 80, 80, 80,
    96, 96, 96, 96, 96, 112, 112, 112, 112, 128, 128, 128, 128, 128, 160, 160, 160, 160, 160, 192,
    192, 192, 192, 192, 224, 224, 224, 224, 224, 256, 256, 256, 256, 256, 320, 320, 320, 384, 384,
    384,
];

/// CU per (kbps / 8) for EEP set A, levels 1..=4.
pub const EEP_A_SIZE_FACTORS: [u16; 4] = [12, 8, 6, 4];

/// CU per (kbps / 32) for EEP set B, levels 1..=4.
pub const EEP_B_SIZE_FACTORS: [u16; 4] = [27, 21, 18, 15];

impl Protection {
    pub fn is_eep(&self) -> bool {
        !matches!(
            self,
            Protection::Uep1
                | Protection::Uep2
                | Protection::Uep3
                | Protection::Uep4
                | Protection::Uep5
        )
    }

    /// EEP level 1..=4 and set-B flag; None for UEP.
    pub fn eep_level_option(&self) -> Option<(u8, bool)> {
        match self {
            Protection::Eep1A => Some((1, false)),
            Protection::Eep2A => Some((2, false)),
            Protection::Eep3A => Some((3, false)),
            Protection::Eep4A => Some((4, false)),
            Protection::Eep1B => Some((1, true)),
            Protection::Eep2B => Some((2, true)),
            Protection::Eep3B => Some((3, true)),
            Protection::Eep4B => Some((4, true)),
            _ => None,
        }
    }

    /// UEP protection level 1..=5; None for EEP.
    pub fn uep_level(&self) -> Option<u8> {
        match self {
            Protection::Uep1 => Some(1),
            Protection::Uep2 => Some(2),
            Protection::Uep3 => Some(3),
            Protection::Uep4 => Some(4),
            Protection::Uep5 => Some(5),
            _ => None,
        }
    }
}

/// UEP table index for a bitrate / protection level pair.
pub fn uep_table_index(bitrate: u16, level: u8) -> Option<u8> {
    (0..64).find(|&i| UEP_BITRATES[i] == bitrate && UEP_PLS[i] == level).map(|i| i as u8)
}

/// Sub-channel size in CUs, or None when the bitrate does not exist for the
/// profile (EEP-A needs multiples of 8 kbps, EEP-B multiples of 32 kbps).
pub fn size_cu(protection: Protection, bitrate: u16) -> Option<u16> {
    if let Some((level, set_b)) = protection.eep_level_option() {
        let li = (level - 1) as usize;
        if set_b {
            if bitrate == 0 || bitrate % 32 != 0 {
                return None;
            }
            Some(EEP_B_SIZE_FACTORS[li] * (bitrate / 32))
        } else {
            if bitrate == 0 || bitrate % 8 != 0 {
                return None;
            }
            Some(EEP_A_SIZE_FACTORS[li] * (bitrate / 8))
        }
    } else {
        let level = protection.uep_level()?;
        uep_table_index(bitrate, level).map(|i| UEP_SIZES[i as usize])
    }
}

/// Protection-Level / Type identifier carried in the ETI STC word.
pub fn tpl(protection: Protection, bitrate: u16) -> Option<u8> {
    if let Some((level, set_b)) = protection.eep_level_option() {
        let option = if set_b { 1 } else { 0 };
        Some(0b10_0000 | (option << 2) | (level - 1))
    } else {
        let level = protection.uep_level()?;
        uep_table_index(bitrate, level).map(|i| 0b01_0000 | i)
    }
}

/// One code unit of the EBU Latin based repertoire (ETSI TS 101 756).
///
/// ASCII is identity apart from a few repertoire holes; the common western
/// european accented characters get their dedicated slots, everything else
/// degrades to space.
pub fn ebu_latin(c: char) -> u8 {
    match c {
        ' '..='~' => c as u8,
        'Ä' => 0xC4,
        'Å' => 0xC5,
        'Æ' => 0xC6,
        'Ç' => 0xC7,
        'É' => 0xC9,
        'Ñ' => 0xD1,
        'Ö' => 0xD6,
        'Ø' => 0xD8,
        'Ü' => 0xDC,
        'ß' => 0xDF,
        'à' => 0xE0,
        'ä' => 0xE4,
        'å' => 0xE5,
        'æ' => 0xE6,
        'ç' => 0xE7,
        'è' => 0xE8,
        'é' => 0xE9,
        'ê' => 0xEA,
        'ë' => 0xEB,
        'ì' => 0xEC,
        'í' => 0xED,
        'î' => 0xEE,
        'ï' => 0xEF,
        'ñ' => 0xF1,
        'ò' => 0xF2,
        'ó' => 0xF3,
        'ô' => 0xF4,
        'ö' => 0xF6,
        'ø' => 0xF8,
        'ù' => 0xF9,
        'ú' => 0xFA,
        'û' => 0xFB,
        'ü' => 0xFC,
        _ => 0x20,
    }
}

/// A label body: 16 EBU Latin code units, space padded.
pub fn label_bytes(text: &str) -> [u8; 16] {
    let mut out = [0x20u8; 16];
    for (slot, c) in out.iter_mut().zip(text.chars()) {
        *slot = ebu_latin(c);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn eep_sizes() {
        assert_eq!(size_cu(Protection::Eep3A, 48), Some(36));
        assert_eq!(size_cu(Protection::Eep1A, 32), Some(48));
        assert_eq!(size_cu(Protection::Eep4B, 64), Some(30));
        // off-grid bitrates are rejected
        assert_eq!(size_cu(Protection::Eep3A, 49), None);
        assert_eq!(size_cu(Protection::Eep3B, 48), None);
    }

    #[test]
    fn uep_lookup() {
        // 128 kbps PL3 is the classic radio profile: 96 CU, table index 35
        assert_eq!(uep_table_index(128, 3), Some(35));
        assert_eq!(size_cu(Protection::Uep3, 128), Some(96));
        assert_eq!(size_cu(Protection::Uep1, 56), None);
    }

    #[test]
    fn tpl_values() {
        assert_eq!(tpl(Protection::Eep3A, 48), Some(0x22));
        assert_eq!(tpl(Protection::Eep1B, 32), Some(0x24));
        assert_eq!(tpl(Protection::Uep3, 128), Some(0b01_0000 | 35));
    }

    #[test]
    fn labels_pad_with_space() {
        assert_eq!(&label_bytes("Rock")[..6], b"Rock  ");
        assert_eq!(label_bytes("Kungsälv")[5], 0xE4);
    }
}
