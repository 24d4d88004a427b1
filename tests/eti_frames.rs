//! Wire-level invariants of produced ETI-NI frames.

mod common;

use common::*;
use leith::outputs::{EtiFileSink, EtiFraming};
use leith::utils;
use leith::Mux;

#[test]
fn empty_minimal_ensemble_first_frame() {
    let cfg = base_config(0xCE15, "Test Ensemble");
    let mut mux = Mux::from_config(&cfg).unwrap();

    let frame = mux.produce_frame().unwrap();

    assert_eq!(frame.len(), 6144);
    assert_eq!(&frame[1..4], &[0x07, 0x3A, 0xB6]);

    // NST 0, FICF set
    assert_eq!(frame[5] & 0x7F, 0);
    assert_eq!(frame[5] & 0x80, 0x80);

    // FL = STC(0) + EOH(1) + FIC(24) + MSC(0) + EOF(1)
    let fl = ((frame[6] as usize & 0x07) << 8) | frame[7] as usize;
    assert_eq!(fl, 26);

    // EOH CRC over FC (no STC words)
    assert_eq!(
        u16::from_be_bytes([frame[10], frame[11]]),
        utils::crc16_ccitt(&frame[4..8])
    );

    // EOF CRC over the empty MSC, then RFU
    let eof = 12 + 96;
    assert_eq!(
        u16::from_be_bytes([frame[eof], frame[eof + 1]]),
        utils::crc16_ccitt(&[])
    );
    assert_eq!(&frame[eof + 2..eof + 4], &[0xFF, 0xFF]);

    // 0x55 padding to the end
    assert!(frame[eof + 4..].iter().all(|&b| b == 0x55));
}

#[test]
fn fsync_alternates_bitwise() {
    let cfg = base_config(0xCE15, "Test Ensemble");
    let mut mux = Mux::from_config(&cfg).unwrap();

    let mut prev: Option<u32> = None;
    for _ in 0..20 {
        let frame = mux.produce_frame().unwrap();
        let fsync = u32::from_be_bytes([0, frame[1], frame[2], frame[3]]);
        if let Some(prev) = prev {
            assert_eq!(fsync, !prev & 0xFF_FF_FF);
        }
        prev = Some(fsync);
    }
}

#[test]
fn every_fib_is_crc_protected() {
    let cfg = base_config(0xCE15, "Test Ensemble");
    let mut mux = Mux::from_config(&cfg).unwrap();

    for _ in 0..50 {
        let frame = mux.produce_frame().unwrap();
        // figs_of asserts every FIB CRC
        let figs = figs_of(fic_of(&frame));
        assert!(!figs.is_empty());
    }
}

#[test]
fn single_dabplus_service_frame_layout() {
    let mut cfg = base_config(0x8FFF, "Leith DAB");
    cfg.subchannels = vec![dabplus_subchannel("sub-audio", 0, 48)];
    cfg.services = vec![service("srv-audio", 0x5111, "Audio One")];
    cfg.components = vec![component("comp-audio", 0x5111, 0)];

    let mut mux = Mux::from_config(&cfg).unwrap();
    let frame = mux.produce_frame().unwrap();

    // one subchannel: 48 kbps EEP-3A occupies 36 CU
    assert_eq!(frame[5] & 0x7F, 1);

    let stc = u32::from_be_bytes([frame[8], frame[9], frame[10], frame[11]]);
    let scid = (stc >> 26) & 0x3F;
    let sad = (stc >> 16) & 0x3FF;
    let tpl = (stc >> 10) & 0x3F;
    let stl = stc & 0x3FF;
    assert_eq!(scid, 0);
    assert_eq!(sad, 0);
    assert_eq!(tpl, 0x22); // EEP-3A
    assert_eq!(stl, 36);

    // FL covers 1 STC word + EOH + FIC + 288-byte MSC + EOF
    let fl = ((frame[6] as usize & 0x07) << 8) | frame[7] as usize;
    assert_eq!(fl, 1 + 1 + 24 + 72 + 1);

    // EOH CRC now covers FC + STC
    assert_eq!(
        u16::from_be_bytes([frame[14], frame[15]]),
        utils::crc16_ccitt(&frame[4..12])
    );

    // EOF CRC over the MSC
    let msc_start = 16 + 96;
    let msc_end = msc_start + 288;
    assert_eq!(
        u16::from_be_bytes([frame[msc_end], frame[msc_end + 1]]),
        utils::crc16_ccitt(&frame[msc_start..msc_end])
    );
}

#[test]
fn thousand_frames_to_raw_sink() {
    let mut cfg = base_config(0x8FFF, "Leith DAB");
    cfg.subchannels = vec![dabplus_subchannel("sub-audio", 0, 48)];
    cfg.services = vec![service("srv-audio", 0x5111, "Audio One")];
    cfg.components = vec![component("comp-audio", 0x5111, 0)];

    let path = std::env::temp_dir().join("leith_thousand_frames.eti");
    let mut mux = Mux::from_config(&cfg).unwrap();
    mux.add_eti_sink(EtiFileSink::create(&path, EtiFraming::Raw).unwrap());

    for _ in 0..1000 {
        mux.produce_frame().unwrap();
    }

    assert_eq!(std::fs::metadata(&path).unwrap().len(), 1000 * 6144);
    std::fs::remove_file(&path).ok();
}

#[test]
fn subchannel_organisation_is_signalled() {
    let mut cfg = base_config(0x8FFF, "Leith DAB");
    cfg.subchannels = vec![dabplus_subchannel("sub-audio", 0, 48)];
    cfg.services = vec![service("srv-audio", 0x5111, "Audio One")];
    cfg.components = vec![component("comp-audio", 0x5111, 0)];

    let mut mux = Mux::from_config(&cfg).unwrap();

    // a full carousel pass spreads across a few frames
    let mut figs = Vec::new();
    let mut labels = Vec::new();
    for _ in 0..4 {
        let frame = mux.produce_frame().unwrap();
        figs.extend(find_figs(&frame, 0, 1));
        labels.extend(find_figs(&frame, 1, 0));
    }

    // second byte, then one long-form entry: id 0, start 0, EEP-3A, 36 CU
    assert!(!figs.is_empty());
    assert_eq!(&figs[0].data[1..], &[0x00, 0x00, 0x88, 36]);

    // the ensemble label rides in FIG 1/0
    assert!(!labels.is_empty());
    assert_eq!(&labels[0].data[1..3], &0x8FFFu16.to_be_bytes());
    assert_eq!(&labels[0].data[3..12], b"Leith DAB");
}
