//! Carousel behaviour observed through produced frames: configuration
//! fingerprints, dynamic labels, announcement switching.

mod common;

use common::*;
use leith::config::{AnnouncementConfig, AnnouncementType, DynamicLabelConfig};
use leith::Mux;

fn fingerprint_of(fig: &Fig) -> u16 {
    (((fig.data[1] & 0x03) as u16) << 8) | fig.data[2] as u16
}

#[test]
fn fig0_7_is_stable_until_mutation() {
    let mut cfg = base_config(0xD111, "Fingerprint");
    cfg.subchannels = vec![dabplus_subchannel("sub", 0, 48)];
    cfg.services = vec![service("srv", 0x5001, "First")];
    cfg.components = vec![component("comp", 0x5001, 0)];

    let mut mux = Mux::from_config(&cfg).unwrap();
    let rc = mux.rc_handle();

    // class B: one emission per 40-frame period
    let mut values = Vec::new();
    for _ in 0..85 {
        let frame = mux.produce_frame().unwrap();
        values.extend(find_figs(&frame, 0, 7).iter().map(fingerprint_of));
    }
    assert!(values.len() >= 2);
    let c0 = values[0];
    assert!(values.iter().all(|&v| v == c0));

    // mutation: re-emitted promptly, with a different 10-bit value
    rc.set_service_label(0x5001, "Second", None).unwrap();
    let frame = mux.produce_frame().unwrap();
    let after = find_figs(&frame, 0, 7);
    assert_eq!(after.len(), 1);
    assert_ne!(fingerprint_of(&after[0]), c0);
}

#[test]
fn dynamic_label_toggle_follows_text_changes() {
    let mut cfg = base_config(0xD112, "Dynamic");
    cfg.subchannels = vec![dabplus_subchannel("sub", 0, 48)];
    cfg.services = vec![service("srv", 0x5001, "Radio")];
    cfg.components = vec![{
        let mut c = component("comp", 0x5001, 0);
        c.dynamic_label = Some(DynamicLabelConfig {
            text: "ABC".into(),
            charset: 0,
        });
        c
    }];

    let mut mux = Mux::from_config(&cfg).unwrap();
    let rc = mux.rc_handle();

    let next_dl = |mux: &mut Mux| -> Fig {
        for _ in 0..10 {
            let frame = mux.produce_frame().unwrap();
            let figs = find_figs(&frame, 2, 1);
            if !figs.is_empty() {
                return figs[0].clone();
            }
        }
        panic!("no FIG 2/1 within 10 frames");
    };

    let dl = next_dl(&mut mux);
    assert_eq!(dl.data[0] & 0x08, 0); // toggle 0
    assert_eq!(&dl.data[1..3], &0x5001u16.to_be_bytes());
    assert_eq!(dl.data[3], 0xC0); // first and last segment
    assert_eq!(&dl.data[4..], b"ABC");

    rc.set_dynamic_label("comp", "DEF", 0);
    let dl = next_dl(&mut mux);
    assert_eq!(dl.data[0] & 0x08, 0x08); // toggle 1
    assert_eq!(&dl.data[4..], b"DEF");

    rc.set_dynamic_label("comp", "ABC", 0);
    let dl = next_dl(&mut mux);
    assert_eq!(dl.data[0] & 0x08, 0);
    assert_eq!(&dl.data[4..], b"ABC");
}

#[test]
fn long_dynamic_label_is_segmented() {
    let text = "Now playing: a considerably longer programme title";
    let mut cfg = base_config(0xD113, "Dynamic");
    cfg.subchannels = vec![dabplus_subchannel("sub", 0, 48)];
    cfg.services = vec![service("srv", 0x5001, "Radio")];
    cfg.components = vec![{
        let mut c = component("comp", 0x5001, 0);
        c.dynamic_label = Some(DynamicLabelConfig {
            text: text.into(),
            charset: 0,
        });
        c
    }];

    let mut mux = Mux::from_config(&cfg).unwrap();

    let mut segments: Vec<(u8, Vec<u8>)> = Vec::new();
    for _ in 0..40 {
        let frame = mux.produce_frame().unwrap();
        for fig in find_figs(&frame, 2, 1) {
            segments.push((fig.data[3], fig.data[4..].to_vec()));
        }
        let want = text.len().div_ceil(16);
        if segments.len() >= want {
            break;
        }
    }

    // first flag on segment 0, last flag on the final one, text reassembles
    assert_eq!(segments[0].0 & 0x80, 0x80);
    let reassembled: Vec<u8> = segments
        .iter()
        .take(text.len().div_ceil(16))
        .flat_map(|(_, s)| s.clone())
        .collect();
    assert_eq!(&reassembled, text.as_bytes());
    let last = &segments[text.len().div_ceil(16) - 1];
    assert_eq!(last.0 & 0x40, 0x40);
}

#[test]
fn announcement_switching_lifecycle() {
    let mut cfg = base_config(0xD114, "Announce");
    cfg.subchannels = vec![
        dabplus_subchannel("sub-main", 0, 48),
        dabplus_subchannel("sub-emergency", 2, 48),
    ];
    cfg.services = vec![{
        let mut s = service("srv", 0x5001, "Alarmed");
        s.announcements = Some(AnnouncementConfig {
            cluster_id: 0,
            types: vec![AnnouncementType::Alarm],
            subchannel: None,
        });
        s
    }];
    cfg.components = vec![component("comp", 0x5001, 0)];

    let mut mux = Mux::from_config(&cfg).unwrap();
    let rc = mux.rc_handle();

    // dormant: the switching FIG stays silent
    for _ in 0..6 {
        let frame = mux.produce_frame().unwrap();
        assert!(find_figs(&frame, 0, 19).is_empty());
    }

    // ASu support is signalled regardless
    let mut mux2 = Mux::from_config(&cfg).unwrap();
    let mut saw_support = false;
    for _ in 0..4 {
        let frame = mux2.produce_frame().unwrap();
        for fig in find_figs(&frame, 0, 18) {
            assert_eq!(&fig.data[1..3], &0x5001u16.to_be_bytes());
            assert_eq!(u16::from_be_bytes([fig.data[3], fig.data[4]]), 0x0001);
            saw_support = true;
        }
    }
    assert!(saw_support);

    // trigger: FIG 0/19 on every following frame, ASw = ALARM, target
    // subchannel 2
    assert!(rc.trigger_announcement(0x5001, AnnouncementType::Alarm, Some(2), None));
    for _ in 0..3 {
        let frame = mux.produce_frame().unwrap();
        let figs = find_figs(&frame, 0, 19);
        assert_eq!(figs.len(), 1);
        let fig = &figs[0];
        assert_eq!(fig.data[1], 0); // cluster
        assert_eq!(u16::from_be_bytes([fig.data[2], fig.data[3]]), 0x0001);
        assert_eq!(fig.data[4] & 0x3F, 2);
    }

    // stop: gone within two frames
    assert!(rc.stop_announcement(0x5001));
    mux.produce_frame().unwrap();
    let frame = mux.produce_frame().unwrap();
    assert!(find_figs(&frame, 0, 19).is_empty());
}

#[test]
fn announcement_timeout_expires() {
    let mut cfg = base_config(0xD115, "Announce");
    cfg.subchannels = vec![dabplus_subchannel("sub", 0, 48)];
    cfg.services = vec![{
        let mut s = service("srv", 0x5001, "Alarmed");
        s.announcements = Some(AnnouncementConfig {
            cluster_id: 0,
            types: vec![AnnouncementType::Alarm],
            subchannel: Some(0),
        });
        s
    }];
    cfg.components = vec![component("comp", 0x5001, 0)];

    let mut mux = Mux::from_config(&cfg).unwrap();
    let rc = mux.rc_handle();

    assert!(rc.trigger_announcement(
        0x5001,
        AnnouncementType::Alarm,
        None,
        Some(std::time::Duration::from_millis(30)),
    ));
    let frame = mux.produce_frame().unwrap();
    assert_eq!(find_figs(&frame, 0, 19).len(), 1);

    std::thread::sleep(std::time::Duration::from_millis(60));
    let frame = mux.produce_frame().unwrap();
    assert!(find_figs(&frame, 0, 19).is_empty());
}

#[test]
fn unsupported_announcement_type_is_refused() {
    let mut cfg = base_config(0xD116, "Announce");
    cfg.subchannels = vec![dabplus_subchannel("sub", 0, 48)];
    cfg.services = vec![{
        let mut s = service("srv", 0x5001, "NewsOnly");
        s.announcements = Some(AnnouncementConfig {
            cluster_id: 1,
            types: vec![AnnouncementType::News],
            subchannel: Some(0),
        });
        s
    }];
    cfg.components = vec![component("comp", 0x5001, 0)];

    let mux = Mux::from_config(&cfg).unwrap();
    let rc = mux.rc_handle();

    assert!(!rc.trigger_announcement(0x5001, AnnouncementType::Alarm, None, None));
    assert!(!rc.trigger_announcement(0x9999, AnnouncementType::News, None, None));
}
