// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! FLUTE and DVB-MABR delivery tests.
//!
//! Covers file naming through the FDT, split objects, carousel repeats and
//! representation switching driven by the gateway configuration.

use std::cell::RefCell;
use std::net::SocketAddrV4;
use std::rc::Rc;

use routedmx::lct::LctPacketBuilder;
use routedmx::signaling::{MIME_DASH, MIME_GATEWAY_CONFIG};
use routedmx::{Demux, DemuxConfig, DemuxEvent, ProcessStatus, Protocol, SimTransport};

#[derive(Debug, Clone, PartialEq)]
enum Seen {
    Manifest { name: String, mime: String },
    File { name: String, data: Vec<u8>, updated: bool },
    Segment { name: String, data: Vec<u8> },
}

type Log = Rc<RefCell<Vec<Seen>>>;

fn endpoint() -> SocketAddrV4 {
    "239.1.1.1:4000".parse().unwrap()
}

fn demux() -> (Demux<SimTransport>, Log) {
    let log: Log = Rc::new(RefCell::new(Vec::new()));
    let sink = log.clone();
    let config = DemuxConfig::single_service(1, Protocol::Flute, endpoint());
    let demux = Demux::with_listener(config, SimTransport::new(), move |event: DemuxEvent<'_>| {
        let seen = match event {
            DemuxEvent::ManifestReady { filename, mime, .. } => Seen::Manifest {
                name: filename.to_string(),
                mime: mime.to_string(),
            },
            DemuxEvent::FileReady { info, .. } => Seen::File {
                name: info.filename.to_string(),
                data: info.blob.to_vec(),
                updated: info.updated,
            },
            DemuxEvent::SegmentReady { info, .. } => Seen::Segment {
                name: info.filename.to_string(),
                data: info.blob.to_vec(),
            },
            _ => return,
        };
        sink.borrow_mut().push(seen);
    })
    .unwrap();
    (demux, log)
}

fn fdt(tsi: u32, instance: u32, files: &str) -> Vec<u8> {
    let table = format!("<FDT-Instance Expires=\"4294967295\">{}</FDT-Instance>", files);
    LctPacketBuilder::flute(tsi, 0)
        .fdt_instance(instance)
        .transfer_length(table.len() as u64)
        .payload(table.as_bytes())
        .build()
}

fn object(tsi: u32, toi: u32, body: &[u8]) -> Vec<u8> {
    LctPacketBuilder::flute(tsi, toi)
        .fti(body.len() as u64, body.len() as u16, 1)
        .payload(body)
        .build()
}

/// Process until no socket has pending datagrams.
fn pump(demux: &mut Demux<SimTransport>) {
    for _ in 0..1000 {
        if demux.process(None).unwrap() == ProcessStatus::Idle {
            return;
        }
    }
    panic!("demux never went idle");
}

fn finish(demux: &mut Demux<SimTransport>) {
    demux.transport_mut().finish();
    for _ in 0..1000 {
        if demux.process(None).unwrap() == ProcessStatus::EndOfStream {
            return;
        }
    }
    panic!("stream did not end");
}

fn file(name: &str, data: &[u8], updated: bool) -> Seen {
    Seen::File {
        name: name.to_string(),
        data: data.to_vec(),
        updated,
    }
}

// ---------------------------------------------------------------------------
// FDT naming
// ---------------------------------------------------------------------------

#[test]
fn test_fdt_names_files_received_before_it() {
    let (mut demux, log) = demux();

    let t = demux.transport_mut();
    t.inject(endpoint(), object(0, 5, b"hello"));
    t.inject(
        endpoint(),
        fdt(
            0,
            1,
            r#"<File TOI="5" Content-Location="hello.txt" Content-Length="5"/>
               <File TOI="6" Content-Location="notes.txt" Content-Length="4"/>
               <File TOI="7" Content-Location="big.bin#offset=0&amp;total=6" Content-Length="3"/>
               <File TOI="8" Content-Location="big.bin#offset=3&amp;total=6" Content-Length="3"/>"#,
        ),
    );
    t.inject(endpoint(), object(0, 6, b"note"));
    t.inject(endpoint(), object(0, 8, b"def"));
    t.inject(endpoint(), object(0, 7, b"abc"));
    finish(&mut demux);

    assert_eq!(
        *log.borrow(),
        vec![
            file("hello.txt", b"hello", false),
            file("notes.txt", b"note", false),
            file("big.bin", b"abcdef", false),
        ]
    );
    let channel = demux.service(1).unwrap().channel(0).unwrap();
    assert_eq!(channel.fdt_files().len(), 2);
}

#[test]
fn test_carousel_repeat_reports_updates() {
    let (mut demux, log) = demux();
    let table = r#"<File TOI="2" Content-Location="epg.xml" Content-Length="4"/>"#;

    let t = demux.transport_mut();
    t.inject(endpoint(), fdt(0, 1, table));
    t.inject(endpoint(), object(0, 2, b"v1v1"));
    t.inject(endpoint(), fdt(0, 1, table));
    t.inject(endpoint(), object(0, 2, b"v1v1"));
    t.inject(endpoint(), object(0, 2, b"v2v2"));
    finish(&mut demux);

    assert_eq!(
        *log.borrow(),
        vec![
            file("epg.xml", b"v1v1", false),
            file("epg.xml", b"v1v1", false),
            file("epg.xml", b"v2v2", true),
        ]
    );
    assert_eq!(demux.live_objects(), 1);
}

// ---------------------------------------------------------------------------
// DVB-MABR gateway configuration
// ---------------------------------------------------------------------------

/// `(port, tsi, adaptation set, representation)` of one transport session.
type SessionSpec = (u16, u32, &'static str, &'static str);

const VIDEO: [SessionSpec; 2] = [(6000, 10, "0", "v1080"), (6002, 11, "0", "v720")];

fn gateway_config(transports: &[SessionSpec]) -> String {
    let sessions: String = transports
        .iter()
        .map(|(port, tsi, set, rep)| {
            format!(
                r#"<MulticastTransportSession>
      <EndpointAddress>
        <NetworkDestinationGroupAddress>239.1.1.1</NetworkDestinationGroupAddress>
        <TransportDestinationPort>{port}</TransportDestinationPort>
        <MediaTransportSessionIdentifier>{tsi}</MediaTransportSessionIdentifier>
      </EndpointAddress>
      <ServiceComponentIdentifier>
        <PeriodIdentifier>p0</PeriodIdentifier>
        <AdaptationSetIdentifier>{set}</AdaptationSetIdentifier>
        <RepresentationIdentifier>{rep}</RepresentationIdentifier>
      </ServiceComponentIdentifier>
    </MulticastTransportSession>"#
            )
        })
        .collect();
    format!(
        r#"<MulticastGatewayConfiguration xmlns="urn:dvb:metadata:MulticastSession:2019">
  <MulticastSession serviceIdentifier="urn:svc:news">
    <PresentationManifestLocator contentType="application/dash+xml">http://cdn/news/manifest.mpd</PresentationManifestLocator>
    {}
  </MulticastSession>
</MulticastGatewayConfiguration>"#,
        sessions
    )
}

fn group(port: u16) -> SocketAddrV4 {
    SocketAddrV4::new([239, 1, 1, 1].into(), port)
}

fn hd() -> SocketAddrV4 {
    group(6000)
}

fn sd() -> SocketAddrV4 {
    group(6002)
}

/// Deliver the gateway configuration and a manifest on the bootstrap TSI.
fn bootstrap(demux: &mut Demux<SimTransport>) {
    announce(demux, 1, &VIDEO);
}

fn announce(demux: &mut Demux<SimTransport>, instance: u32, transports: &[SessionSpec]) {
    let config = gateway_config(transports);
    let manifest = "<MPD/>";
    let table = format!(
        r#"<File TOI="1" Content-Location="gateway.xml" Content-Length="{}" Content-Type="{}"/>
           <File TOI="2" Content-Location="manifest.mpd" Content-Length="{}" Content-Type="{}"/>"#,
        config.len(),
        MIME_GATEWAY_CONFIG,
        manifest.len(),
        MIME_DASH
    );
    let t = demux.transport_mut();
    t.inject(endpoint(), fdt(0, instance, &table));
    t.inject(endpoint(), object(0, 1, config.as_bytes()));
    t.inject(endpoint(), object(0, 2, manifest.as_bytes()));
    pump(demux);
}

fn segments(log: &Log) -> Vec<String> {
    log.borrow()
        .iter()
        .filter_map(|s| match s {
            Seen::Segment { name, .. } => Some(name.clone()),
            _ => None,
        })
        .collect()
}

#[test]
fn test_gateway_config_builds_sessions() {
    let (mut demux, log) = demux();
    bootstrap(&mut demux);

    let svc = demux.service(1).unwrap();
    assert_eq!(svc.manifest_locator(), Some("http://cdn/news/manifest.mpd"));
    let mut tsis: Vec<u32> = svc.channels().map(|c| c.tsi()).collect();
    tsis.sort_unstable();
    assert_eq!(tsis, vec![0, 10, 11]);
    assert!(demux.transport().is_registered(hd()));
    assert!(demux.transport().is_registered(sd()));
    assert_eq!(
        *log.borrow(),
        vec![Seen::Manifest {
            name: "manifest.mpd".to_string(),
            mime: MIME_DASH.to_string()
        }]
    );
}

#[test]
fn test_gateway_config_detected_by_root_element() {
    let (mut demux, _log) = demux();
    let config = gateway_config(&VIDEO);
    let table = format!(
        r#"<File TOI="1" Content-Location="gateway.xml" Content-Length="{}"/>"#,
        config.len()
    );
    let t = demux.transport_mut();
    t.inject(endpoint(), fdt(0, 1, &table));
    t.inject(endpoint(), object(0, 1, config.as_bytes()));
    pump(&mut demux);

    let svc = demux.service(1).unwrap();
    assert!(svc.channel(10).is_some());
    assert!(svc.channel(11).is_some());
    assert!(demux.transport().is_registered(hd()));
}

#[test]
fn test_quality_switch_moves_reception() {
    let (mut demux, log) = demux();
    bootstrap(&mut demux);

    demux
        .mark_active_quality(1, Some("p0"), Some("0"), "v720", true)
        .unwrap();
    assert!(!demux.transport().is_registered(hd()));
    assert!(demux.transport().is_registered(sd()));
    let svc = demux.service(1).unwrap();
    assert!(!svc.channel(10).unwrap().is_active());
    assert!(svc.channel(11).unwrap().is_active());

    let t = demux.transport_mut();
    t.inject(
        sd(),
        fdt(11, 1, r#"<File TOI="1" Content-Location="v720/seg-1.m4s" Content-Length="6"/>"#),
    );
    t.inject(sd(), object(11, 1, b"sdsdsd"));
    t.inject(hd(), object(10, 1, b"hdhdhd"));
    pump(&mut demux);

    assert!(log.borrow().contains(&Seen::Segment {
        name: "v720/seg-1.m4s".to_string(),
        data: b"sdsdsd".to_vec()
    }));
    assert!(!log
        .borrow()
        .iter()
        .any(|s| matches!(s, Seen::Segment { data, .. } if data.as_slice() == b"hdhdhd")));

    demux
        .mark_active_quality(1, None, None, "v1080", true)
        .unwrap();
    assert!(demux.transport().is_registered(hd()));
    assert!(!demux.transport().is_registered(sd()));
    assert!(demux
        .mark_active_quality(1, None, None, "v4k", true)
        .is_err());
}

#[test]
fn test_gateway_update_moves_representation() {
    let (mut demux, log) = demux();
    bootstrap(&mut demux);
    let moved = group(6004);

    announce(&mut demux, 2, &[(6004, 10, "0", "v1080"), VIDEO[1]]);
    assert!(!demux.transport().is_open(hd()));
    assert!(demux.transport().is_registered(moved));
    assert!(demux.transport().is_registered(sd()));

    let t = demux.transport_mut();
    t.inject(
        moved,
        fdt(10, 1, r#"<File TOI="1" Content-Location="v1080/seg-1.m4s" Content-Length="6"/>"#),
    );
    t.inject(moved, object(10, 1, b"hdhdhd"));
    pump(&mut demux);

    assert!(log.borrow().contains(&Seen::Segment {
        name: "v1080/seg-1.m4s".to_string(),
        data: b"hdhdhd".to_vec()
    }));
    let manifests = log
        .borrow()
        .iter()
        .filter(|s| matches!(s, Seen::Manifest { .. }))
        .count();
    assert_eq!(manifests, 1);
}

#[test]
fn test_channel_moved_away_ignored_on_previous_group() {
    let (mut demux, log) = demux();
    let audio: SessionSpec = (6000, 12, "1", "a128");
    announce(&mut demux, 1, &[VIDEO[0], audio]);

    // Video leaves 6000; the audio channel keeps the group joined.
    announce(&mut demux, 2, &[(6004, 10, "0", "v1080"), audio]);
    assert!(demux.transport().is_registered(hd()));
    assert!(demux.transport().is_registered(group(6004)));

    demux.transport_mut().inject(hd(), object(10, 3, b"hdhd"));
    pump(&mut demux);

    let channel = demux.service(1).unwrap().channel(10).unwrap();
    assert_eq!(channel.observed_toi(), Some(3));
    assert_eq!(channel.discarded_packets(), 1);
    assert!(segments(&log).is_empty());

    let t = demux.transport_mut();
    t.inject(
        group(6004),
        fdt(10, 1, r#"<File TOI="3" Content-Location="v1080/seg-3.m4s" Content-Length="4"/>"#),
    );
    t.inject(group(6004), object(10, 3, b"hdhd"));
    pump(&mut demux);
    assert_eq!(segments(&log), vec!["v1080/seg-3.m4s".to_string()]);
}

#[test]
fn test_reactivated_channel_skips_segment_in_flight() {
    let (mut demux, log) = demux();
    announce(&mut demux, 1, &[(6000, 10, "0", "v1080"), (6000, 11, "0", "v720")]);

    demux
        .mark_active_quality(1, None, None, "v720", true)
        .unwrap();
    // The group stays joined for v720, so v1080 datagrams are still read.
    assert!(demux.transport().is_registered(hd()));

    let head = LctPacketBuilder::flute(10, 5)
        .fti(8, 4, 2)
        .block(0, 0)
        .payload(b"abcd")
        .build();
    demux.transport_mut().inject(hd(), head);
    pump(&mut demux);
    let channel = demux.service(1).unwrap().channel(10).unwrap();
    assert!(!channel.is_active());
    assert_eq!(channel.observed_toi(), Some(5));
    assert_eq!(channel.discarded_packets(), 1);

    demux
        .mark_active_quality(1, None, None, "v1080", true)
        .unwrap();
    let tail = LctPacketBuilder::flute(10, 5)
        .fti(8, 4, 2)
        .block(0, 1)
        .payload(b"efgh")
        .build();
    let t = demux.transport_mut();
    t.inject(
        hd(),
        fdt(
            10,
            1,
            r#"<File TOI="5" Content-Location="v1080/seg-5.m4s" Content-Length="8"/>
               <File TOI="6" Content-Location="v1080/seg-6.m4s" Content-Length="4"/>"#,
        ),
    );
    t.inject(hd(), tail);
    t.inject(hd(), object(10, 6, b"next"));
    finish(&mut demux);

    assert_eq!(segments(&log), vec!["v1080/seg-6.m4s".to_string()]);
    let channel = demux.service(1).unwrap().channel(10).unwrap();
    assert_eq!(channel.discarded_packets(), 2);
}
