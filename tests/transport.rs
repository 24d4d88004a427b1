//! EDI transport behaviour over real sockets on the loopback interface.

mod common;

use std::io::Read;
use std::net::{Shutdown, TcpListener, TcpStream};
use std::thread;
use std::time::Duration;

use common::*;
use leith::config::{EdiOutputConfig, EdiProtocol, TcpMode};
use leith::Mux;

fn edi_tcp_server(port: u16) -> EdiOutputConfig {
    EdiOutputConfig {
        protocol: EdiProtocol::Tcp,
        destination: format!("127.0.0.1:{port}"),
        tcp_mode: TcpMode::Server,
        enable_pft: false,
        pft_fec: 0,
        pft_fragment_size: 1400,
        enable_tist: false,
        source_id: None,
    }
}

/// Reads exactly `count` AF packets off a TCP stream, using the AF header
/// as the frame marker.
fn read_af_packets(stream: &mut TcpStream, count: usize) -> Vec<Vec<u8>> {
    let mut packets = Vec::with_capacity(count);

    for _ in 0..count {
        let mut header = [0u8; 10];
        stream.read_exact(&mut header).unwrap();
        assert_eq!(&header[..2], b"AF");
        let len = u32::from_be_bytes([header[2], header[3], header[4], header[5]]) as usize;

        let mut rest = vec![0u8; len + 4]; // payload + CRC
        stream.read_exact(&mut rest).unwrap();

        let mut packet = header.to_vec();
        packet.extend_from_slice(&rest);
        packets.push(packet);
    }

    packets
}

fn af_seq(packet: &[u8]) -> u16 {
    u16::from_be_bytes([packet[6], packet[7]])
}

#[test]
fn tcp_server_broadcasts_to_every_client() {
    let _ = env_logger::builder().is_test(true).try_init();

    let port = 19473;
    let mut cfg = base_config(0xE001, "Broadcast");
    cfg.ensemble.edi_output = Some(edi_tcp_server(port));

    let mut mux = Mux::from_config(&cfg).unwrap();
    thread::sleep(Duration::from_millis(50)); // accept thread settling

    let mut c1 = TcpStream::connect(("127.0.0.1", port)).unwrap();
    let mut c2 = TcpStream::connect(("127.0.0.1", port)).unwrap();
    let mut c3 = TcpStream::connect(("127.0.0.1", port)).unwrap();
    thread::sleep(Duration::from_millis(50));

    for _ in 0..10 {
        mux.produce_frame().unwrap();
    }

    for client in [&mut c1, &mut c2, &mut c3] {
        let packets = read_af_packets(client, 10);
        for (i, p) in packets.iter().enumerate() {
            assert_eq!(af_seq(p) as usize, i);
        }
    }

    // kill the second client; the other two keep receiving in order
    c2.shutdown(Shutdown::Both).unwrap();
    drop(c2);
    thread::sleep(Duration::from_millis(50));

    for _ in 0..10 {
        mux.produce_frame().unwrap();
    }

    for client in [&mut c1, &mut c3] {
        let packets = read_af_packets(client, 10);
        for (i, p) in packets.iter().enumerate() {
            assert_eq!(af_seq(p) as usize, 10 + i);
        }
    }
}

#[test]
fn tcp_client_connects_and_delivers() {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();

    let accept = thread::spawn(move || {
        let (mut stream, _) = listener.accept().unwrap();
        read_af_packets(&mut stream, 5)
    });

    let mut cfg = base_config(0xE002, "Client");
    cfg.ensemble.edi_output = Some(EdiOutputConfig {
        protocol: EdiProtocol::Tcp,
        destination: format!("127.0.0.1:{port}"),
        tcp_mode: TcpMode::Client,
        enable_pft: false,
        pft_fec: 0,
        pft_fragment_size: 1400,
        enable_tist: false,
        source_id: None,
    });

    let mut mux = Mux::from_config(&cfg).unwrap();
    thread::sleep(Duration::from_millis(100)); // connector thread dial

    for _ in 0..5 {
        mux.produce_frame().unwrap();
    }

    let packets = accept.join().unwrap();
    assert_eq!(packets.len(), 5);
    for (i, p) in packets.iter().enumerate() {
        assert_eq!(af_seq(p) as usize, i);
    }
}

#[test]
fn udp_destination_receives_fragments() {
    let receiver = std::net::UdpSocket::bind("127.0.0.1:0").unwrap();
    let port = receiver.local_addr().unwrap().port();
    receiver
        .set_read_timeout(Some(Duration::from_millis(500)))
        .unwrap();

    let mut cfg = base_config(0xE003, "Datagram");
    cfg.ensemble.edi_output = Some(EdiOutputConfig {
        protocol: EdiProtocol::Udp,
        destination: format!("127.0.0.1:{port}"),
        tcp_mode: TcpMode::Client,
        enable_pft: true,
        pft_fec: 1,
        pft_fragment_size: 1400,
        enable_tist: false,
        source_id: None,
    });

    let mut mux = Mux::from_config(&cfg).unwrap();
    mux.produce_frame().unwrap();

    // level 1: 6 data + 3 parity fragments for the one AF packet
    let mut buf = [0u8; 2048];
    for _ in 0..9 {
        let (n, _) = receiver.recv_from(&mut buf).unwrap();
        assert_eq!(&buf[..2], b"PF");
        assert!(n <= 1400);
    }
}
