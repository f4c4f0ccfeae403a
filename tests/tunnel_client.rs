//! Integration tests for the threaded tunnel client, run against an
//! in-process simulated gateway on loopback.

mod common;

use std::net::{Ipv4Addr, SocketAddrV4};
use std::sync::mpsc;

use knx_tunnel::addressing::IndividualAddress;
use knx_tunnel::ga;
use knx_tunnel::protocol::cemi::{CemiFrame, Operation};
use knx_tunnel::protocol::constants::{CemiMessageCode, ErrorCode};
use knx_tunnel::tunnel::{TunnelClient, TunnelEvent};

use common::{
    init_logging, next_frame, test_config, wait_for, SimulatedGateway, ASSIGNED_KNX_ADDRESS,
    DEADLINE,
};

#[test]
fn test_connects_and_reports_assigned_address() {
    init_logging();
    let gateway = SimulatedGateway::start();
    let (events, bus) = mpsc::channel();
    let client =
        TunnelClient::new(test_config(gateway.addr()), events).expect("Failed to create client");
    assert!(!client.is_connected());

    client.start().expect("Failed to start client");
    assert!(matches!(
        bus.recv_timeout(DEADLINE),
        Ok(TunnelEvent::Reconnected)
    ));
    assert!(client.is_connected());
    assert_eq!(
        client.knx_address(),
        IndividualAddress::from(ASSIGNED_KNX_ADDRESS)
    );
    assert_eq!(gateway.tunnel_connects(), 1);
    client.stop();
}

#[test]
fn test_send_frame_stamps_source_and_completes() {
    init_logging();
    let gateway = SimulatedGateway::start();
    let (events, _bus) = mpsc::channel();
    let client =
        TunnelClient::new(test_config(gateway.addr()), events).expect("Failed to create client");
    client.start().expect("Failed to start client");
    assert!(wait_for(DEADLINE, || client.is_connected()));

    let frame = CemiFrame::group_value_write(IndividualAddress::from(0), ga!(1 / 2 / 3), &[0x01])
        .expect("Failed to build frame");
    client.send_frame(&frame).expect("send_frame failed");

    let received = gateway.received();
    assert_eq!(received.len(), 1);
    let (sequence, cemi) = &received[0];
    assert_eq!(*sequence, 0);
    assert_eq!(cemi[0], CemiMessageCode::LDataReq.to_u8());

    let sent = CemiFrame::parse(cemi).expect("Failed to parse forwarded frame");
    assert_eq!(sent.source(), IndividualAddress::from(ASSIGNED_KNX_ADDRESS));
    assert_eq!(sent.destination(), ga!(1 / 2 / 3));
    assert_eq!(sent.payload(), &[0x01]);

    // The confirmation echo was acknowledged in turn
    assert!(wait_for(DEADLINE, || gateway.client_acks() >= 1));
    client.stop();
}

#[test]
fn test_send_frame_reports_negative_ack() {
    init_logging();
    let gateway = SimulatedGateway::start();
    let (events, _bus) = mpsc::channel();
    let client =
        TunnelClient::new(test_config(gateway.addr()), events).expect("Failed to create client");
    client.start().expect("Failed to start client");
    assert!(wait_for(DEADLINE, || client.is_connected()));

    gateway.set_ack_status(ErrorCode::DataConnection);
    let frame = CemiFrame::group_value_write(IndividualAddress::from(0), ga!(1 / 2 / 3), &[0x01])
        .expect("Failed to build frame");
    let err = client
        .send_frame(&frame)
        .expect_err("negative ack must fail the send");
    assert_eq!(err.gateway_status(), Some(ErrorCode::DataConnection));

    // A rejected request does not tear the connection down
    assert!(client.is_connected());
    client.stop();
}

#[test]
fn test_missing_ack_times_out_and_reconnects() {
    init_logging();
    let gateway = SimulatedGateway::start();
    let (events, _bus) = mpsc::channel();
    let client =
        TunnelClient::new(test_config(gateway.addr()), events).expect("Failed to create client");
    client.start().expect("Failed to start client");
    assert!(wait_for(DEADLINE, || client.is_connected()));

    gateway.set_drop_tunneling(true);
    let frame = CemiFrame::group_value_write(IndividualAddress::from(0), ga!(1 / 2 / 3), &[0x01])
        .expect("Failed to build frame");
    let err = client
        .send_frame(&frame)
        .expect_err("missing ack must fail the send");
    assert!(err.is_timeout());

    gateway.set_drop_tunneling(false);
    assert!(wait_for(DEADLINE, || gateway.tunnel_connects() >= 2));
    assert!(wait_for(DEADLINE, || client.is_connected()));
    client.stop();
}

#[test]
fn test_sequence_counter_wraps() {
    init_logging();
    let gateway = SimulatedGateway::start();
    let (events, _bus) = mpsc::channel();
    let client =
        TunnelClient::new(test_config(gateway.addr()), events).expect("Failed to create client");
    client.start().expect("Failed to start client");
    assert!(wait_for(DEADLINE, || client.is_connected()));

    let frame = CemiFrame::group_value_write(IndividualAddress::from(0), ga!(0 / 0 / 71), &[0x01])
        .expect("Failed to build frame");
    for _ in 0..257 {
        client.send_frame(&frame).expect("send_frame failed");
    }

    let sequences: Vec<u8> = gateway.received().iter().map(|(seq, _)| *seq).collect();
    assert_eq!(sequences.len(), 257);
    assert_eq!(sequences[0], 0);
    assert_eq!(sequences[255], 255);
    assert_eq!(sequences[256], 0);
    client.stop();
}

#[test]
fn test_indications_are_published() {
    init_logging();
    let gateway = SimulatedGateway::start();
    let (events, bus) = mpsc::channel();
    let client =
        TunnelClient::new(test_config(gateway.addr()), events).expect("Failed to create client");
    client.start().expect("Failed to start client");
    assert!(wait_for(DEADLINE, || client.is_connected()));

    let source = IndividualAddress::new(2, 3, 4).expect("Failed to build address");
    let indication = CemiFrame::group_value_write(source, ga!(4 / 5 / 6), &[0x55])
        .expect("Failed to build frame");
    gateway.inject_indication(&indication);

    let frame = next_frame(&bus, DEADLINE).expect("no frame published");
    assert_eq!(frame.message_code(), CemiMessageCode::LDataInd);
    assert_eq!(frame.operation(), Operation::GroupValueWrite);
    assert_eq!(frame.source(), source);
    assert_eq!(frame.destination(), ga!(4 / 5 / 6));
    assert_eq!(frame.payload(), &[0x55]);

    // The gateway's request was acknowledged
    assert!(wait_for(DEADLINE, || gateway.client_acks() >= 1));
    client.stop();
}

#[test]
fn test_failed_keepalive_reconnects() {
    init_logging();
    let gateway = SimulatedGateway::start();
    let (events, _bus) = mpsc::channel();
    let client =
        TunnelClient::new(test_config(gateway.addr()), events).expect("Failed to create client");
    client.start().expect("Failed to start client");
    assert!(wait_for(DEADLINE, || client.is_connected()));
    let first_channel = gateway.tunnel_channel();

    gateway.set_keepalive_status(ErrorCode::ConnectionId);
    assert!(wait_for(DEADLINE, || gateway.keepalives() >= 1));
    assert!(wait_for(DEADLINE, || gateway.tunnel_connects() >= 2));
    gateway.set_keepalive_status(ErrorCode::NoError);

    assert!(wait_for(DEADLINE, || client.is_connected()));
    // The dead channel got a goodbye before the new connect
    assert!(gateway.disconnects().contains(&first_channel));
    client.stop();
}

#[test]
fn test_gateway_disconnect_triggers_reconnect() {
    init_logging();
    let gateway = SimulatedGateway::start();
    let (events, _bus) = mpsc::channel();
    let client =
        TunnelClient::new(test_config(gateway.addr()), events).expect("Failed to create client");
    client.start().expect("Failed to start client");
    assert!(wait_for(DEADLINE, || client.is_connected()));
    let first_channel = gateway.tunnel_channel();

    gateway.disconnect_client();
    assert!(wait_for(DEADLINE, || gateway.disconnect_answers() >= 1));
    assert!(wait_for(DEADLINE, || gateway.tunnel_connects() >= 2));
    assert!(wait_for(DEADLINE, || client.is_connected()));
    assert_ne!(gateway.tunnel_channel(), first_channel);
    client.stop();
}

#[test]
fn test_stop_disconnects_and_restart_reconnects() {
    init_logging();
    let gateway = SimulatedGateway::start();
    let (events, _bus) = mpsc::channel();
    let client =
        TunnelClient::new(test_config(gateway.addr()), events).expect("Failed to create client");
    client.start().expect("Failed to start client");
    assert!(wait_for(DEADLINE, || client.is_connected()));
    let first_channel = gateway.tunnel_channel();

    client.stop();
    assert!(!client.is_connected());
    assert!(wait_for(DEADLINE, || gateway
        .disconnects()
        .contains(&first_channel)));

    client.start().expect("Failed to restart client");
    assert!(wait_for(DEADLINE, || gateway.tunnel_connects() >= 2));
    assert!(wait_for(DEADLINE, || client.is_connected()));
    client.stop();
}

#[test]
fn test_send_frame_fails_when_disconnected() {
    init_logging();
    let (events, _bus) = mpsc::channel();
    // Nothing listens on this port
    let config = test_config(SocketAddrV4::new(Ipv4Addr::LOCALHOST, 1));
    let client = TunnelClient::new(config, events).expect("Failed to create client");
    client.start().expect("Failed to start client");

    let frame = CemiFrame::group_value_read(IndividualAddress::from(0), ga!(1 / 2 / 3));
    let err = client
        .send_frame(&frame)
        .expect_err("send must fail while disconnected");
    assert!(!err.is_timeout());
    assert_eq!(err.gateway_status(), None);
    assert!(!client.is_connected());
    client.stop();
}
