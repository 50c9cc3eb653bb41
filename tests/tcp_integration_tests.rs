//! Integration tests for the TCP state machine
//!
//! These tests drive real loopback connections through the public surface:
//! master/client/server role transitions, buffered receive patterns, timeout
//! behavior, and option handling.

use std::io;
use std::time::{Duration, Instant};

use tcpkit::{
    connect_to, Error, Family, OptionValue, Pattern, Role, ShutdownSide, TcpSocket, TimeoutKind,
};

/// Bind a listening server on an OS-assigned loopback port.
fn listener() -> (TcpSocket, u16) {
    let mut server = TcpSocket::new(Family::Inet4).expect("Failed to create master");
    server.bind("127.0.0.1", 0).expect("Failed to bind");
    server.listen(1).expect("Failed to listen");
    let port = server.local_addr().expect("Failed to get local address").port();
    (server, port)
}

#[test]
fn test_ping_round_trip() {
    let (mut server, port) = listener();
    assert_eq!(server.role(), Role::Server);

    let client_handle = std::thread::spawn(move || {
        let mut client = TcpSocket::new(Family::Inet4).expect("Failed to create client");
        client.connect("127.0.0.1", port).expect("Failed to connect");
        assert_eq!(client.role(), Role::Client);
        client.send(b"ping").expect("Failed to send");
        client
    });

    let mut accepted = server.accept().expect("Failed to accept");
    assert_eq!(accepted.role(), Role::Client);
    assert_eq!(accepted.family_name(), "inet4");
    // the server entity is untouched by accept
    assert_eq!(server.role(), Role::Server);

    let data = accepted
        .receive(Pattern::Bytes(4))
        .expect("Failed to receive");
    assert_eq!(data, b"ping");

    client_handle.join().expect("Client thread panicked");
}

#[test]
fn test_bytes_arrive_in_order() {
    let (mut server, port) = listener();

    let client_handle = std::thread::spawn(move || {
        let mut client = TcpSocket::new(Family::Inet4).expect("Failed to create client");
        client.connect("127.0.0.1", port).expect("Failed to connect");
        for chunk in [&b"first "[..], b"second ", b"third"] {
            client.send(chunk).expect("Failed to send");
        }
        // close so the read-to-close pattern terminates
        client.close();
    });

    let mut accepted = server.accept().expect("Failed to accept");
    let data = accepted.receive(Pattern::All).expect("Failed to receive");
    assert_eq!(data, b"first second third");

    client_handle.join().expect("Client thread panicked");
}

#[test]
fn test_line_oriented_receive() {
    let (mut server, port) = listener();

    let client_handle = std::thread::spawn(move || {
        let mut client = TcpSocket::new(Family::Inet4).expect("Failed to create client");
        client.connect("127.0.0.1", port).expect("Failed to connect");
        client.send(b"GET / HTTP/1.0\r\n").expect("Failed to send");
        client.send(b"Host: example\r\n").expect("Failed to send");
        client
    });

    let mut accepted = server.accept().expect("Failed to accept");
    let line = accepted.receive(Pattern::Line).expect("Failed to receive");
    assert_eq!(line, b"GET / HTTP/1.0");
    let line = accepted.receive(Pattern::Line).expect("Failed to receive");
    assert_eq!(line, b"Host: example");

    client_handle.join().expect("Client thread panicked");
}

#[test]
fn test_failed_connect_still_tags_client() {
    // a bound but never-listening socket reserves a port that refuses
    let mut blocker = TcpSocket::new(Family::Inet4).expect("Failed to create socket");
    blocker.bind("127.0.0.1", 0).expect("Failed to bind");
    let port = blocker.local_addr().expect("Failed to get address").port();

    let mut client = TcpSocket::new(Family::Inet4).expect("Failed to create client");
    let err = client.connect("127.0.0.1", port).expect_err("Connect should fail");
    match err {
        Error::Io(e) => assert_eq!(e.kind(), io::ErrorKind::ConnectionRefused),
        other => panic!("Expected a refused connection, got {}", other),
    }
    // the role moves to client even though the attempt failed
    assert_eq!(client.role(), Role::Client);
}

#[test]
fn test_reconnect_after_failure() {
    let mut blocker = TcpSocket::new(Family::Inet4).expect("Failed to create socket");
    blocker.bind("127.0.0.1", 0).expect("Failed to bind");
    let dead_port = blocker.local_addr().expect("Failed to get address").port();

    let (mut server, port) = listener();

    let client_handle = std::thread::spawn(move || {
        let mut client = TcpSocket::new(Family::Inet4).expect("Failed to create client");
        assert!(client.connect("127.0.0.1", dead_port).is_err());
        assert_eq!(client.role(), Role::Client);
        // the same entity retries against a live port
        client.connect("127.0.0.1", port).expect("Reconnect failed");
        client.send(b"back").expect("Failed to send");
    });

    let mut accepted = server.accept().expect("Failed to accept");
    let data = accepted
        .receive(Pattern::Bytes(4))
        .expect("Failed to receive");
    assert_eq!(data, b"back");

    client_handle.join().expect("Client thread panicked");
}

#[test]
fn test_close_is_idempotent() {
    let (mut server, port) = listener();

    let client_handle = std::thread::spawn(move || {
        let mut client = TcpSocket::new(Family::Inet4).expect("Failed to create client");
        client.connect("127.0.0.1", port).expect("Failed to connect");
        client
    });

    let mut accepted = server.accept().expect("Failed to accept");
    let mut client = client_handle.join().expect("Client thread panicked");

    accepted.close();
    accepted.close();
    assert!(accepted.raw_fd().is_none());
    client.close();
    client.close();
    server.close();
    server.close();
}

#[test]
fn test_receive_timeout_honors_total_budget() {
    let (mut server, port) = listener();

    let client_handle = std::thread::spawn(move || {
        let mut client = TcpSocket::new(Family::Inet4).expect("Failed to create client");
        client.connect("127.0.0.1", port).expect("Failed to connect");
        client.set_timeout(TimeoutKind::Total, Some(Duration::from_millis(300)));
        client.set_timeout(TimeoutKind::Block, Some(Duration::from_millis(100)));

        let start = Instant::now();
        let err = client
            .receive(Pattern::Bytes(1))
            .expect_err("Receive should time out");
        let elapsed = start.elapsed();

        assert!(err.error.is_timeout());
        assert!(err.partial.is_empty());
        // no earlier than the total budget, no later than total plus a
        // generous scheduling margin
        assert!(elapsed >= Duration::from_millis(300), "returned after {:?}", elapsed);
        assert!(elapsed < Duration::from_millis(1500), "returned after {:?}", elapsed);
    });

    // hold the connection open without sending anything
    let accepted = server.accept().expect("Failed to accept");
    client_handle.join().expect("Client thread panicked");
    drop(accepted);
}

#[test]
fn test_zero_timeout_probes_without_waiting() {
    let (mut server, _port) = listener();
    server.set_timeout(TimeoutKind::Block, Some(Duration::ZERO));

    let start = Instant::now();
    let err = server.accept().expect_err("Accept should report would-block");
    assert!(err.is_timeout());
    assert!(start.elapsed() < Duration::from_millis(100));
}

#[test]
fn test_partial_data_survives_peer_close() {
    let (mut server, port) = listener();

    let client_handle = std::thread::spawn(move || {
        let mut client = TcpSocket::new(Family::Inet4).expect("Failed to create client");
        client.connect("127.0.0.1", port).expect("Failed to connect");
        client.send(b"abc").expect("Failed to send");
        client.close();
    });

    let mut accepted = server.accept().expect("Failed to accept");
    client_handle.join().expect("Client thread panicked");

    let err = accepted
        .receive(Pattern::Bytes(10))
        .expect_err("Receive should hit the close");
    assert!(err.error.is_closed());
    assert_eq!(err.partial, b"abc");
}

#[test]
fn test_dirty_reports_buffered_bytes() {
    let (mut server, port) = listener();

    let client_handle = std::thread::spawn(move || {
        let mut client = TcpSocket::new(Family::Inet4).expect("Failed to create client");
        client.connect("127.0.0.1", port).expect("Failed to connect");
        client.send(b"0123456789").expect("Failed to send");
        client
    });

    let mut accepted = server.accept().expect("Failed to accept");
    assert!(!accepted.dirty());
    // let the whole payload arrive so one refill pulls all ten bytes
    std::thread::sleep(Duration::from_millis(50));
    let data = accepted
        .receive(Pattern::Bytes(4))
        .expect("Failed to receive");
    assert_eq!(data, b"0123");
    // six bytes were pulled into the buffer but not consumed
    assert!(accepted.dirty());
    accepted
        .receive(Pattern::Bytes(6))
        .expect("Failed to receive");
    assert!(!accepted.dirty());

    client_handle.join().expect("Client thread panicked");
}

#[test]
fn test_stats_count_bytes_both_ways() {
    let (mut server, port) = listener();

    let client_handle = std::thread::spawn(move || {
        let mut client = TcpSocket::new(Family::Inet4).expect("Failed to create client");
        client.connect("127.0.0.1", port).expect("Failed to connect");
        client.send(b"hello").expect("Failed to send");
        let stats = client.stats().expect("Failed to get stats");
        assert_eq!(stats.sent, 5);
        assert_eq!(stats.received, 0);

        client
            .set_stats(0, 0, Duration::ZERO)
            .expect("Failed to reset stats");
        assert_eq!(client.stats().expect("Failed to get stats").sent, 0);
    });

    let mut accepted = server.accept().expect("Failed to accept");
    let data = accepted
        .receive(Pattern::Bytes(5))
        .expect("Failed to receive");
    assert_eq!(data, b"hello");
    let stats = accepted.stats().expect("Failed to get stats");
    assert_eq!(stats.received, 5);
    assert_eq!(stats.sent, 0);

    client_handle.join().expect("Client thread panicked");
}

#[test]
fn test_options_on_live_connection() {
    let (mut server, port) = listener();

    let client_handle = std::thread::spawn(move || {
        let mut client = TcpSocket::new(Family::Inet4).expect("Failed to create client");
        client.connect("127.0.0.1", port).expect("Failed to connect");

        client
            .set_option("tcp-nodelay", &OptionValue::Bool(true))
            .expect("Failed to set tcp-nodelay");
        assert_eq!(
            client.option("tcp-nodelay").expect("Failed to get tcp-nodelay"),
            OptionValue::Bool(true)
        );

        client
            .set_option("keepalive", &OptionValue::Bool(true))
            .expect("Failed to set keepalive");

        client
            .set_option("linger", &OptionValue::Linger(Some(Duration::from_secs(1))))
            .expect("Failed to set linger");
        assert_eq!(
            client.option("linger").expect("Failed to get linger"),
            OptionValue::Linger(Some(Duration::from_secs(1)))
        );

        assert_eq!(
            client.option("error").expect("Failed to get error"),
            OptionValue::Error(None)
        );
    });

    let _accepted = server.accept().expect("Failed to accept");
    client_handle.join().expect("Client thread panicked");
}

#[test]
fn test_linger_zero_close_aborts() {
    let (mut server, port) = listener();

    let client_handle = std::thread::spawn(move || {
        let mut client = TcpSocket::new(Family::Inet4).expect("Failed to create client");
        client.connect("127.0.0.1", port).expect("Failed to connect");
        client.send(b"doomed").expect("Failed to send");
        client
            .set_option("linger", &OptionValue::Linger(Some(Duration::ZERO)))
            .expect("Failed to set linger");
        // closing with a zero linger sends a reset instead of a FIN
        client.close();
    });

    let mut accepted = server.accept().expect("Failed to accept");
    client_handle.join().expect("Client thread panicked");
    // give the reset time to arrive before probing
    std::thread::sleep(Duration::from_millis(100));

    // ask for more than was sent so the read runs into the reset itself;
    // a graceful close would surface as "closed" instead
    let err = accepted
        .receive(Pattern::Bytes(16))
        .expect_err("Receive should observe the reset");
    match err.error {
        Error::Io(e) => assert_eq!(e.kind(), io::ErrorKind::ConnectionReset),
        other => panic!("Expected an abrupt reset, got {}", other),
    }
}

#[test]
fn test_shutdown_send_half() {
    let (mut server, port) = listener();

    let client_handle = std::thread::spawn(move || {
        let mut client = TcpSocket::new(Family::Inet4).expect("Failed to create client");
        client.connect("127.0.0.1", port).expect("Failed to connect");
        client.send(b"last words").expect("Failed to send");
        client
            .shutdown("send".parse::<ShutdownSide>().expect("Bad direction"))
            .expect("Failed to shut down");
        client
    });

    let mut accepted = server.accept().expect("Failed to accept");
    let data = accepted.receive(Pattern::All).expect("Failed to receive");
    assert_eq!(data, b"last words");

    client_handle.join().expect("Client thread panicked");
}

#[test]
fn test_connect_to_factory() {
    let (mut server, port) = listener();

    let client_handle = std::thread::spawn(move || {
        let mut client = connect_to(
            "127.0.0.1",
            port,
            Some(("127.0.0.1", 0)),
            Family::Unspec,
        )
        .expect("Factory connect failed");
        assert_eq!(client.role(), Role::Client);
        assert_eq!(client.family(), Family::Inet4);
        client.send(b"made it").expect("Failed to send");
    });

    let mut accepted = server.accept().expect("Failed to accept");
    let data = accepted
        .receive(Pattern::Bytes(7))
        .expect("Failed to receive");
    assert_eq!(data, b"made it");

    client_handle.join().expect("Client thread panicked");
}

#[test]
fn test_connect_to_aborts_on_local_bind_failure() {
    let (_server, port) = listener();

    // a documentation-range address can never be bound locally
    let result = connect_to(
        "127.0.0.1",
        port,
        Some(("192.0.2.1", 0)),
        Family::Unspec,
    );
    assert!(result.is_err(), "Local bind should have failed");
}

#[test]
fn test_accept_times_out_without_peers() {
    let (mut server, _port) = listener();
    server.set_timeout(TimeoutKind::Total, Some(Duration::from_millis(100)));

    let start = Instant::now();
    let err = server.accept().expect_err("Accept should time out");
    assert!(err.is_timeout());
    assert!(start.elapsed() >= Duration::from_millis(100));
}

#[test]
fn test_ipv6_loopback_round_trip() {
    // may be unavailable in minimal environments
    let mut server = match TcpSocket::new(Family::Inet6) {
        Ok(s) => s,
        Err(_) => {
            println!("Skipping IPv6 test - IPv6 not available");
            return;
        }
    };
    if server.bind("::1", 0).is_err() {
        println!("Skipping IPv6 test - no ::1 on loopback");
        return;
    }
    server.listen(1).expect("Failed to listen");
    assert_eq!(server.family_name(), "inet6");
    let port = server.local_addr().expect("Failed to get address").port();

    let client_handle = std::thread::spawn(move || {
        let mut client = TcpSocket::new(Family::Inet6).expect("Failed to create client");
        client.connect("::1", port).expect("Failed to connect");
        client.send(b"six").expect("Failed to send");
    });

    let mut accepted = server.accept().expect("Failed to accept");
    let data = accepted
        .receive(Pattern::Bytes(3))
        .expect("Failed to receive");
    assert_eq!(data, b"six");

    client_handle.join().expect("Client thread panicked");
}
