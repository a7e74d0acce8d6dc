use std::{
    net::UdpSocket,
    thread,
    time::{Duration, Instant},
};

use rand::Rng as _;
use statsd_client::{StatsdBuilder, StatsdClient, Tag, TagFormat};

struct Server {
    socket: UdpSocket,
}

impl Server {
    fn new() -> Self {
        let socket = UdpSocket::bind("127.0.0.1:0").expect("failed to bind listener");
        socket.set_read_timeout(Some(Duration::from_secs(5))).expect("failed to set read timeout");
        Server { socket }
    }

    fn addr(&self) -> String {
        self.socket.local_addr().expect("listener has no local address").to_string()
    }

    fn builder(&self) -> StatsdBuilder {
        StatsdBuilder::default()
            .with_remote_address(self.addr())
            .expect("invalid remote address")
            .with_flush_interval(Duration::ZERO)
    }

    fn recv(&self) -> String {
        let mut buf = [0u8; 4096];
        let n = self.socket.recv(&mut buf).expect("no datagram received");
        String::from_utf8(buf[..n].to_vec()).expect("datagram is not UTF-8")
    }

    /// Receives datagrams until none arrives within `quiet`.
    fn recv_until_quiet(&self, quiet: Duration) -> Vec<String> {
        self.socket.set_read_timeout(Some(quiet)).expect("failed to set read timeout");

        let mut datagrams = Vec::new();
        let mut buf = [0u8; 4096];
        while let Ok(n) = self.socket.recv(&mut buf) {
            datagrams.push(String::from_utf8(buf[..n].to_vec()).expect("datagram is not UTF-8"));
        }
        datagrams
    }
}

fn setup_tracing() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

#[test]
fn sends_each_metric_type() {
    setup_tracing();

    let server = Server::new();
    let client = server.builder().with_prefix("foo.").build().unwrap();

    // Cases are defined as: action, expected datagram.
    let cases: [(&dyn Fn(&StatsdClient), &str); 6] = [
        (&|c: &StatsdClient| c.incr("req.count", 30, &[]), "foo.req.count:30|c"),
        (&|c: &StatsdClient| c.decr("req.count", 30, &[]), "foo.req.count:-30|c"),
        (&|c: &StatsdClient| c.timing("req.duration", 100, &[]), "foo.req.duration:100|ms"),
        (
            &|c: &StatsdClient| c.precision_timing("req.duration", Duration::from_micros(157_356), &[]),
            "foo.req.duration:157.356|ms",
        ),
        (
            &|c: &StatsdClient| {
                c.gauge("req.clients", 33, &[]);
                c.gauge("req.clients", -533, &[]);
            },
            "foo.req.clients:33|g\nfoo.req.clients:0|g\nfoo.req.clients:-533|g",
        ),
        (&|c: &StatsdClient| c.set_add("req.user", "bob", &[]), "foo.req.user:bob|s"),
    ];

    for (action, expected) in cases {
        action(&client);
        client.flush();
        assert_eq!(server.recv(), expected);
    }

    client.close().unwrap();
}

#[test]
fn flush_timer_sends_partial_packet() {
    let server = Server::new();
    let client = server.builder().with_flush_interval(Duration::from_millis(20)).build().unwrap();

    client.incr("req.count", 1, &[]);
    assert_eq!(server.recv(), "req.count:1|c");

    client.close().unwrap();
}

#[test]
fn full_packet_is_split_before_overflowing_line() {
    let server = Server::new();
    let client = server.builder().with_prefix("foo.").with_maximum_packet_size(1400).build().unwrap();

    // Every line is 19 bytes including its separator, so 73 lines fit in 1400 bytes and the 74th overflows.
    for _ in 0..100 {
        client.incr("req.count", 30, &[]);
    }

    let first = server.recv();
    assert_eq!(first.lines().count(), 73);
    assert!(first.len() <= 1400);

    client.flush();
    let second = server.recv();
    assert_eq!(second.lines().count(), 27);
    assert!(second.lines().all(|line| line == "foo.req.count:30|c"));

    client.close().unwrap();
}

#[test]
fn tags_in_each_format() {
    let tags = [Tag::string("type", "web"), Tag::integer("status", 200)];

    // Cases are defined as: tag format, expected datagram.
    let cases = [
        (TagFormat::Datadog, "req.count:1|c|#host:foo,type:web,status:200"),
        (TagFormat::InfluxDb, "req.count,host=foo,type=web,status=200:1|c"),
        (TagFormat::Graphite, "req.count;host=foo;type=web;status=200:1|c"),
        (TagFormat::Okmeter, "req.count.host_is_foo.type_is_web.status_is_200:1|c"),
    ];

    for (tag_format, expected) in cases {
        let server = Server::new();
        let client = server
            .builder()
            .with_tag_format(tag_format)
            .with_default_tags([Tag::string("host", "foo")])
            .build()
            .unwrap();

        client.incr("req.count", 1, &tags);
        client.flush();
        assert_eq!(server.recv(), expected);

        client.close().unwrap();
    }
}

#[test]
fn clones_share_one_buffer() {
    let server = Server::new();
    let client = server.builder().with_prefix("foo.").build().unwrap();
    let clone = client.clone_with_prefix("bar.").clone_with_prefix_extension("blah.");
    assert_eq!(clone.prefix(), "bar.blah.");

    client.incr("a", 1, &[]);
    clone.incr("b", 1, &[]);
    clone.flush();
    assert_eq!(server.recv(), "foo.a:1|c\nbar.blah.b:1|c");

    // Closing through a clone closes every handle.
    clone.close().unwrap();
    client.incr("c", 1, &[]);
    client.flush();
    assert!(server.recv_until_quiet(Duration::from_millis(100)).is_empty());
    assert_eq!(client.lost_packets(), 0);
}

#[test]
fn zero_increment_emits_nothing() {
    let server = Server::new();
    let client = server.builder().build().unwrap();

    client.incr("req.count", 0, &[]);
    client.fincr("req.count", 0.0, &[]);
    client.close().unwrap();

    assert!(server.recv_until_quiet(Duration::from_millis(100)).is_empty());
}

#[test]
fn concurrent_producers_deliver_every_increment() {
    setup_tracing();

    const PRODUCERS: usize = 4;
    const INCREMENTS: usize = 1000;

    let server = Server::new();
    let client = server
        .builder()
        .with_flush_interval(Duration::from_millis(10))
        .with_send_queue_capacity(1024)
        .with_send_workers(2)
        .build()
        .unwrap();

    let producers = (0..PRODUCERS)
        .map(|_| {
            let client = client.clone();
            thread::spawn(move || {
                let mut rng = rand::rng();
                let mut sent = 0i64;
                for _ in 0..INCREMENTS {
                    let value = rng.random_range(1..100);
                    client.incr("count", value, &[]);
                    sent += value;
                }
                sent
            })
        })
        .collect::<Vec<_>>();

    let sent: i64 = producers.into_iter().map(|handle| handle.join().unwrap()).sum();
    client.close().unwrap();
    assert_eq!(client.lost_packets(), 0);

    let received: i64 = server
        .recv_until_quiet(Duration::from_millis(500))
        .iter()
        .flat_map(|datagram| datagram.lines())
        .map(|line| {
            let value = line.strip_prefix("count:").and_then(|rest| rest.strip_suffix("|c")).unwrap();
            value.parse::<i64>().unwrap()
        })
        .sum();

    assert_eq!(received, sent);
}

#[test]
fn close_is_idempotent_and_flushes() {
    let server = Server::new();
    let client = server.builder().build().unwrap();

    client.incr("last", 1, &[]);
    client.close().unwrap();
    client.close().unwrap();

    assert_eq!(server.recv(), "last:1|c");
}

#[test]
fn close_is_bounded_without_a_listener() {
    setup_tracing();

    // Grab a free port and release it, so nothing is listening on it.
    let addr = {
        let socket = UdpSocket::bind("127.0.0.1:0").unwrap();
        socket.local_addr().unwrap().to_string()
    };

    let client = StatsdBuilder::default()
        .with_remote_address(addr)
        .unwrap()
        .with_flush_interval(Duration::from_millis(5))
        .with_retry_timeout(Duration::from_secs(30))
        .build()
        .unwrap();

    for i in 0..50 {
        client.incr("req.count", i + 1, &[]);
        thread::sleep(Duration::from_millis(1));
    }

    let started = Instant::now();
    client.close().unwrap();
    assert!(started.elapsed() < Duration::from_secs(10));
}

#[test]
fn dropping_last_handle_flushes() {
    let server = Server::new();
    let client = server.builder().build().unwrap();
    let clone = client.clone();

    client.incr("a", 1, &[]);
    drop(client);
    clone.incr("b", 1, &[]);
    drop(clone);

    assert_eq!(server.recv(), "a:1|c\nb:1|c");
}
