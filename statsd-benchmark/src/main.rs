use getopts::Options;
use hdrhistogram::Histogram as HdrHistogram;
use log::{error, info};
use metrics::{counter, gauge, histogram};
use quanta::{Clock, Instant as QuantaInstant};
use statsd_client::{StatsdBuilder, StatsdClient, Tag};
use std::{
    env,
    net::UdpSocket,
    ops::Sub,
    sync::{
        atomic::{AtomicBool, AtomicU64, Ordering},
        Arc,
    },
    thread,
    time::{Duration, Instant},
};

const LOOP_SAMPLE: u64 = 1000;

/// A UDP sink that counts whatever the client sends it.
struct Sink {
    addr: String,
    datagrams: Arc<AtomicU64>,
    bytes: Arc<AtomicU64>,
}

impl Sink {
    fn spawn() -> std::io::Result<Sink> {
        let socket = UdpSocket::bind("127.0.0.1:0")?;
        let addr = socket.local_addr()?.to_string();
        let datagrams = Arc::new(AtomicU64::new(0));
        let bytes = Arc::new(AtomicU64::new(0));

        let (d, b) = (datagrams.clone(), bytes.clone());
        thread::spawn(move || {
            let mut buf = [0u8; 65536];
            while let Ok(n) = socket.recv(&mut buf) {
                d.fetch_add(1, Ordering::Relaxed);
                b.fetch_add(n as u64, Ordering::Relaxed);
            }
        });

        Ok(Sink { addr, datagrams, bytes })
    }
}

struct Generator {
    t0: Option<QuantaInstant>,
    gauge: i64,
    hist: HdrHistogram<u64>,
    done: Arc<AtomicBool>,
    rate_counter: Arc<AtomicU64>,
}

impl Generator {
    fn new(done: Arc<AtomicBool>, rate_counter: Arc<AtomicU64>) -> Generator {
        Generator {
            t0: None,
            gauge: 0,
            hist: HdrHistogram::<u64>::new_with_bounds(1, u64::MAX, 3).expect("valid histogram bounds"),
            done,
            rate_counter,
        }
    }

    /// Emits through the client API directly.
    fn run_direct(&mut self, client: &StatsdClient) {
        let clock = Clock::new();
        let mut loop_counter = 0;
        let tags = [Tag::string("mode", "direct")];

        loop {
            loop_counter += 1;

            self.gauge += 1;

            let t1 = clock.recent();

            if let Some(t0) = self.t0 {
                let start = if loop_counter % LOOP_SAMPLE == 0 { Some(clock.now()) } else { None };

                client.incr("ok", 1, &tags);
                client.gauge("total", self.gauge, &tags);
                client.precision_timing("ok", t1.sub(t0), &tags);

                if let Some(val) = start {
                    let delta = clock.now() - val;
                    self.hist.saturating_record(delta.as_nanos() as u64);

                    // We also increment our global counter for the sample rate here.
                    self.rate_counter.fetch_add(LOOP_SAMPLE * 3, Ordering::AcqRel);

                    if self.done.load(Ordering::Relaxed) {
                        break;
                    }
                }
            }

            self.t0 = Some(t1);
        }
    }

    /// Emits through the `metrics` macros, with the client installed as the global recorder.
    fn run_recorder(&mut self) {
        let clock = Clock::new();
        let mut loop_counter = 0;

        let counter = counter!("ok", "mode" => "recorder");
        let gauge = gauge!("total", "mode" => "recorder");
        let histogram = histogram!("ok", "mode" => "recorder");

        loop {
            loop_counter += 1;

            self.gauge += 1;

            let t1 = clock.recent();

            if let Some(t0) = self.t0 {
                let start = if loop_counter % LOOP_SAMPLE == 0 { Some(clock.now()) } else { None };

                counter.increment(1);
                gauge.set(self.gauge as f64);
                histogram.record(t1.sub(t0));

                if let Some(val) = start {
                    let delta = clock.now() - val;
                    self.hist.saturating_record(delta.as_nanos() as u64);

                    self.rate_counter.fetch_add(LOOP_SAMPLE * 3, Ordering::AcqRel);

                    if self.done.load(Ordering::Relaxed) {
                        break;
                    }
                }
            }

            self.t0 = Some(t1);
        }
    }
}

impl Drop for Generator {
    fn drop(&mut self) {
        info!(
            "    sender latency: min: {:8} p50: {:8} p95: {:8} p99: {:8} p999: {:8} max: {:8}",
            nanos_to_readable(self.hist.min()),
            nanos_to_readable(self.hist.value_at_percentile(50.0)),
            nanos_to_readable(self.hist.value_at_percentile(95.0)),
            nanos_to_readable(self.hist.value_at_percentile(99.0)),
            nanos_to_readable(self.hist.value_at_percentile(99.9)),
            nanos_to_readable(self.hist.max())
        );
    }
}

fn print_usage(program: &str, opts: &Options) {
    let brief = format!("Usage: {} [options]", program);
    print!("{}", opts.usage(&brief));
}

pub fn opts() -> Options {
    let mut opts = Options::new();

    opts.optopt("d", "duration", "number of seconds to run the benchmark", "INTEGER");
    opts.optopt(
        "m",
        "mode",
        "whether to emit through the client directly or through the metrics facade (direct vs recorder)",
        "STRING",
    );
    opts.optopt("p", "producers", "number of producers", "INTEGER");
    opts.optopt("w", "workers", "number of send workers", "INTEGER");
    opts.optopt("q", "queue", "send queue capacity", "INTEGER");
    opts.optflag("h", "help", "print this help menu");

    opts
}

fn parse_opt<T: std::str::FromStr>(matches: &getopts::Matches, name: &str, default: T) -> Result<T, String> {
    match matches.opt_str(name) {
        Some(s) => s.parse().map_err(|_| format!("invalid value for --{}: {}", name, s)),
        None => Ok(default),
    }
}

fn main() {
    pretty_env_logger::init();

    let args: Vec<String> = env::args().collect();
    let program = &args[0];
    let opts = opts();

    let matches = match opts.parse(&args[1..]) {
        Ok(m) => m,
        Err(f) => {
            error!("Failed to parse command line args: {}", f);
            return;
        }
    };

    if matches.opt_present("help") {
        print_usage(program, &opts);
        return;
    }

    info!("statsd client benchmark");

    let parsed = (|| {
        Ok::<_, String>((
            parse_opt(&matches, "duration", 60u64)?,
            parse_opt(&matches, "producers", 1usize)?,
            parse_opt(&matches, "workers", 1usize)?,
            parse_opt(&matches, "queue", 10usize)?,
        ))
    })();
    let (seconds, producers, workers, queue) = match parsed {
        Ok(parsed) => parsed,
        Err(e) => {
            error!("{}", e);
            return;
        }
    };
    let recorder_mode = matches.opt_str("mode").map(|s| s.eq_ignore_ascii_case("recorder")).unwrap_or(false);

    info!("duration: {}s", seconds);
    info!("producers: {}", producers);
    info!("send workers: {}, send queue capacity: {}", workers, queue);

    let sink = match Sink::spawn() {
        Ok(sink) => sink,
        Err(e) => {
            error!("Failed to bind sink: {}", e);
            return;
        }
    };

    let builder = match StatsdBuilder::default().with_remote_address(&sink.addr) {
        Ok(builder) => builder.with_prefix("bench.").with_send_workers(workers).with_send_queue_capacity(queue),
        Err(e) => {
            error!("Failed to configure client: {}", e);
            return;
        }
    };
    let client = if recorder_mode { builder.install() } else { builder.build() };
    let client = match client {
        Ok(client) => client,
        Err(e) => {
            error!("Failed to build client: {}", e);
            return;
        }
    };

    info!("client configured, sending to {}", sink.addr);

    // Spin up our sample producers.
    let done = Arc::new(AtomicBool::new(false));
    let rate_counter = Arc::new(AtomicU64::new(0));
    let mut handles = Vec::new();

    for _ in 0..producers {
        let d = done.clone();
        let r = rate_counter.clone();
        let client = client.clone();
        let handle = thread::spawn(move || {
            let mut gen = Generator::new(d, r);
            if recorder_mode {
                gen.run_recorder();
            } else {
                gen.run_direct(&client);
            }
        });

        handles.push(handle);
    }

    thread::spawn(|| loop {
        thread::sleep(Duration::from_millis(10));
        quanta::set_recent(quanta::Instant::now());
    });

    // Poll the counters to figure out the sample rate.
    let mut total = 0;
    let mut lost = 0;
    let mut t0 = Instant::now();

    for _ in 0..seconds {
        let t1 = Instant::now();

        let turn_total = rate_counter.load(Ordering::Acquire);
        let turn_delta = turn_total - total;
        total = turn_total;
        let rate = turn_delta as f64 / (t1 - t0).as_secs_f64();

        let turn_lost = client.lost_packets();
        info!("sample ingest rate: {:.0} samples/sec, packets lost: {}", rate, turn_lost - lost);
        lost = turn_lost;

        t0 = t1;
        thread::sleep(Duration::new(1, 0));
    }

    // Wait for the producers to finish so we can get their stats too.
    done.store(true, Ordering::SeqCst);
    for handle in handles {
        let _ = handle.join();
    }

    if let Err(e) = client.close() {
        error!("Failed to close client: {}", e);
    }

    info!("--------------------------------------------------------------------------------");
    info!(" ingested samples total: {}", total);
    info!(
        " datagrams received: {}, bytes received: {}, packets lost: {}",
        sink.datagrams.load(Ordering::Relaxed),
        sink.bytes.load(Ordering::Relaxed),
        client.lost_packets()
    );
}

fn nanos_to_readable(t: u64) -> String {
    let f = t as f64;
    if f < 1_000.0 {
        format!("{}ns", f)
    } else if f < 1_000_000.0 {
        format!("{:.0}μs", f / 1_000.0)
    } else if f < 2_000_000_000.0 {
        format!("{:.2}ms", f / 1_000_000.0)
    } else {
        format!("{:.3}s", f / 1_000_000_000.0)
    }
}
