//! Integration benchmark for the WxBeacon2 processing pipeline.
//!
//! Benchmarks the filter/decoder on its own and the full application loop
//! with a FakeScanner feeding advertisements through run_with_io.

use criterion::{BenchmarkId, Criterion, Throughput, black_box, criterion_group, criterion_main};
use std::future::pending;
use tokio::runtime::Runtime;
use tokio::sync::mpsc;
use wxbeacon2_listener::app::{Options, run_with_io};
use wxbeacon2_listener::scanner::{
    Central, CentralFuture, Connection, OpenFuture, ScanEvent,
};
use wxbeacon2_listener::{
    Advertisement, Backend, MacAddress, ManufacturerData, OMRON_COMPANY_ID, OutputFormat,
    Scanner, SequenceFilter, Target, filter,
};

const TEST_MAC: MacAddress = MacAddress([0xAA, 0xBB, 0xCC, 0xDD, 0xEE, 0xFF]);

/// Sensor payload after the company id: 23.45 °C, 50 %, 100 lx, UV 0.05,
/// 1013.2 hPa, 35.5 dB, accelerations 1/2/980 (IM) or DI 70.12 / WBGT 19.5 (EP).
fn payload_after_company_id(sequence: u8) -> Vec<u8> {
    vec![
        sequence, 0x29, 0x09, 0x88, 0x13, 0x64, 0x00, 0x05, 0x00, 0x94, 0x27, 0xDE, 0x0D, 0x01,
        0x00, 0x02, 0x00, 0xD4, 0x03, 0xBE,
    ]
}

fn advertisement(address: MacAddress, name: &str, sequence: u8) -> Advertisement {
    Advertisement {
        address,
        name: name.to_string(),
        manufacturer_data: Some(ManufacturerData::from_parts(
            OMRON_COMPANY_ID,
            &payload_after_company_id(sequence),
        )),
        rssi: -60,
    }
}

struct NullCentral;

impl Central for NullCentral {
    fn scan(&mut self, _allow_duplicates: bool) -> CentralFuture<'_> {
        Box::pin(async { Ok(()) })
    }

    fn stop_scanning(&mut self) -> CentralFuture<'_> {
        Box::pin(async { Ok(()) })
    }

    fn stop(&mut self) -> CentralFuture<'_> {
        Box::pin(async { Ok(()) })
    }
}

/// A fake scanner that replays advertisements and then closes its stream.
struct FakeScanner {
    advertisements: Vec<Advertisement>,
}

impl Scanner for FakeScanner {
    fn open(&self, _backend: Backend) -> OpenFuture<'_> {
        let advertisements = self.advertisements.clone();
        Box::pin(async move {
            let (tx, rx) = mpsc::channel(advertisements.len().max(1));
            tokio::spawn(async move {
                for advertisement in advertisements {
                    let _ = tx.send(ScanEvent::Discovered(advertisement)).await;
                }
            });
            Ok(Connection {
                central: Box::new(NullCentral),
                events: rx,
            })
        })
    }
}

fn default_options() -> Options {
    Options {
        device: None,
        format: OutputFormat::Text,
        influxdb_measurement: "wxbeacon2".to_string(),
        keep_duplicates: false,
        verbose: false,
        backend: Backend::default(),
    }
}

fn run(rt: &Runtime, options: Options, scanner: &FakeScanner, capacity: usize) -> Vec<u8> {
    let mut out = Vec::<u8>::with_capacity(capacity);
    rt.block_on(async {
        run_with_io(options, scanner, pending(), &mut out)
            .await
            .unwrap();
    });
    out
}

/// Benchmark filter + decode of a single advertisement
fn bench_filter(c: &mut Criterion) {
    let mut group = c.benchmark_group("filter");
    group.throughput(Throughput::Elements(1));

    let ep = advertisement(TEST_MAC, "EP", 1);
    let im = advertisement(TEST_MAC, "IM", 1);
    let unknown = advertisement(TEST_MAC, "XX", 1);
    let device = Target::Device(TEST_MAC);

    group.bench_function("ep_any", |b| {
        b.iter(|| black_box(filter(black_box(&ep), &Target::Any)))
    });
    group.bench_function("im_device", |b| {
        b.iter(|| black_box(filter(black_box(&im), &device)))
    });
    group.bench_function("unknown_name", |b| {
        b.iter(|| black_box(filter(black_box(&unknown), &Target::Any)))
    });

    group.finish();
}

/// Benchmark the sequence dedup under a repeating stream
fn bench_dedup(c: &mut Criterion) {
    let mut group = c.benchmark_group("dedup");
    group.throughput(Throughput::Elements(100));

    group.bench_function("100_repeats", |b| {
        b.iter(|| {
            let dedup = SequenceFilter::new();
            let passed = (0..100u8)
                .filter(|i| dedup.observe(TEST_MAC, black_box(i / 10)))
                .count();
            black_box(passed)
        })
    });

    group.finish();
}

/// Benchmark the full application pipeline: scanner -> filter -> dedup -> format -> write
fn bench_app_pipeline(c: &mut Criterion) {
    let mut group = c.benchmark_group("app_pipeline");
    let rt = Runtime::new().unwrap();

    for batch_size in [1usize, 10, 100] {
        group.throughput(Throughput::Elements(batch_size as u64));
        group.bench_with_input(
            BenchmarkId::from_parameter(batch_size),
            &batch_size,
            |b, &size| {
                let scanner = FakeScanner {
                    advertisements: (0..size)
                        .map(|i| advertisement(TEST_MAC, "EP", i as u8))
                        .collect(),
                };
                b.iter(|| black_box(run(&rt, default_options(), &scanner, 256 * size)))
            },
        );
    }

    group.finish();
}

/// Benchmark with dedup dropping most advertisements (beacons repeat each sample)
fn bench_deduplicated_pipeline(c: &mut Criterion) {
    let mut group = c.benchmark_group("deduplicated_pipeline");
    let rt = Runtime::new().unwrap();

    let scanner = FakeScanner {
        advertisements: (0..100).map(|_| advertisement(TEST_MAC, "IM", 7)).collect(),
    };

    group.throughput(Throughput::Elements(100));
    group.bench_function("100_same_sequence", |b| {
        b.iter(|| {
            let out = run(&rt, default_options(), &scanner, 256);
            debug_assert_eq!(out.iter().filter(|&&b| b == b'\n').count(), 1);
            black_box(out)
        })
    });

    let devices = FakeScanner {
        advertisements: (0..10u8)
            .map(|i| advertisement(MacAddress([0xAA, 0xBB, 0xCC, 0xDD, 0xEE, i]), "IM", 7))
            .collect(),
    };
    group.throughput(Throughput::Elements(10));
    group.bench_function("10_different_devices", |b| {
        b.iter(|| black_box(run(&rt, default_options(), &devices, 256 * 10)))
    });

    group.finish();
}

criterion_group!(
    benches,
    bench_filter,
    bench_dedup,
    bench_app_pipeline,
    bench_deduplicated_pipeline,
);
criterion_main!(benches);
