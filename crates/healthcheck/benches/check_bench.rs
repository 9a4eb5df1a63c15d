use criterion::{criterion_group, criterion_main, Criterion};
use healthcheck::liveness::{Liveness, Thresholds};
use healthcheck::types::{classify_reply, CheckProtocol, CheckSpec};
use std::hint::black_box;

fn classify_benchmark(c: &mut Criterion) {
    let mut group = c.benchmark_group("classify_reply");

    let http_ok = b"HTTP/1.0 200 OK\r\nContent-Length: 0\r\n\r\n";
    group.bench_function("http_2xx", |b| {
        b.iter(|| black_box(classify_reply(CheckProtocol::Http, black_box(http_ok))))
    });

    let ssl_alert = [0x15u8, 0x03, 0x00, 0x00, 0x02];
    group.bench_function("ssl3_alert", |b| {
        b.iter(|| black_box(classify_reply(CheckProtocol::Ssl3, black_box(&ssl_alert))))
    });

    let smtp_banner = b"220 mail.example.test ESMTP";
    group.bench_function("smtp_banner", |b| {
        b.iter(|| black_box(classify_reply(CheckProtocol::Smtp, black_box(smtp_banner))))
    });

    group.finish();
}

fn liveness_benchmark(c: &mut Criterion) {
    let mut group = c.benchmark_group("liveness");
    let th = Thresholds::new(2, 3);

    // a full down/up cycle per iteration
    group.bench_function("down_up_cycle", |b| {
        b.iter(|| {
            let mut l = Liveness::initial();
            for _ in 0..3 {
                let _ = black_box(l.observe_failure());
            }
            for _ in 0..2 {
                let _ = black_box(l.observe_success(th));
            }
            black_box(l)
        })
    });

    group.finish();
}

fn payload_benchmark(c: &mut Criterion) {
    let mut group = c.benchmark_group("payload");

    group.bench_function("render_http", |b| {
        b.iter(|| black_box(CheckSpec::http(black_box("/health"), "HTTP/1.0")))
    });

    group.finish();
}

criterion_group!(benches, classify_benchmark, liveness_benchmark, payload_benchmark);
criterion_main!(benches);
