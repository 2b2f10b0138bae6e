use criterion::{BatchSize, Criterion, Throughput};
use mqttlink::network::Read;
use mqttlink::network::application::mqtt::codec::{
    ConnectPacket, ProtocolVersion, encode_connect, encode_publish_header,
};
use mqttlink::network::application::mqtt::payload::display_payload;
use mqttlink::network::application::mqtt::{PayloadBuffer, QoS};
use mqttlink::network::error::Error;
use std::hint::black_box;

struct SliceSource<'a> {
    data: &'a [u8],
}

impl Read for SliceSource<'_> {
    type Error = Error;

    fn read(&mut self, buf: &mut [u8]) -> Result<usize, Self::Error> {
        let n = buf.len().min(self.data.len());
        buf[..n].copy_from_slice(&self.data[..n]);
        self.data = &self.data[n..];
        Ok(n)
    }
}

pub fn bench_encode_connect(c: &mut Criterion) {
    let packet = ConnectPacket {
        client_id: "dev-352656100000000",
        keep_alive_seconds: 60,
        clean_session: true,
        version: ProtocolVersion::V3_1_1,
        username: Some("device"),
        password: Some(b"secret"),
    };
    let mut buf = [0u8; 128];
    c.bench_function("encode_connect", |b| {
        b.iter(|| encode_connect(black_box(&mut buf), black_box(&packet)).expect("fits"))
    });
}

pub fn bench_encode_publish(c: &mut Criterion) {
    let mut group = c.benchmark_group("encode_publish");
    let mut buf = [0u8; 128];
    for qos in [QoS::AtMostOnce, QoS::AtLeastOnce] {
        group.bench_function(format!("{qos:?}"), |b| {
            b.iter(|| {
                encode_publish_header(
                    black_box(&mut buf),
                    black_box("my/publish/topic"),
                    qos,
                    black_box(1234),
                    black_box(1),
                )
                .expect("fits")
            })
        });
    }
    group.finish();
}

pub fn bench_acquire_payload(c: &mut Criterion) {
    let mut group = c.benchmark_group("acquire_payload");
    let body = vec![0x5Au8; 4096];

    for (name, declared) in [("fits", 128usize), ("oversized", 4096)] {
        group.throughput(Throughput::Bytes(declared as u64));
        group.bench_function(name, |b| {
            b.iter_batched_ref(
                || PayloadBuffer::new(128),
                |buffer| {
                    let mut source = SliceSource {
                        data: &body[..declared],
                    };
                    let _ = black_box(buffer.acquire(&mut source, declared));
                },
                BatchSize::SmallInput,
            )
        });
    }
    group.finish();
}

pub fn bench_display_payload(c: &mut Criterion) {
    let mut group = c.benchmark_group("display_payload");
    let text = "temperature=21.5;humidity=40".repeat(10);
    let binary: Vec<u8> = (0..=255u8).collect();

    group.bench_function("utf8", |b| b.iter(|| display_payload(black_box(text.as_bytes()))));
    group.bench_function("binary", |b| b.iter(|| display_payload(black_box(&binary))));
    group.finish();
}
