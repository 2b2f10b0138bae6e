use criterion::{criterion_group, criterion_main};

mod network {
    pub mod application {
        pub mod mqtt {
            pub mod client;
        }
    }
}

criterion_group!(
    benches,
    network::application::mqtt::client::bench_encode_connect,
    network::application::mqtt::client::bench_encode_publish,
    network::application::mqtt::client::bench_acquire_payload,
    network::application::mqtt::client::bench_display_payload
);
criterion_main!(benches);
