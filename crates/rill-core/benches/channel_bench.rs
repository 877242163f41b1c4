//! Multi-channel throughput benchmarks.

use criterion::{criterion_group, criterion_main, Criterion, Throughput};

use rill_core::channel::{ChannelConfig, MultiChannel};

const MESSAGES: u64 = 10_000;

fn bench_publish_consume(c: &mut Criterion) {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .build()
        .expect("bench runtime");

    let mut group = c.benchmark_group("multi_channel");
    group.throughput(Throughput::Elements(MESSAGES));

    group.bench_function("publish_consume_10k", |b| {
        b.iter(|| {
            runtime.block_on(async {
                let channel: MultiChannel<u64> =
                    MultiChannel::new("bench", ChannelConfig::with_capacity(1024));
                let mut producer = channel.register_producer().unwrap();
                let mut subscriber = channel.subscribe().unwrap();

                let mut published = 0u64;
                let mut consumed = 0u64;
                while consumed < MESSAGES {
                    if published < MESSAGES
                        && channel
                            .request_permission_to_publish(&mut producer, 64)
                            .await
                    {
                        for _ in 0..producer.unfilled() {
                            producer.push(published);
                            published += 1;
                        }
                        channel.publish_messages(&mut producer).await;
                    }
                    while let Some(_message) = channel.try_next_message(&mut subscriber) {
                        channel.notify_message_consumed(&mut subscriber);
                        consumed += 1;
                    }
                }
            });
        });
    });

    group.finish();
}

criterion_group!(benches, bench_publish_consume);
criterion_main!(benches);
