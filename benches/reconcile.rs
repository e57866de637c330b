//! Benchmarks for the derived-object builder and work queue deduplication

use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};
use k8s_openapi::api::storage::v1::StorageClass;
use kube::api::ObjectMeta;
use storage_capability::controller::{desired_spec, merge_capability, WorkQueue};
use storage_capability::{
    ExpandMode, FeatureSet, PluginInfo, ProvisionerCapability, ProvisionerCapabilitySpec,
    RateLimiterConfig, SnapshotFeatures, VolumeFeatures, VolumeSnapshotClass,
};

fn storage_class(name: &str, provisioner: &str) -> StorageClass {
    StorageClass {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            ..ObjectMeta::default()
        },
        provisioner: provisioner.to_string(),
        allow_volume_expansion: Some(true),
        ..StorageClass::default()
    }
}

fn provisioner_capability(name: &str) -> ProvisionerCapability {
    ProvisionerCapability::new(
        name,
        ProvisionerCapabilitySpec {
            plugin_info: PluginInfo {
                name: name.to_string(),
                version: "v1.0.0".to_string(),
            },
            features: FeatureSet {
                topology: true,
                volume: VolumeFeatures {
                    create: true,
                    attach: true,
                    expand: ExpandMode::Online,
                    ..VolumeFeatures::default()
                },
                snapshot: SnapshotFeatures {
                    create: true,
                    list: true,
                },
            },
        },
    )
}

fn bench_desired_spec(c: &mut Criterion) {
    let mut group = c.benchmark_group("desired");
    group.throughput(Throughput::Elements(1));

    let sc = storage_class("fast", "disk.csi.example.com");
    let vsc = VolumeSnapshotClass::new("fast", "disk.csi.example.com");
    let pcap = provisioner_capability("disk.csi.example.com");

    group.bench_function("desired_spec", |b| {
        b.iter(|| desired_spec(black_box(&sc), black_box(Some(&vsc)), black_box(&pcap)));
    });

    group.bench_function("merge_capability", |b| {
        let existing = storage_capability::controller::desired_capability(&sc, None, &pcap);
        b.iter(|| merge_capability(black_box(&existing), &sc, Some(&vsc), &pcap));
    });

    group.finish();
}

fn bench_queue_dedup(c: &mut Criterion) {
    let mut group = c.benchmark_group("work_queue");
    group.throughput(Throughput::Elements(100));

    let rt = tokio::runtime::Runtime::new().unwrap();

    group.bench_function("add_100_duplicates_then_drain", |b| {
        b.iter(|| {
            rt.block_on(async {
                let queue = WorkQueue::new("bench", RateLimiterConfig::default());
                for i in 0..100 {
                    queue.add(format!("sc-{}", i % 10));
                }
                while !queue.is_empty() {
                    if let Some(key) = queue.get().await {
                        queue.done(&key);
                    }
                }
            });
        });
    });

    group.finish();
}

criterion_group!(benches, bench_desired_spec, bench_queue_dedup);
criterion_main!(benches);
