//! Performance benchmarks for the sync engine.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use std::collections::BTreeMap;
use std::sync::Arc;
use syncline::subscriptions::ChannelStream;
use syncline::{
    build_field_versions, check_field_conflicts, Action, ActivityEvent, ActivitySource,
    FieldVersionMap, InMemoryActivityLog, Membership, OrgContext, OrganizationMembers,
    StreamOffset, StreamRequest, Subscriber, SubscriberId, SyncConfig, SyncHub, TransactionId,
};

fn context(org: usize, user: usize) -> OrgContext {
    let org = format!("org-{org}");
    OrgContext::new(org.clone(), format!("user-{user}"))
        .with_memberships(vec![Membership::organization(org, "member")])
}

fn membership_event(i: usize, org: usize) -> ActivityEvent {
    ActivityEvent::new(format!("{i:08}"), Action::Update, "membership", format!("m-{i}"))
        .in_organization(format!("org-{org}"))
        .with_membership_context("organization", i as u64)
}

fn hub(log: &Arc<InMemoryActivityLog>) -> SyncHub {
    SyncHub::new(
        SyncConfig::default(),
        Arc::clone(log) as Arc<dyn ActivitySource>,
        Arc::new(OrganizationMembers),
    )
}

/// Benchmark dispatch with a fixed bucket size and a growing number of
/// other organizations' subscribers
fn bench_dispatch_fan_out(c: &mut Criterion) {
    let mut group = c.benchmark_group("dispatch_fan_out");

    for total_orgs in [1usize, 100, 1000] {
        group.bench_with_input(
            BenchmarkId::new("organizations", total_orgs),
            &total_orgs,
            |b, &orgs| {
                let log = Arc::new(InMemoryActivityLog::new());
                let hub = hub(&log);
                let mut receivers = Vec::new();

                for org in 0..orgs {
                    for user in 0..10 {
                        let (stream, rx) = ChannelStream::bounded(1);
                        let ctx = context(org, user);
                        let key = ctx.index_key();
                        hub.registry().register(Arc::new(Subscriber::new(
                            SubscriberId::new(format!("s-{org}-{user}")),
                            Some(key),
                            ctx,
                            Arc::new(stream),
                        )));
                        receivers.push(rx);
                    }
                }

                let event = membership_event(1, 0);
                b.iter(|| {
                    let report = hub.publish(black_box(&event)).unwrap();
                    // Keep the buffers empty so every delivery succeeds
                    for rx in &receivers[..10] {
                        let _ = rx.try_recv();
                    }
                    report
                });
            },
        );
    }

    group.finish();
}

/// Benchmark a full catch-up page over a log shared by several organizations
fn bench_catch_up(c: &mut Criterion) {
    let mut group = c.benchmark_group("catch_up");

    for share in [1usize, 4, 16] {
        group.bench_with_input(BenchmarkId::new("org_share", share), &share, |b, &share| {
            let log = Arc::new(InMemoryActivityLog::new());
            for i in 1..=5_000usize {
                log.append(membership_event(i, i % share)).unwrap();
            }
            let hub = hub(&log);
            let request = StreamRequest::catch_up(StreamOffset::Beginning);

            b.iter(|| hub.catch_up(context(0, 0), black_box(&request)).unwrap());
        });
    }

    group.finish();
}

/// Benchmark conflict checks against wide entities
fn bench_conflict_check(c: &mut Criterion) {
    let mut group = c.benchmark_group("conflict_check");

    for width in [10, 100, 1000] {
        let fields: Vec<String> = (0..width).map(|i| format!("field_{i}")).collect();
        let map = build_field_versions(
            &FieldVersionMap::new(),
            fields.as_slice(),
            &TransactionId::new("1000.0.seed"),
        );
        let expectations: BTreeMap<String, TransactionId> = fields
            .iter()
            .map(|f| (f.clone(), TransactionId::new("1000.0.seed")))
            .collect();

        group.bench_with_input(BenchmarkId::new("fields", width), &width, |b, _| {
            b.iter(|| check_field_conflicts(black_box(fields.as_slice()), &map, &expectations));
        });
    }

    group.finish();
}

criterion_group!(
    benches,
    bench_dispatch_fan_out,
    bench_catch_up,
    bench_conflict_check
);
criterion_main!(benches);
