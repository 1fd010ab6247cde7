use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};

use chrono::{Duration, TimeZone, Utc};
use payrecover_campaigns::{
    Campaign, DunningSequence, FailureClassification, NewCampaign, RetryPolicy,
};
use payrecover_core::{CampaignId, ExpectedVersion, Money};
use payrecover_infra::store::{CampaignStore, InMemoryCampaignStore};

fn new_campaign(invoice_ref: String) -> NewCampaign {
    NewCampaign {
        invoice_ref,
        customer_ref: "cus_bench".to_string(),
        subscription_ref: None,
        customer_email: Some("bench@example.com".to_string()),
        customer_name: None,
        amount: Money::new(7900, "usd").expect("valid amount"),
        max_retries: 5,
        failure_code: Some(FailureClassification::InsufficientFunds),
        failure_message: None,
    }
}

fn bench_retry_schedule(c: &mut Criterion) {
    let mut group = c.benchmark_group("retry_schedule");
    let from = Utc.with_ymd_and_hms(2026, 3, 2, 9, 0, 0).unwrap();

    for max_retries in [1u32, 5, 10].iter() {
        let policy = RetryPolicy::default().with_max_retries(*max_retries);
        group.bench_with_input(
            BenchmarkId::from_parameter(max_retries),
            max_retries,
            |b, _| b.iter(|| black_box(policy.schedule(black_box(from)))),
        );
    }
    group.finish();
}

fn bench_campaign_transitions(c: &mut Criterion) {
    let mut group = c.benchmark_group("campaign_transitions");
    let now = Utc.with_ymd_and_hms(2026, 3, 2, 9, 0, 0).unwrap();
    let policy = RetryPolicy::default();
    let sequence = DunningSequence::default();

    group.bench_function("open_and_fail_to_exhaustion", |b| {
        b.iter(|| {
            let mut campaign = Campaign::open(
                CampaignId::new(),
                new_campaign("inv_bench".to_string()),
                now,
                &policy,
                &sequence,
            )
            .unwrap();
            while !campaign.is_terminal() {
                let change = campaign
                    .record_retry_failure(FailureClassification::CardDeclined, None, now, &policy)
                    .unwrap();
                campaign = change.apply(&campaign);
            }
            black_box(campaign)
        });
    });
    group.finish();
}

fn bench_store_updates(c: &mut Criterion) {
    let mut group = c.benchmark_group("in_memory_store_updates");
    let rt = tokio::runtime::Runtime::new().unwrap();
    let now = Utc.with_ymd_and_hms(2026, 3, 2, 9, 0, 0).unwrap();
    let policy = RetryPolicy::default();
    let sequence = DunningSequence::default();

    for campaigns in [10usize, 100, 1000].iter() {
        group.throughput(Throughput::Elements(*campaigns as u64));
        group.bench_with_input(
            BenchmarkId::from_parameter(campaigns),
            campaigns,
            |b, &campaigns| {
                b.iter(|| {
                    rt.block_on(async {
                        let store = InMemoryCampaignStore::new();
                        for i in 0..campaigns {
                            let campaign = Campaign::open(
                                CampaignId::new(),
                                new_campaign(format!("inv_{i}")),
                                now,
                                &policy,
                                &sequence,
                            )
                            .unwrap();
                            let created = store.create_if_absent(campaign).await.unwrap().campaign;
                            let lease = created.acquire_lease(now, Duration::minutes(2)).unwrap();
                            store
                                .update(created.id, ExpectedVersion::Exact(created.version), lease)
                                .await
                                .unwrap();
                        }
                        black_box(store.list_active_due(now + Duration::days(1), 50).await.unwrap())
                    })
                });
            },
        );
    }
    group.finish();
}

criterion_group!(
    benches,
    bench_retry_schedule,
    bench_campaign_transitions,
    bench_store_updates
);
criterion_main!(benches);
