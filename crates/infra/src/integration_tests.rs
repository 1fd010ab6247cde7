//! End-to-end tests for the recovery pipeline.
//!
//! Tests: signed event → EventGateway → store → CampaignEngine → mocks
//!
//! Verifies:
//! - Duplicate events and duplicate sends have no extra effect
//! - Retries follow the backoff table and end the campaign when exhausted
//! - Late results never reopen a closed campaign

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration as StdDuration;

    use chrono::{DateTime, Duration, TimeZone, Timelike, Utc};
    use serde_json::json;

    use payrecover_campaigns::{
        AttemptKind, AttemptStatus, CampaignStatus, DunningSequence, FailureClassification,
        PREFERRED_HOURS, WIN_BACK_STEP,
    };
    use payrecover_content::{FallbackContentGenerator, TemplateContentGenerator};
    use payrecover_core::CampaignId;
    use payrecover_events::SignatureVerifier;

    use crate::config::EngineConfig;
    use crate::engine::scanner::scan_once;
    use crate::engine::{
        CampaignCommand, CampaignEngine, CommandOutcome, CommandQueue, DunningSequencer,
        EventGateway, MessageOutcome, MessageSettings, RetryExecutor, RetryOutcome, SharedEngine,
    };
    use crate::error::RecoveryError;
    use crate::external::{
        DeliveryError, MockMessageDelivery, MockPaymentProcessor,
    };
    use crate::store::{CampaignStore, InMemoryCampaignStore, SharedStore};

    const SECRET: &str = "whsec_test";

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 2, 9, 0, 0).unwrap()
    }

    struct Harness {
        store: SharedStore,
        engine: SharedEngine,
        gateway: EventGateway,
        verifier: SignatureVerifier,
        processor: Arc<MockPaymentProcessor>,
        delivery: Arc<MockMessageDelivery>,
    }

    fn harness(processor: MockPaymentProcessor, delivery: MockMessageDelivery) -> Harness {
        let config = EngineConfig::new(SECRET);
        let store: SharedStore = Arc::new(InMemoryCampaignStore::new());
        let processor = Arc::new(processor);
        let delivery = Arc::new(delivery);
        let content = Arc::new(FallbackContentGenerator::template_only(
            TemplateContentGenerator::new().with_business_name("Acme"),
        ));

        let executor = RetryExecutor::new(
            store.clone(),
            processor.clone(),
            config.retry_policy(),
            config.processor_timeout,
            config.lease_ttl,
        );
        let sequencer = DunningSequencer::new(
            store.clone(),
            delivery.clone(),
            content,
            DunningSequence::default(),
            MessageSettings {
                business_name: "Acme".into(),
                from_address: "billing@acme.test".into(),
                payment_update_url: Some("https://acme.test/pay/{invoice}".into()),
            },
            config.delivery_timeout,
            config.lease_ttl,
        );
        let engine = Arc::new(CampaignEngine::new(store.clone(), executor, sequencer));
        let verifier = SignatureVerifier::new(SECRET, config.signature_tolerance).unwrap();
        let gateway = EventGateway::new(
            store.clone(),
            verifier.clone(),
            config.retry_policy(),
            DunningSequence::default(),
            config.dedup_ttl,
        );

        Harness {
            store,
            engine,
            gateway,
            verifier,
            processor,
            delivery,
        }
    }

    fn payment_failed(event_id: &str, invoice_ref: &str, failure_code: &str) -> Vec<u8> {
        json!({
            "id": event_id,
            "created": t0().timestamp(),
            "type": "payment-failed",
            "data": {
                "invoice_ref": invoice_ref,
                "customer_ref": "cus_1",
                "subscription_ref": "sub_1",
                "customer_email": "ada@example.com",
                "customer_name": "Ada",
                "amount_due": 7900,
                "currency": "usd",
                "failure_code": failure_code
            }
        })
        .to_string()
        .into_bytes()
    }

    fn payment_succeeded(event_id: &str, invoice_ref: &str) -> Vec<u8> {
        json!({
            "id": event_id,
            "created": t0().timestamp(),
            "type": "payment-succeeded",
            "data": { "invoice_ref": invoice_ref, "amount_paid": 7900 }
        })
        .to_string()
        .into_bytes()
    }

    fn subscription_cancelled(event_id: &str) -> Vec<u8> {
        json!({
            "id": event_id,
            "created": t0().timestamp(),
            "type": "subscription-cancelled",
            "data": { "subscription_ref": "sub_1" }
        })
        .to_string()
        .into_bytes()
    }

    impl Harness {
        async fn deliver(&self, body: &[u8], now: DateTime<Utc>) -> crate::engine::IngestOutcome {
            let signature = self.verifier.sign(now.timestamp(), body);
            self.gateway.ingest(Some(&signature), body, now).await.unwrap()
        }

        async fn open(&self, invoice_ref: &str, failure_code: &str) -> CampaignId {
            let outcome = self
                .deliver(&payment_failed(&format!("evt_{invoice_ref}"), invoice_ref, failure_code), t0())
                .await;
            outcome.commands[0].campaign_id()
        }
    }

    #[tokio::test]
    async fn duplicate_payment_failed_creates_one_campaign() {
        let h = harness(MockPaymentProcessor::declining("insufficient_funds"), MockMessageDelivery::new());
        let body = payment_failed("evt_1", "inv_1", "insufficient_funds");

        let first = h.deliver(&body, t0()).await;
        let second = h.deliver(&body, t0() + Duration::seconds(5)).await;

        assert!(!first.duplicate);
        assert_eq!(first.event_type, "payment-failed");
        assert_eq!(first.commands.len(), 1);
        assert!(second.duplicate);
        assert!(second.commands.is_empty());

        let campaign = h.store.find_by_invoice("inv_1").await.unwrap().unwrap();
        assert_eq!(campaign.status, CampaignStatus::Active);
        assert_eq!(campaign.retry_count, 0);
        assert_eq!(campaign.amount.amount_minor(), 7900);
        assert_eq!(h.store.stats().await.unwrap().total, 1);
    }

    #[tokio::test]
    async fn second_failure_for_the_same_invoice_is_a_no_op() {
        let h = harness(MockPaymentProcessor::declining("insufficient_funds"), MockMessageDelivery::new());
        h.deliver(&payment_failed("evt_1", "inv_1", "card_declined"), t0()).await;
        let again = h
            .deliver(&payment_failed("evt_2", "inv_1", "card_declined"), t0() + Duration::hours(1))
            .await;

        assert!(!again.duplicate);
        assert!(again.commands.is_empty());
        assert_eq!(h.store.stats().await.unwrap().total, 1);
    }

    #[tokio::test]
    async fn transient_decline_schedules_next_retry_at_a_preferred_hour() {
        let h = harness(MockPaymentProcessor::declining("insufficient_funds"), MockMessageDelivery::new());
        let id = h.open("inv_1", "insufficient_funds").await;
        let due = h.store.get(id).await.unwrap().next_retry_at.unwrap();

        let outcome = h
            .engine
            .dispatch(CampaignCommand::Evaluate { campaign_id: id }, due)
            .await
            .unwrap();

        let CommandOutcome::Evaluated { retry, message } = outcome else {
            panic!("expected an evaluation, got {outcome:?}");
        };
        assert!(matches!(
            retry,
            Some(RetryOutcome::Declined {
                classification: FailureClassification::InsufficientFunds,
                error: None,
                ..
            })
        ));
        assert!(matches!(message, Some(MessageOutcome::Sent { step_number: 1, .. })));

        let campaign = h.store.get(id).await.unwrap();
        assert_eq!(campaign.status, CampaignStatus::Active);
        assert_eq!(campaign.retry_count, 1);
        assert_eq!(campaign.last_step_sent, 1);
        assert!(campaign.lease_until.is_none());

        let next = campaign.next_retry_at.unwrap();
        assert!(PREFERRED_HOURS.contains(&next.hour()));
        assert_eq!(next.minute(), 0);
        assert!(next >= due + Duration::hours(2));
        assert!(next <= due + Duration::hours(28));
        assert_eq!(h.processor.calls(), vec!["inv_1".to_string()]);
    }

    #[tokio::test]
    async fn exhausted_retries_fail_the_campaign() {
        let h = harness(MockPaymentProcessor::declining("card_declined"), MockMessageDelivery::new());
        let id = h.open("inv_1", "card_declined").await;

        for _ in 0..5 {
            let campaign = h.store.get(id).await.unwrap();
            let due = campaign.next_retry_at.expect("retry scheduled while budget remains");
            h.engine
                .dispatch(CampaignCommand::Evaluate { campaign_id: id }, due)
                .await
                .unwrap();
        }

        let campaign = h.store.get(id).await.unwrap();
        assert_eq!(campaign.status, CampaignStatus::Failed);
        assert_eq!(campaign.retry_count, 5);
        assert!(campaign.next_retry_at.is_none());
        assert!(campaign.next_message_at.is_none());
        campaign.check_invariants().unwrap();

        let retries: Vec<_> = h
            .store
            .attempts(id)
            .await
            .unwrap()
            .into_iter()
            .filter(|a| a.kind == AttemptKind::Retry)
            .collect();
        assert_eq!(retries.len(), 5);
        assert!(retries.iter().all(|a| a.status == AttemptStatus::Failed));

        // A further manual retry has nothing left to spend.
        let outcome = h
            .engine
            .dispatch(CampaignCommand::Retry { campaign_id: id }, t0() + Duration::days(30))
            .await
            .unwrap();
        assert!(matches!(outcome, CommandOutcome::Skipped { .. }));
        assert_eq!(h.processor.calls().len(), 5);
    }

    #[tokio::test]
    async fn payment_succeeded_mid_campaign_stops_further_messages() {
        let h = harness(MockPaymentProcessor::declining("insufficient_funds"), MockMessageDelivery::new());
        let id = h.open("inv_1", "insufficient_funds").await;

        for hours in [5, 10] {
            h.engine
                .dispatch(CampaignCommand::Retry { campaign_id: id }, t0() + Duration::hours(hours))
                .await
                .unwrap();
        }
        assert_eq!(h.store.get(id).await.unwrap().retry_count, 2);

        let paid_at = t0() + Duration::hours(12);
        h.deliver(&payment_succeeded("evt_paid", "inv_1"), paid_at).await;

        let campaign = h.store.get(id).await.unwrap();
        assert_eq!(campaign.status, CampaignStatus::Recovered);
        assert_eq!(campaign.recovered_at, Some(paid_at));
        assert!(campaign.next_retry_at.is_none());

        let outcome = h
            .engine
            .dispatch(
                CampaignCommand::SendStep {
                    campaign_id: id,
                    step_number: Some(3),
                },
                paid_at + Duration::days(3),
            )
            .await
            .unwrap();
        assert!(matches!(
            outcome,
            CommandOutcome::Skipped {
                reason: RecoveryError::AlreadyTerminal(_),
                ..
            }
        ));
        assert!(h.delivery.sent().is_empty());
        assert!(h.store.sent_messages(id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn paid_retry_recovers_the_campaign() {
        let h = harness(MockPaymentProcessor::paying(), MockMessageDelivery::new());
        let id = h.open("inv_1", "insufficient_funds").await;

        let outcome = h
            .engine
            .dispatch(CampaignCommand::Retry { campaign_id: id }, t0() + Duration::hours(1))
            .await
            .unwrap();

        let CommandOutcome::Retry(RetryOutcome::Recovered(campaign)) = outcome else {
            panic!("expected recovery, got {outcome:?}");
        };
        assert_eq!(campaign.status, CampaignStatus::Recovered);
        assert!(campaign.recovered_at.is_some());

        let stats = h.store.stats().await.unwrap();
        assert_eq!(stats.recovered, 1);
        assert_eq!(stats.recovered_revenue.get("USD").copied(), Some(7900));
    }

    #[tokio::test]
    async fn durable_decline_stops_automatic_retries() {
        let h = harness(MockPaymentProcessor::declining("expired_card"), MockMessageDelivery::new());
        let id = h.open("inv_1", "insufficient_funds").await;

        let outcome = h
            .engine
            .dispatch(CampaignCommand::Retry { campaign_id: id }, t0() + Duration::hours(1))
            .await
            .unwrap();

        assert!(matches!(
            outcome,
            CommandOutcome::Retry(RetryOutcome::Declined {
                classification: FailureClassification::ExpiredCard,
                error: Some(RecoveryError::PermanentDecline { .. }),
                ..
            })
        ));
        let campaign = h.store.get(id).await.unwrap();
        assert_eq!(campaign.status, CampaignStatus::Active);
        assert!(campaign.next_retry_at.is_none());
        assert!(campaign.next_message_at.is_some());
    }

    #[tokio::test]
    async fn each_step_is_sent_at_most_once() {
        let h = harness(MockPaymentProcessor::declining("insufficient_funds"), MockMessageDelivery::new());
        let id = h.open("inv_1", "insufficient_funds").await;
        let send = CampaignCommand::SendStep {
            campaign_id: id,
            step_number: Some(1),
        };

        let first = h.engine.dispatch(send, t0() + Duration::hours(1)).await.unwrap();
        let second = h.engine.dispatch(send, t0() + Duration::hours(2)).await.unwrap();

        assert!(matches!(first, CommandOutcome::Message(MessageOutcome::Sent { step_number: 1, .. })));
        assert!(matches!(
            second,
            CommandOutcome::Message(MessageOutcome::AlreadySent { step_number: 1, .. })
        ));
        assert_eq!(h.delivery.sent().len(), 1);
        assert_eq!(h.store.sent_messages(id).await.unwrap().len(), 1);

        let sent = &h.delivery.sent()[0];
        assert_eq!(sent.to, "ada@example.com");
        assert!(sent.html.contains("https://acme.test/pay/inv_1"));
    }

    #[tokio::test]
    async fn out_of_order_step_is_rejected() {
        let h = harness(MockPaymentProcessor::declining("insufficient_funds"), MockMessageDelivery::new());
        let id = h.open("inv_1", "insufficient_funds").await;

        let err = h
            .engine
            .dispatch(
                CampaignCommand::SendStep {
                    campaign_id: id,
                    step_number: Some(3),
                },
                t0() + Duration::hours(1),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, RecoveryError::Validation(_)));
        assert!(h.delivery.sent().is_empty());
    }

    #[tokio::test]
    async fn delivery_failure_consumes_the_step() {
        let h = harness(
            MockPaymentProcessor::declining("insufficient_funds"),
            MockMessageDelivery::failing(DeliveryError::Unavailable("smtp down".into())),
        );
        let id = h.open("inv_1", "insufficient_funds").await;

        let outcome = h
            .engine
            .dispatch(
                CampaignCommand::SendStep {
                    campaign_id: id,
                    step_number: None,
                },
                t0() + Duration::hours(4),
            )
            .await
            .unwrap();

        assert!(matches!(
            outcome,
            CommandOutcome::Message(MessageOutcome::Failed {
                step_number: 1,
                error: RecoveryError::DeliveryFailure(_),
                ..
            })
        ));
        let campaign = h.store.get(id).await.unwrap();
        assert_eq!(campaign.last_step_sent, 1);
        assert!(campaign.lease_until.is_none());
        assert_eq!(h.store.stats().await.unwrap().messages_failed, 1);
    }

    #[tokio::test]
    async fn cancelled_subscription_gets_one_win_back() {
        let h = harness(MockPaymentProcessor::declining("insufficient_funds"), MockMessageDelivery::new());
        let id = h.open("inv_1", "insufficient_funds").await;

        let ingest = h
            .deliver(&subscription_cancelled("evt_cancel"), t0() + Duration::hours(2))
            .await;
        assert_eq!(ingest.commands, vec![CampaignCommand::WinBack { campaign_id: id }]);
        assert_eq!(h.store.get(id).await.unwrap().status, CampaignStatus::Cancelled);

        let now = t0() + Duration::hours(3);
        let first = h.engine.dispatch(ingest.commands[0], now).await.unwrap();
        let second = h.engine.dispatch(ingest.commands[0], now).await.unwrap();

        assert!(matches!(
            first,
            CommandOutcome::Message(MessageOutcome::Sent { step_number: WIN_BACK_STEP, .. })
        ));
        assert!(matches!(
            second,
            CommandOutcome::Message(MessageOutcome::AlreadySent { .. })
        ));
        assert_eq!(h.delivery.sent().len(), 1);
        assert_eq!(h.store.get(id).await.unwrap().status, CampaignStatus::Cancelled);
    }

    #[tokio::test]
    async fn unsigned_or_tampered_events_are_rejected() {
        let h = harness(MockPaymentProcessor::paying(), MockMessageDelivery::new());
        let body = payment_failed("evt_1", "inv_1", "insufficient_funds");

        let missing = h.gateway.ingest(None, &body, t0()).await.unwrap_err();
        assert!(matches!(missing, RecoveryError::Authentication(_)));

        let signature = h.verifier.sign(t0().timestamp(), b"{}");
        let tampered = h.gateway.ingest(Some(&signature), &body, t0()).await.unwrap_err();
        assert!(matches!(tampered, RecoveryError::Authentication(_)));

        assert!(h.store.find_by_invoice("inv_1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn unknown_event_type_is_a_validation_error() {
        let h = harness(MockPaymentProcessor::paying(), MockMessageDelivery::new());
        let body = json!({
            "id": "evt_x",
            "created": t0().timestamp(),
            "type": "invoice-finalized",
            "data": {}
        })
        .to_string()
        .into_bytes();
        let signature = h.verifier.sign(t0().timestamp(), &body);

        let err = h.gateway.ingest(Some(&signature), &body, t0()).await.unwrap_err();
        assert!(matches!(err, RecoveryError::Validation(_)));
    }

    #[tokio::test]
    async fn late_charge_result_does_not_reopen_a_cancelled_campaign() {
        let h = harness(
            MockPaymentProcessor::paying().with_delay(StdDuration::from_millis(200)),
            MockMessageDelivery::new(),
        );
        let id = h.open("inv_1", "insufficient_funds").await;
        let now = t0() + Duration::hours(1);

        let engine = h.engine.clone();
        let retry = tokio::spawn(async move {
            engine
                .dispatch(CampaignCommand::Retry { campaign_id: id }, now)
                .await
        });
        tokio::time::sleep(StdDuration::from_millis(50)).await;
        let cancelled = h
            .engine
            .dispatch(CampaignCommand::Cancel { campaign_id: id }, now)
            .await
            .unwrap();
        assert!(matches!(cancelled, CommandOutcome::Cancelled(_)));

        let outcome = retry.await.unwrap().unwrap();
        assert!(matches!(outcome, CommandOutcome::Retry(RetryOutcome::Superseded(_))));
        let campaign = h.store.get(id).await.unwrap();
        assert_eq!(campaign.status, CampaignStatus::Cancelled);
        assert!(campaign.recovered_at.is_none());
    }

    #[tokio::test]
    async fn scan_enqueues_due_campaigns() {
        let h = harness(MockPaymentProcessor::declining("insufficient_funds"), MockMessageDelivery::new());
        h.open("inv_1", "insufficient_funds").await;
        h.open("inv_2", "insufficient_funds").await;

        let (queue, workers) = CommandQueue::spawn(h.engine.clone(), 16, 2);
        let before = scan_once(&*h.store, &queue, 100, Duration::hours(72), t0() + Duration::minutes(1))
            .await
            .unwrap();
        let after = scan_once(&*h.store, &queue, 100, Duration::hours(72), t0() + Duration::hours(6))
            .await
            .unwrap();
        workers.shutdown().await;

        assert_eq!(before, 0);
        assert_eq!(after, 2);
    }

    #[tokio::test]
    async fn durable_decline_without_recipient_fails_at_once() {
        let h = harness(MockPaymentProcessor::declining("expired_card"), MockMessageDelivery::new());
        let body = json!({
            "id": "evt_no_email",
            "created": t0().timestamp(),
            "type": "payment-failed",
            "data": {
                "invoice_ref": "inv_no_email",
                "customer_ref": "cus_1",
                "amount_due": 7900,
                "currency": "usd",
                "failure_code": "expired_card"
            }
        })
        .to_string()
        .into_bytes();

        let outcome = h.deliver(&body, t0()).await;
        assert!(outcome.commands.is_empty());

        let campaign = h.store.find_by_invoice("inv_no_email").await.unwrap().unwrap();
        assert_eq!(campaign.status, CampaignStatus::Failed);
        assert!(campaign.next_retry_at.is_none());
        assert!(campaign.next_message_at.is_none());
        campaign.check_invariants().unwrap();

        let due = h.store.list_active_due(t0() + Duration::days(365), 100).await.unwrap();
        assert!(due.is_empty());
        assert_eq!(h.store.stats().await.unwrap().active, 0);
        assert!(h.processor.calls().is_empty());
    }

    #[tokio::test]
    async fn concurrent_retries_on_one_campaign_charge_once() {
        let h = harness(
            MockPaymentProcessor::declining("insufficient_funds")
                .with_delay(StdDuration::from_millis(100)),
            MockMessageDelivery::new(),
        );
        let id = h.open("inv_1", "insufficient_funds").await;
        let now = t0() + Duration::hours(1);

        let (first, second) = tokio::join!(
            h.engine.dispatch(CampaignCommand::Retry { campaign_id: id }, now),
            h.engine.dispatch(CampaignCommand::Retry { campaign_id: id }, now),
        );
        let outcomes = [first.unwrap(), second.unwrap()];

        let skipped = outcomes
            .iter()
            .filter(|o| matches!(o, CommandOutcome::Skipped { .. }))
            .count();
        let declined = outcomes
            .iter()
            .filter(|o| matches!(o, CommandOutcome::Retry(RetryOutcome::Declined { .. })))
            .count();
        assert_eq!(skipped, 1);
        assert_eq!(declined, 1);

        assert_eq!(h.processor.calls().len(), 1);
        let campaign = h.store.get(id).await.unwrap();
        assert_eq!(campaign.retry_count, 1);
        assert!(campaign.lease_until.is_none());
    }
}
