//! Tests for the in-memory endpoint.

use super::*;
use crate::message::Property;
use std::time::Instant;

fn endpoint_with_visibility(timeout: Duration) -> InMemoryEndpoint {
    InMemoryEndpoint::new(InMemoryConfig {
        visibility_timeout: timeout,
    })
}

async fn publish_tagged(endpoint: &InMemoryEndpoint, body: &str, tag: &str) -> MessageId {
    endpoint
        .publish(PublishRequest::new(body).with_tag(tag))
        .await
        .unwrap()
}

mod publish_and_poll {
    use super::*;

    #[tokio::test]
    async fn test_published_message_is_delivered_with_metadata() {
        let endpoint = InMemoryEndpoint::default();
        let request = PublishRequest::new("hello")
            .with_tag("created")
            .with_message_key("order-42")
            .with_properties(&[Property::new("region", "eu")]);

        let id = endpoint.publish(request).await.unwrap();
        let batch = endpoint.poll(1, Duration::ZERO).await.unwrap();

        assert_eq!(batch.len(), 1);
        let message = &batch[0];
        assert_eq!(message.message_id, id);
        assert_eq!(message.body, "hello");
        assert_eq!(message.tag.as_deref(), Some("created"));
        assert_eq!(message.message_key.as_deref(), Some("order-42"));
        assert_eq!(message.properties.get("region").map(String::as_str), Some("eu"));
        assert_eq!(message.consumed_times, 1);
        assert!(message.publish_time.is_some());
        assert!(message.next_consume_time > message.first_consume_time);
    }

    #[tokio::test]
    async fn test_empty_poll_reports_no_message() {
        let endpoint = InMemoryEndpoint::default();

        let error = endpoint.poll(1, Duration::ZERO).await.unwrap_err();
        assert!(error.is_no_message());
    }

    #[tokio::test]
    async fn test_empty_poll_waits_for_the_full_wait() {
        let endpoint = InMemoryEndpoint::default();
        let started = Instant::now();

        let error = endpoint.poll(1, Duration::from_millis(100)).await.unwrap_err();

        assert!(error.is_no_message());
        assert!(started.elapsed() >= Duration::from_millis(90));
    }

    #[tokio::test]
    async fn test_long_poll_wakes_on_publish() {
        let endpoint = InMemoryEndpoint::default();
        let poller = endpoint.clone();
        let started = Instant::now();

        let poll = tokio::spawn(async move { poller.poll(1, Duration::from_secs(10)).await });
        tokio::time::sleep(Duration::from_millis(50)).await;
        endpoint.publish(PublishRequest::new("wake")).await.unwrap();

        let batch = poll.await.unwrap().unwrap();
        assert_eq!(batch[0].body, "wake");
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_batch_size_limits_delivery() {
        let endpoint = InMemoryEndpoint::default();
        for i in 0..5 {
            endpoint
                .publish(PublishRequest::new(format!("m{}", i)))
                .await
                .unwrap();
        }

        let first = endpoint.poll(3, Duration::ZERO).await.unwrap();
        let second = endpoint.poll(3, Duration::ZERO).await.unwrap();

        assert_eq!(first.len(), 3);
        assert_eq!(second.len(), 2);
        assert_eq!(endpoint.pending_count(), 0);
        assert_eq!(endpoint.in_flight_count(), 5);
    }
}

mod acknowledgment {
    use super::*;

    #[tokio::test]
    async fn test_acknowledge_removes_in_flight_message() {
        let endpoint = InMemoryEndpoint::default();
        endpoint.publish(PublishRequest::new("x")).await.unwrap();
        let batch = endpoint.poll(1, Duration::ZERO).await.unwrap();

        endpoint
            .acknowledge(&[batch[0].receipt_handle.clone()])
            .await
            .unwrap();

        assert_eq!(endpoint.in_flight_count(), 0);
        assert_eq!(endpoint.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_unknown_receipt_is_rejected() {
        let endpoint = InMemoryEndpoint::default();

        match endpoint.acknowledge(&[ReceiptHandle::new("bogus")]).await {
            Err(QueueError::InvalidReceipt { receipt, .. }) => assert_eq!(receipt, "bogus"),
            other => panic!("Expected InvalidReceipt, got: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_double_acknowledge_is_rejected() {
        let endpoint = InMemoryEndpoint::default();
        endpoint.publish(PublishRequest::new("x")).await.unwrap();
        let receipt = endpoint.poll(1, Duration::ZERO).await.unwrap()[0]
            .receipt_handle
            .clone();

        endpoint.acknowledge(&[receipt.clone()]).await.unwrap();
        let second = endpoint.acknowledge(&[receipt]).await;

        assert!(matches!(second, Err(QueueError::InvalidReceipt { .. })));
    }
}

mod visibility {
    use super::*;

    #[tokio::test]
    async fn test_unacknowledged_message_is_redelivered_after_timeout() {
        let endpoint = endpoint_with_visibility(Duration::from_millis(50));
        endpoint.publish(PublishRequest::new("again")).await.unwrap();

        let first = endpoint.poll(1, Duration::ZERO).await.unwrap();
        assert!(endpoint.poll(1, Duration::ZERO).await.is_err());

        tokio::time::sleep(Duration::from_millis(80)).await;
        let second = endpoint.poll(1, Duration::ZERO).await.unwrap();

        assert_eq!(second[0].message_id, first[0].message_id);
        assert_ne!(second[0].receipt_handle, first[0].receipt_handle);
        assert_eq!(second[0].consumed_times, 2);
        assert_eq!(second[0].first_consume_time, first[0].first_consume_time);
    }

    #[tokio::test]
    async fn test_expired_receipt_cannot_be_acknowledged() {
        let endpoint = endpoint_with_visibility(Duration::from_millis(30));
        endpoint.publish(PublishRequest::new("late")).await.unwrap();
        let receipt = endpoint.poll(1, Duration::ZERO).await.unwrap()[0]
            .receipt_handle
            .clone();

        tokio::time::sleep(Duration::from_millis(60)).await;

        assert!(matches!(
            endpoint.acknowledge(&[receipt]).await,
            Err(QueueError::InvalidReceipt { .. })
        ));
        assert_eq!(endpoint.pending_count(), 1);
    }

    #[tokio::test]
    async fn test_long_poll_picks_up_redelivery() {
        let endpoint = endpoint_with_visibility(Duration::from_millis(100));
        endpoint.publish(PublishRequest::new("retry")).await.unwrap();
        endpoint.poll(1, Duration::ZERO).await.unwrap();

        let redelivered = endpoint.poll(1, Duration::from_secs(5)).await.unwrap();
        assert_eq!(redelivered[0].consumed_times, 2);
    }
}

mod scheduling {
    use super::*;

    #[test]
    fn test_wait_until_due_is_never_negative() {
        let now = Timestamp::now();
        let past = Timestamp::from_millis(now.as_millis() - 1_000).unwrap();
        let future = Timestamp::from_millis(now.as_millis() + 1_500).unwrap();

        assert_eq!(until(past, now), Duration::ZERO);
        assert_eq!(until(now, now), Duration::ZERO);
        assert_eq!(until(future, now), Duration::from_millis(1_500));
    }

    #[tokio::test]
    async fn test_scheduled_message_waits_for_deliver_time() {
        let endpoint = InMemoryEndpoint::default();
        let deliver_at = Timestamp::from_datetime(
            chrono::Utc::now() + chrono::Duration::milliseconds(150),
        );
        endpoint
            .publish(PublishRequest::new("later").with_start_deliver_time(deliver_at))
            .await
            .unwrap();

        assert!(endpoint.poll(1, Duration::ZERO).await.is_err());

        let started = Instant::now();
        let batch = endpoint.poll(1, Duration::from_secs(5)).await.unwrap();
        assert_eq!(batch[0].body, "later");
        assert!(started.elapsed() >= Duration::from_millis(50));
    }

    #[tokio::test]
    async fn test_past_deliver_time_is_immediate() {
        let endpoint = InMemoryEndpoint::default();
        let deliver_at =
            Timestamp::from_datetime(chrono::Utc::now() - chrono::Duration::seconds(10));
        endpoint
            .publish(PublishRequest::new("now").with_start_deliver_time(deliver_at))
            .await
            .unwrap();

        let batch = endpoint.poll(1, Duration::ZERO).await.unwrap();
        assert_eq!(batch[0].body, "now");
    }
}

mod subscriptions {
    use super::*;

    #[tokio::test]
    async fn test_subscription_filters_by_tag() {
        let topic = InMemoryEndpoint::default();
        let orders = topic.subscribe("created||paid");

        publish_tagged(&topic, "c", "created").await;
        publish_tagged(&topic, "o", "other").await;
        publish_tagged(&topic, "p", "paid").await;

        let mut bodies: Vec<String> = orders
            .poll(16, Duration::ZERO)
            .await
            .unwrap()
            .into_iter()
            .map(|m| m.body)
            .collect();
        bodies.sort();
        assert_eq!(bodies, vec!["c", "p"]);

        let rest = topic.subscribe("*").poll(16, Duration::ZERO).await.unwrap();
        assert_eq!(rest.len(), 1);
        assert_eq!(rest[0].tag.as_deref(), Some("other"));
    }

    #[tokio::test]
    async fn test_subscribers_share_storage() {
        let topic = InMemoryEndpoint::default();
        let first = topic.subscribe("");
        let second = topic.subscribe("");

        publish_tagged(&topic, "only", "t").await;

        assert_eq!(first.poll(1, Duration::ZERO).await.unwrap().len(), 1);
        assert!(second.poll(1, Duration::ZERO).await.is_err());
        assert_eq!(topic.in_flight_count(), 1);
    }
}
