//! Property-based tests for publish ordering and retention policy

use proptest::prelude::*;
use resilient_mqtt::engine::{DispatchOutcome, EnqueueOutcome, PublishQueue};
use resilient_mqtt::testing::MockTransport;
use resilient_mqtt::{EngineConfig, QoS, ResilientClient, TickOutcome};

fn qos_strategy() -> impl Strategy<Value = QoS> {
    prop_oneof![
        Just(QoS::AtMostOnce),
        Just(QoS::AtLeastOnce),
        Just(QoS::ExactlyOnce),
    ]
}

proptest! {
    #[test]
    fn reliable_publishes_delivered_in_fifo_order(
        payloads in prop::collection::vec(prop::collection::vec(any::<u8>(), 0..32), 1..40),
        depth in 1usize..8,
    ) {
        let client = ResilientClient::new(
            MockTransport::new(),
            &EngineConfig { queue_depth: depth, ..EngineConfig::default() },
        );
        client.poll_once();
        client.transport().complete_connect();

        for payload in &payloads {
            client.publish("ordered", QoS::AtLeastOnce, false, payload);
        }
        // The depth bound never applies to QoS 1
        prop_assert_eq!(client.queue_len(), payloads.len());

        while client.queue_len() > 0 {
            let tick = client.poll_once();
            prop_assert!(matches!(tick, TickOutcome::Dispatch(DispatchOutcome::InFlight(_))));
            client.transport().ack_delivery();
        }

        let sent: Vec<Vec<u8>> = client
            .transport()
            .sent()
            .into_iter()
            .map(|message| message.payload.to_vec())
            .collect();
        prop_assert_eq!(sent, payloads);
    }

    #[test]
    fn capacity_never_evicts_reliable_entries(
        publishes in prop::collection::vec(qos_strategy(), 0..60),
        depth in 0usize..10,
    ) {
        let mut queue = PublishQueue::new(depth);
        let mut reliable_accepted = Vec::new();

        for (n, qos) in publishes.iter().enumerate() {
            let len_before = queue.len();
            let outcome = queue.enqueue("t", *qos, false, &[n as u8], true);
            match (qos, outcome) {
                (QoS::AtMostOnce, EnqueueOutcome::RejectedCapacity) => {
                    prop_assert!(len_before > depth);
                    prop_assert_eq!(queue.len(), len_before);
                }
                (QoS::AtMostOnce, EnqueueOutcome::Queued(_)) => prop_assert!(len_before <= depth),
                (_, EnqueueOutcome::Queued(sequence)) => reliable_accepted.push(sequence),
                (qos, outcome) => prop_assert!(false, "{:?} gave {:?}", qos, outcome),
            }
        }

        let reliable_queued: Vec<u64> = queue
            .iter()
            .filter(|entry| entry.qos.is_acknowledged())
            .map(|entry| entry.sequence)
            .collect();
        prop_assert_eq!(reliable_queued, reliable_accepted);
    }

    #[test]
    fn reconnect_purge_keeps_reliable_order(
        publishes in prop::collection::vec(qos_strategy(), 0..40),
    ) {
        let mut queue = PublishQueue::new(usize::MAX);
        for qos in &publishes {
            queue.enqueue("t", *qos, false, b"", true);
        }
        let expected: Vec<u64> = queue
            .iter()
            .filter(|entry| entry.qos != QoS::AtMostOnce)
            .map(|entry| entry.sequence)
            .collect();

        let purged = queue.drop_all_qos0();

        prop_assert_eq!(purged, publishes.len() - expected.len());
        let remaining: Vec<u64> = queue.iter().map(|entry| entry.sequence).collect();
        prop_assert_eq!(remaining, expected);
    }

    #[test]
    fn at_most_one_dispatch_outstanding(ticks in 1usize..20) {
        let client = ResilientClient::new(MockTransport::new(), &EngineConfig::default());
        client.poll_once();
        client.transport().complete_connect();
        client.publish("a", QoS::ExactlyOnce, false, b"1");
        client.publish("b", QoS::ExactlyOnce, false, b"2");

        for _ in 0..ticks {
            client.poll_once();
        }
        prop_assert_eq!(client.transport().sent().len(), 1);
    }
}
