use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;
use std::time::Duration;

use commlink::{MailboxConfig, Message, MessageBody, OverflowPolicy, Source, mailbox};
use proptest::prelude::*;

fn tagged(producer: u32, seq: u32) -> Message {
    Message::custom(Source::Application, producer, seq)
}

fn decode(message: &Message) -> (u32, u32) {
    match message.body() {
        MessageBody::Custom(custom) => (custom.tag(), *custom.downcast_ref::<u32>().unwrap()),
        other => panic!("unexpected body {other:?}"),
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn every_post_drained_once_in_producer_order(counts in prop::collection::vec(0u32..200, 1..6)) {
        let (poster, mut inbox) = mailbox(MailboxConfig::default());
        let handles: Vec<_> = counts
            .iter()
            .enumerate()
            .map(|(producer, &count)| {
                let poster = poster.clone();
                let producer = u32::try_from(producer).unwrap();
                thread::spawn(move || {
                    for seq in 0..count {
                        assert!(poster.post(tagged(producer, seq)).is_queued());
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        let drained = inbox.drain_all();
        let total: u32 = counts.iter().sum();
        prop_assert_eq!(drained.len(), total as usize);

        let mut next: HashMap<u32, u32> = HashMap::new();
        let mut last_sequence = 0;
        for message in &drained {
            prop_assert!(message.sequence() > last_sequence);
            last_sequence = message.sequence();
            let (producer, seq) = decode(message);
            let expected = next.entry(producer).or_insert(0);
            prop_assert_eq!(seq, *expected);
            *expected += 1;
        }
        prop_assert_eq!(poster.dropped(), 0);
    }
}

#[test]
fn drop_oldest_keeps_latest_two() {
    let (poster, mut inbox) = mailbox(MailboxConfig::bounded(2, OverflowPolicy::DropOldest));
    for seq in 0..3 {
        poster.post(tagged(0, seq));
    }
    let kept: Vec<_> = inbox.drain_all().iter().map(decode).collect();
    assert_eq!(kept, vec![(0, 1), (0, 2)]);
    assert_eq!(poster.dropped(), 1);
}

#[test]
fn blocking_producers_and_consumer_thread() {
    let config = MailboxConfig::bounded(
        4,
        OverflowPolicy::Block {
            timeout: Duration::from_secs(5),
        },
    );
    let (poster, mut inbox) = mailbox(config);
    let received = Arc::new(AtomicUsize::new(0));

    let consumer = {
        let received = Arc::clone(&received);
        thread::spawn(move || {
            while received.load(Ordering::SeqCst) < 300 {
                if inbox.drain_one(Duration::from_secs(1)).is_some() {
                    received.fetch_add(1, Ordering::SeqCst);
                } else {
                    break;
                }
            }
        })
    };

    let producers: Vec<_> = (0..3)
        .map(|producer| {
            let poster = poster.clone();
            thread::spawn(move || {
                for seq in 0..100 {
                    assert!(poster.post(tagged(producer, seq)).is_queued());
                }
            })
        })
        .collect();
    for producer in producers {
        producer.join().unwrap();
    }
    consumer.join().unwrap();
    assert_eq!(received.load(Ordering::SeqCst), 300);
    assert_eq!(poster.dropped(), 0);
}
