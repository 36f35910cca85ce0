//! Unit tests for the queue module

#[cfg(test)]
mod tests {
    use crate::queue::BoundedQueue;
    use tokio_util::sync::CancellationToken;

    #[test]
    fn test_overflow_drops_incoming_items() {
        let queue = BoundedQueue::new(16);

        let accepted = (0..20).filter(|&i| queue.try_enqueue(i)).count();
        assert_eq!(accepted, 16);
        assert_eq!(queue.len(), 16);

        let mut consumer = queue.consumer().unwrap();
        let drained: Vec<i32> = std::iter::from_fn(|| consumer.try_next()).collect();
        assert_eq!(drained, (0..16).collect::<Vec<_>>());
    }

    #[test]
    fn test_default_capacity() {
        let queue = BoundedQueue::<u8>::default();
        assert_eq!(queue.capacity(), 16);
        assert!(queue.is_empty());
    }

    #[test]
    fn test_only_one_consumer_at_a_time() {
        let queue = BoundedQueue::<u8>::new(4);

        let first = queue.consumer();
        assert!(first.is_some());
        assert!(queue.consumer().is_none());

        drop(first);
        assert!(queue.consumer().is_some());
    }

    #[test]
    fn test_items_survive_consumer_handover() {
        let queue = BoundedQueue::new(4);
        queue.try_enqueue("a");
        queue.try_enqueue("b");

        {
            let mut consumer = queue.consumer().unwrap();
            assert_eq!(consumer.try_next(), Some("a"));
        }

        let mut consumer = queue.consumer().unwrap();
        assert_eq!(consumer.try_next(), Some("b"));
        assert_eq!(consumer.try_next(), None);
    }

    #[tokio::test]
    async fn test_next_returns_none_on_cancel() {
        let queue = BoundedQueue::<u8>::new(4);
        let mut consumer = queue.consumer().unwrap();
        let cancel = CancellationToken::new();
        cancel.cancel();

        assert_eq!(consumer.next(&cancel).await, None);
    }

    #[tokio::test]
    async fn test_cancel_wins_over_pending_item() {
        let queue = BoundedQueue::new(4);
        queue.try_enqueue(1);
        let mut consumer = queue.consumer().unwrap();
        let cancel = CancellationToken::new();
        cancel.cancel();

        assert_eq!(consumer.next(&cancel).await, None);
        assert_eq!(queue.len(), 1);
    }

    #[test]
    fn test_next_pends_until_item_arrives() {
        let queue = BoundedQueue::new(4);
        let mut consumer = queue.consumer().unwrap();
        let cancel = CancellationToken::new();

        let mut next = tokio_test::task::spawn(consumer.next(&cancel));
        tokio_test::assert_pending!(next.poll());

        queue.try_enqueue(42);
        assert!(next.is_woken());
        tokio_test::assert_ready_eq!(next.poll(), Some(42));
    }

    #[tokio::test]
    async fn test_next_waits_for_producer() {
        let queue = std::sync::Arc::new(BoundedQueue::new(4));
        let mut consumer = queue.consumer().unwrap();
        let cancel = CancellationToken::new();

        let producer = queue.clone();
        tokio::spawn(async move {
            tokio::time::sleep(std::time::Duration::from_millis(20)).await;
            producer.try_enqueue(42);
        });

        assert_eq!(consumer.next(&cancel).await, Some(42));
    }
}
