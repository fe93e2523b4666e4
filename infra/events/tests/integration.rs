pub mod fixtures;

#[cfg(test)]
mod synchronous {
    use super::fixtures::*;
    use minibus::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    #[test]
    fn test_resubscribe_does_not_multiply_delivery() {
        let bus = EventBus::<Message>::synchronous();
        let (handler, hits) = counting("tick");

        assert!(bus.subscribe_dyn(&handler));
        assert!(!bus.subscribe_dyn(&handler));
        assert!(!bus.subscribe_dyn(&handler));
        bus.publish(Message::new("tick")).unwrap();

        assert_eq!(hits.load(Ordering::SeqCst), 1);
        assert_eq!(bus.subscriber_count(), 1);
    }

    #[test]
    fn test_unsubscribe_halts_delivery() {
        let bus = EventBus::<Message>::synchronous();
        let (handler, hits) = counting("tick");
        bus.subscribe_dyn(&handler);

        bus.publish(Message::new("tick")).unwrap();
        assert!(bus.unsubscribe(&handler));
        assert!(!bus.unsubscribe(&handler), "second unsubscribe is a no-op");
        bus.publish(Message::new("tick")).unwrap();

        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_exact_affinity_is_isolated() {
        let bus = EventBus::<Message>::synchronous();
        let (on_a, a_hits) = counting("A");
        let (on_b, b_hits) = counting("B");
        bus.subscribe_dyn(&on_a);
        bus.subscribe_dyn(&on_b);

        for kind in ["A", "A", "C"] {
            bus.publish(Message::new(kind)).unwrap();
        }

        assert_eq!(a_hits.load(Ordering::SeqCst), 2);
        assert_eq!(b_hits.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_catch_all_predicate_routing() {
        let bus = EventBus::<Message>::synchronous();
        let (on_a, a_hits) = counting("A");
        let (on_b, b_hits) = counting("B");
        let wildcard = Recorder::new(&["B", "C", "D"]);
        bus.subscribe_dyn(&on_a);
        bus.subscribe_dyn(&on_b);
        bus.subscribe(&wildcard);

        for kind in ["A", "B", "C", "D"] {
            bus.publish(Message::new(kind)).unwrap();
        }

        assert_eq!(wildcard.seen(), ["B", "C", "D"]);
        assert_eq!(a_hits.load(Ordering::SeqCst), 1);
        assert_eq!(b_hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_publish_returns_after_all_handlers_ran() {
        let bus = EventBus::<Message>::synchronous();
        let handlers: Vec<_> = (0..8).map(|_| counting("work")).collect();
        for (handler, _) in &handlers {
            bus.subscribe_dyn(handler);
        }

        bus.publish(Message::new("work")).unwrap();

        for (_, hits) in &handlers {
            assert_eq!(hits.load(Ordering::SeqCst), 1);
        }
        assert!(!bus.has_pending_events());
    }

    #[test]
    fn test_failing_handler_does_not_block_others() {
        let bus = EventBus::<Message>::synchronous();
        let broken = failing("job");
        let panicking: Arc<dyn Handler<Message>> =
            Arc::new(FnHandler::exact("job", |_: &Message| -> anyhow::Result<()> { panic!("boom") }));
        let (healthy, hits) = counting("job");
        bus.subscribe_dyn(&broken);
        bus.subscribe_dyn(&panicking);
        bus.subscribe_dyn(&healthy);

        for _ in 0..3 {
            bus.publish(Message::new("job")).expect("handler failures never reach the publisher");
        }

        assert_eq!(hits.load(Ordering::SeqCst), 3);
        assert!(!bus.has_pending_events());
    }

    #[test]
    fn test_pending_only_while_publishing() {
        let bus = EventBus::<Message>::synchronous();
        let observed = Arc::new(AtomicBool::new(false));

        let probe = bus.clone();
        let flag = Arc::clone(&observed);
        let handler = Arc::new(FnHandler::exact("probe", move |_: &Message| {
            flag.store(probe.has_pending_events(), Ordering::SeqCst);
            Ok(())
        }));
        bus.subscribe(&handler);

        assert!(!bus.has_pending_events());
        bus.publish(Message::new("probe")).unwrap();
        assert!(observed.load(Ordering::SeqCst));
        assert!(!bus.has_pending_events());
    }

    #[test]
    fn test_dropped_handler_is_reclaimed() {
        let bus = EventBus::<Message>::synchronous();
        let (kept, kept_hits) = counting("evt");
        let (dropped, dropped_hits) = counting("evt");
        bus.subscribe_dyn(&kept);
        bus.subscribe_dyn(&dropped);
        drop(dropped);

        bus.publish(Message::new("evt")).unwrap();
        assert_eq!(dropped_hits.load(Ordering::SeqCst), 0);
        assert_eq!(kept_hits.load(Ordering::SeqCst), 1);

        bus.publish(Message::new("evt")).unwrap();
        assert_eq!(bus.subscriber_count(), 1);
    }

    #[test]
    fn test_prune_removes_dropped_handlers() {
        let bus = EventBus::<Message>::synchronous();
        let wildcard = Recorder::new(&["x"]);
        let (exact, _) = counting("y");
        bus.subscribe(&wildcard);
        bus.subscribe_dyn(&exact);
        drop(wildcard);
        drop(exact);

        assert_eq!(bus.subscriber_count(), 2);
        assert_eq!(bus.prune(), 2);
        assert_eq!(bus.subscriber_count(), 0);
        assert_eq!(bus.prune(), 0);
    }

    #[test]
    fn test_handler_may_unsubscribe_during_dispatch() {
        let bus = EventBus::<Message>::synchronous();
        let (victim, victim_hits) = counting("evt");

        let registry_handle = bus.clone();
        let target = Arc::clone(&victim);
        let remover = Arc::new(FnHandler::exact("evt", move |_: &Message| {
            registry_handle.unsubscribe(&target);
            Ok(())
        }));
        bus.subscribe(&remover);
        bus.subscribe_dyn(&victim);

        bus.publish(Message::new("evt")).unwrap();
        bus.publish(Message::new("evt")).unwrap();

        assert_eq!(victim_hits.load(Ordering::SeqCst), 1, "already resolved for the first event");
    }

    #[test]
    fn test_message_is_locked_once_published() {
        let bus = EventBus::<Message>::synchronous();
        let saw_locked = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&saw_locked);
        let handler = Arc::new(FnHandler::exact("cfg", move |message: &Message| {
            flag.store(message.is_locked(), Ordering::SeqCst);
            Ok(())
        }));
        bus.subscribe(&handler);

        let mut message = Arc::new(Message::builder("cfg").val("retries", 3_u32).build());
        assert!(!message.is_locked());
        bus.publish_arc(Arc::clone(&message)).unwrap();

        assert!(saw_locked.load(Ordering::SeqCst));
        let message = Arc::get_mut(&mut message).expect("synchronous publish released the event");
        assert!(matches!(message.set_value("retries", 5_u32), Err(EventBusError::EventLocked { .. })));
        assert!(matches!(message.set_object(7_i64), Err(EventBusError::EventLocked { .. })));
        assert_eq!(message.value::<u32>("retries"), Some(&3));
    }

    #[test]
    fn test_shutdown_rejects_publish() {
        let bus = EventBus::<Message>::synchronous();
        let (handler, hits) = counting("evt");
        bus.subscribe_dyn(&handler);

        bus.shutdown();
        bus.shutdown();

        assert!(bus.is_closed());
        let err = bus.publish(Message::new("evt")).unwrap_err();
        assert!(matches!(err, EventBusError::Closed { .. }));
        assert_eq!(hits.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_buses_are_independent() {
        let first = EventBus::<Message>::synchronous();
        let second = EventBus::<Message>::synchronous();
        let (handler, hits) = counting("evt");
        first.subscribe_dyn(&handler);

        second.publish(Message::new("evt")).unwrap();
        assert_eq!(hits.load(Ordering::SeqCst), 0);
        assert_eq!(second.subscriber_count(), 0);

        first.publish(Message::new("evt")).unwrap();
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_concurrent_publish_and_churn() {
        const PUBLISHERS: usize = 4;
        const EVENTS: usize = 500;

        let bus = EventBus::<Message>::synchronous();
        let (stable, stable_hits) = counting("stable");
        let wildcard = Recorder::new(&["stable"]);
        bus.subscribe_dyn(&stable);
        bus.subscribe(&wildcard);

        std::thread::scope(|scope| {
            for _ in 0..PUBLISHERS {
                scope.spawn(|| {
                    for _ in 0..EVENTS {
                        bus.publish(Message::new("stable")).unwrap();
                    }
                });
            }
            for worker in 0..2 {
                let bus = &bus;
                scope.spawn(move || {
                    for round in 0..200 {
                        let (churn, _) = counting(if worker == 0 { "stable" } else { "other" });
                        let catch_all = Recorder::new(&["stable", "other"]);
                        bus.subscribe_dyn(&churn);
                        bus.subscribe(&catch_all);
                        if round % 2 == 0 {
                            bus.unsubscribe(&churn);
                        }
                        bus.publish(Message::new("other")).unwrap();
                        // Handlers are dropped here while other threads publish.
                    }
                    bus.prune();
                });
            }
        });

        assert_eq!(stable_hits.load(Ordering::SeqCst), PUBLISHERS * EVENTS);
        assert_eq!(wildcard.seen().len(), PUBLISHERS * EVENTS);
        assert!(!bus.has_pending_events());

        bus.prune();
        assert_eq!(bus.subscriber_count(), 2);
    }

    #[test]
    fn test_typed_events_route_by_enum_kind() {
        let bus = EventBus::<OrderEvent>::synchronous();
        let shipped = Arc::new(AtomicUsize::new(0));
        let total = Arc::clone(&shipped);
        let handler = Arc::new(FnHandler::exact(OrderKind::Shipped, move |order: &OrderEvent| -> anyhow::Result<()> {
            total.fetch_add(usize::try_from(order.id)?, Ordering::SeqCst);
            Ok(())
        }));
        bus.subscribe(&handler);

        bus.publish(OrderEvent { kind: OrderKind::Placed, id: 100 }).unwrap();
        bus.publish(OrderEvent { kind: OrderKind::Shipped, id: 7 }).unwrap();

        assert_eq!(shipped.load(Ordering::SeqCst), 7);
    }
}

#[cfg(test)]
mod asynchronous {
    use super::fixtures::*;
    use minibus::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, mpsc};
    use std::time::{Duration, Instant};

    const WAIT: Duration = Duration::from_secs(5);

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_eventual_delivery_with_fast_publish() {
        let bus = EventBus::<Message>::asynchronous().unwrap();
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&hits);
        let slow = Arc::new(FnHandler::exact("slow", move |_: &Message| {
            std::thread::sleep(Duration::from_millis(20));
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }));
        bus.subscribe(&slow);

        const EVENTS: usize = 50;
        let started = Instant::now();
        for _ in 0..EVENTS {
            bus.publish(Message::new("slow")).unwrap();
        }
        assert!(started.elapsed() < Duration::from_millis(20), "publish never waits for handlers");

        assert!(eventually(WAIT, || hits.load(Ordering::SeqCst) == EVENTS).await);
        assert!(eventually(WAIT, || !bus.has_pending_events()).await);
    }

    /// Runs handlers on the drain task, so an empty queue means every handler finished.
    fn inline_bus() -> EventBus<Message> {
        EventBus::<Message>::builder().asynchronous().executor(|task: Task| task()).build().unwrap()
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_resubscribe_does_not_multiply_delivery() {
        let bus = inline_bus();
        let (handler, hits) = counting("tick");

        assert!(bus.subscribe_dyn(&handler));
        assert!(!bus.subscribe_dyn(&handler));
        assert!(!bus.subscribe_dyn(&handler));
        for _ in 0..5 {
            bus.publish(Message::new("tick")).unwrap();
        }

        assert!(eventually(WAIT, || !bus.has_pending_events()).await);
        assert_eq!(hits.load(Ordering::SeqCst), 5);
        assert_eq!(bus.subscriber_count(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_unsubscribe_halts_delivery() {
        let bus = inline_bus();
        let (handler, hits) = counting("tick");
        bus.subscribe_dyn(&handler);

        bus.publish(Message::new("tick")).unwrap();
        assert!(eventually(WAIT, || !bus.has_pending_events()).await);
        assert_eq!(hits.load(Ordering::SeqCst), 1);

        assert!(bus.unsubscribe(&handler));
        for _ in 0..3 {
            bus.publish(Message::new("tick")).unwrap();
        }

        assert!(eventually(WAIT, || !bus.has_pending_events()).await);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_pending_while_queue_is_not_drained() {
        let (open, gate) = mpsc::channel::<()>();
        let gate = parking_lot::Mutex::new(gate);
        let bus = EventBus::<Message>::builder()
            .asynchronous()
            .executor(move |task: Task| {
                let _ = gate.lock().recv();
                task();
            })
            .build()
            .unwrap();
        let (handler, hits) = counting("gated");
        bus.subscribe_dyn(&handler);

        bus.publish(Message::new("gated")).unwrap();
        assert!(bus.has_pending_events());

        open.send(()).unwrap();
        assert!(eventually(WAIT, || !bus.has_pending_events()).await);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_failure_isolation_on_executor() {
        let bus = EventBus::<Message>::asynchronous().unwrap();
        let broken = failing("job");
        let (healthy, hits) = counting("job");
        bus.subscribe_dyn(&broken);
        bus.subscribe_dyn(&healthy);

        for _ in 0..10 {
            bus.publish(Message::new("job")).unwrap();
        }

        assert!(eventually(WAIT, || hits.load(Ordering::SeqCst) == 10).await);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_catch_all_routing_is_shared_by_both_modes() {
        let bus = EventBus::<Message>::asynchronous().unwrap();
        let wildcard = Recorder::new(&["B", "C", "D"]);
        bus.subscribe(&wildcard);

        for kind in ["A", "B", "C", "D"] {
            bus.publish(Message::new(kind)).unwrap();
        }

        assert!(eventually(WAIT, || wildcard.seen().len() == 3).await);
        let mut seen = wildcard.seen();
        seen.sort();
        assert_eq!(seen, ["B", "C", "D"]);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_idle_sweep_reclaims_dropped_handlers() {
        let bus = EventBus::<Message>::builder()
            .asynchronous()
            .reclaim_interval(Duration::from_millis(10))
            .build()
            .unwrap();
        let (handler, _) = counting("evt");
        bus.subscribe_dyn(&handler);
        assert_eq!(bus.subscriber_count(), 1);

        drop(handler);
        assert!(eventually(WAIT, || bus.subscriber_count() == 0).await);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_shutdown_stops_accepting_events() {
        let bus = EventBus::<Message>::asynchronous().unwrap();
        assert_eq!(bus.mode(), DispatchMode::Asynchronous);

        bus.shutdown();

        assert!(bus.is_closed());
        let err = bus.publish(Message::new("late")).unwrap_err();
        assert!(matches!(err, EventBusError::Closed { .. }));
        assert!(eventually(WAIT, || !bus.has_pending_events()).await);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_custom_executor_runs_every_handler() {
        let submitted = Arc::new(AtomicUsize::new(0));
        let count = Arc::clone(&submitted);
        let bus = EventBus::<Message>::builder()
            .asynchronous()
            .executor(move |task: Task| {
                count.fetch_add(1, Ordering::SeqCst);
                drop(std::thread::spawn(task));
            })
            .build()
            .unwrap();
        let (first, first_hits) = counting("evt");
        let (second, second_hits) = counting("evt");
        bus.subscribe_dyn(&first);
        bus.subscribe_dyn(&second);

        bus.publish(Message::new("evt")).unwrap();

        assert!(
            eventually(WAIT, || {
                first_hits.load(Ordering::SeqCst) == 1 && second_hits.load(Ordering::SeqCst) == 1
            })
            .await
        );
        assert_eq!(submitted.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_asynchronous_bus_needs_runtime() {
        let err = EventBus::<Message>::asynchronous().unwrap_err();
        assert!(matches!(err, EventBusError::RuntimeUnavailable { .. }));
    }
}
