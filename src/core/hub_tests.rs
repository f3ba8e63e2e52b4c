#[cfg(test)]
mod tests {
    use crate::core::hub::EventHub;
    use serde_json::{json, Value};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn test_has_listeners() {
        let hub = EventHub::new();
        assert!(!hub.has_listeners("my.cool.event"));
        hub.on("my.cool.event", |_| Ok(Value::Bool(true)));
        assert!(hub.has_listeners("my.cool.event"));
        assert!(!hub.has_listeners("some.other.event"));
    }

    #[test]
    fn test_dispatch_returns_listener_result() {
        let hub = EventHub::new();
        hub.on("my.cool.event", |args| {
            Ok(json!(format!("from.event.{}", args[0])))
        });
        let outcome = hub.dispatch("my.cool.event", &[json!(42)]);
        assert_eq!(outcome.results, vec![Some(json!("from.event.42"))]);
        assert_eq!(outcome.errors.len(), 1);
        assert!(outcome.errors[0].is_none());
    }

    #[test]
    fn test_dispatch_multiple_listeners_in_subscription_order() {
        let hub = EventHub::new();
        hub.on("my.cool.event", |args| Ok(json!(format!("first.{}", args[0]))));
        hub.on("my.cool.event", |args| Ok(json!(format!("second.{}", args[0]))));
        let outcome = hub.dispatch("my.cool.event", &[json!(42)]);
        assert_eq!(
            outcome.results,
            vec![Some(json!("first.42")), Some(json!("second.42"))]
        );
    }

    #[test]
    fn test_listener_error_does_not_suppress_others() {
        let hub = EventHub::new();
        hub.on("my.cool.event", |_| Ok(json!(0)));
        hub.on("my.cool.event", |_| Err(anyhow::anyhow!("listener exploded")));
        hub.on("my.cool.event", |_| Ok(json!(2)));

        let outcome = hub.dispatch("my.cool.event", &[]);
        assert_eq!(
            outcome.results,
            vec![Some(json!(0)), None, Some(json!(2))]
        );
        assert!(outcome.errors[0].is_none());
        assert_eq!(
            outcome.errors[1].as_ref().map(|e| e.to_string()),
            Some("listener exploded".to_string())
        );
        assert!(outcome.errors[2].is_none());
    }

    #[test]
    fn test_dispatch_unknown_event_is_empty() {
        let hub = EventHub::new();
        let outcome = hub.dispatch("nobody.home", &[]);
        assert!(outcome.results.is_empty());
        assert!(outcome.errors.is_empty());
    }

    #[test]
    fn test_each_listener_fires_exactly_once_per_dispatch() {
        let hub = EventHub::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        hub.on("my.cool.event", move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(Value::Null)
        });
        hub.dispatch("my.cool.event", &[]);
        hub.dispatch("my.cool.event", &[]);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_reset_clears_registrations() {
        let hub = EventHub::new();
        hub.on("my.cool.event", |_| Ok(Value::Null));
        hub.reset();
        assert!(!hub.has_listeners("my.cool.event"));
        assert!(hub.dispatch("my.cool.event", &[]).results.is_empty());
    }

    #[test]
    fn test_subscription_from_many_threads() {
        let hub = Arc::new(EventHub::new());
        let mut handles = Vec::new();
        for idx in 0..10usize {
            let hub = Arc::clone(&hub);
            handles.push(std::thread::spawn(move || {
                hub.on("my.cool.event", move |_| {
                    if idx % 2 == 0 {
                        Ok(json!(idx * 2))
                    } else {
                        Err(anyhow::anyhow!("odd listener"))
                    }
                });
            }));
        }
        for handle in handles {
            handle.join().unwrap();
        }

        let outcome = hub.dispatch("my.cool.event", &[]);
        assert_eq!(outcome.results.len(), 10);
        assert_eq!(outcome.errors.len(), 10);
        let successes = outcome.results.iter().filter(|r| r.is_some()).count();
        let failures = outcome.errors.iter().filter(|e| e.is_some()).count();
        assert_eq!(successes, 5);
        assert_eq!(failures, 5);
    }
}
