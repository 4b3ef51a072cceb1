use crate::Event;

/// A stage of the `before_send` pipeline.
///
/// Transforms run in the order they were added to [`ClientConfig`](crate::ClientConfig), each
/// receiving the previous stage's output. Returning `None` drops the event: no later stage runs
/// and nothing is dispatched.
///
/// Any `Fn(Event) -> Option<Event>` closure is a transform:
///
/// ```
/// # use posthog_deferred::{ClientConfig, Event};
/// let config = ClientConfig::from_api_key("api-key").before_send(|mut event: Event| {
///     if event.event == "heartbeat" {
///         return None;
///     }
///     event.properties.get_or_insert_with(Default::default).remove("email");
///     Some(event)
/// });
/// ```
pub trait BeforeSend {
    /// Rewrite `event`, or return `None` to suppress it.
    fn before_send(&self, event: Event) -> Option<Event>;
}

impl<T: Fn(Event) -> Option<Event>> BeforeSend for T {
    fn before_send(&self, event: Event) -> Option<Event> {
        self(event)
    }
}

/// Fold `event` through `transforms`, stopping at the first one that suppresses it.
pub(crate) fn apply<'a, I>(transforms: I, event: Event) -> Option<Event>
where
    I: IntoIterator<Item = &'a (dyn BeforeSend + Send + Sync + 'a)>,
{
    transforms
        .into_iter()
        .try_fold(event, |current, transform| transform.before_send(current))
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::{apply, BeforeSend};
    use crate::Event;

    fn chain<'a>(
        transforms: &'a [Box<dyn BeforeSend + Send + Sync + 'a>],
    ) -> impl Iterator<Item = &'a (dyn BeforeSend + Send + Sync + 'a)> {
        transforms.iter().map(|t| t.as_ref())
    }

    #[test]
    fn empty_chain_passes_event_through() {
        let event = Event::new("page_view", "user-1").with_property("path", "/");
        assert_eq!(apply(chain(&[]), event.clone()), Some(event));
    }

    #[test]
    fn stages_run_in_order() {
        let transforms: Vec<Box<dyn BeforeSend + Send + Sync>> = vec![
            Box::new(|e: Event| Some(e.with_property("step", "first"))),
            Box::new(|e: Event| -> Option<Event> {
                let seen = e.properties.as_ref()?.get("step")?.clone();
                Some(e.with_property("seen", seen).with_property("step", "second"))
            }),
        ];

        let out = apply(chain(&transforms), Event::new("x", "u")).unwrap();
        let props = out.properties.unwrap();
        assert_eq!(props["seen"], "first");
        assert_eq!(props["step"], "second");
    }

    #[test]
    fn suppression_short_circuits() {
        let after = AtomicUsize::new(0);
        let transforms: Vec<Box<dyn BeforeSend + Send + Sync + '_>> = vec![
            Box::new(|_: Event| -> Option<Event> { None }),
            Box::new(|e: Event| {
                after.fetch_add(1, Ordering::SeqCst);
                Some(e)
            }),
        ];

        assert_eq!(apply(chain(&transforms), Event::new("x", "u")), None);
        assert_eq!(after.load(Ordering::SeqCst), 0);
    }
}
