//! Tracing interceptor for terminal operations.
//!
//! When tracing is enabled in [`TraceConfig`] and the operation's [`OpContext`] carries an
//! enabled parent span, every terminal operation runs inside a child span named `mongodb`
//! tagged with the database, collection, method, and the operation's parameters.
//! Otherwise no span is constructed at all and the operation future is awaited as-is.

use bson::Bson;
use serde::{Deserialize, Serialize};
use std::future::Future;
use tracing::{Instrument, Span, field::Empty};

use crate::context::OpContext;

/// Tracing switch injected into a store at construction time.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TraceConfig {
    /// Whether terminal operations open child spans.
    #[serde(default)]
    pub enabled: bool,
}

impl TraceConfig {
    pub fn enabled() -> Self {
        Self { enabled: true }
    }

    pub fn disabled() -> Self {
        Self { enabled: false }
    }
}

/// Records operation parameters onto a freshly started span.
pub(crate) struct SpanTags<'a> {
    span: &'a Span,
}

impl SpanTags<'_> {
    /// Records `value` as relaxed extended JSON under `key`.
    ///
    /// `key` must be one of the fields declared in [`start_span`]; others are dropped.
    pub(crate) fn tag(&self, key: &'static str, value: impl Into<Bson>) -> &Self {
        let rendered = value
            .into()
            .into_relaxed_extjson()
            .to_string();
        self.span.record(key, rendered.as_str());
        self
    }
}

/// Starts the child span for one terminal operation, or returns `None` when tracing is off
/// or the context has no parent. `tags` only runs when a span was created.
pub(crate) fn start_span(
    config: &TraceConfig,
    ctx: &OpContext,
    database: &str,
    collection: &str,
    method: &'static str,
    tags: impl FnOnce(&SpanTags<'_>),
) -> Option<Span> {
    if !config.enabled {
        return None;
    }
    let parent = ctx.parent()?;

    let span = tracing::info_span!(
        parent: parent,
        "mongodb",
        otel.kind = "client",
        peer.service = "mongodb",
        db.name = database,
        db.collection = collection,
        db.method = method,
        filter = Empty,
        sort = Empty,
        skip = Empty,
        limit = Empty,
        fields = Empty,
        data = Empty,
        update = Empty,
        pipeline = Empty,
        keys = Empty,
        options = Empty,
        index_name = Empty,
    );
    tags(&SpanTags { span: &span });

    Some(span)
}

/// Runs `operation` inside `span` when there is one. The span closes when the future completes.
pub(crate) async fn traced<F: Future>(span: Option<Span>, operation: F) -> F::Output {
    match span {
        Some(span) => operation.instrument(span).await,
        None => operation.await,
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use bson::doc;
    use std::{
        collections::HashMap,
        sync::{Arc, Mutex},
    };
    use tracing::{
        Subscriber,
        field::{Field, Visit},
        span::{Attributes, Id, Record},
    };
    use tracing_subscriber::{
        layer::{Context, SubscriberExt},
        registry::LookupSpan,
        Layer,
    };

    /// A span seen by [`SpanRecorder`], with its recorded field values.
    #[derive(Debug, Clone, Default)]
    pub(crate) struct RecordedSpan {
        pub name: String,
        pub fields: HashMap<String, String>,
    }

    struct FieldCollector<'a>(&'a mut HashMap<String, String>);

    impl Visit for FieldCollector<'_> {
        fn record_str(&mut self, field: &Field, value: &str) {
            self.0.insert(field.name().to_string(), value.to_string());
        }

        fn record_debug(&mut self, field: &Field, value: &dyn std::fmt::Debug) {
            self.0.insert(field.name().to_string(), format!("{value:?}"));
        }
    }

    /// Layer that keeps every span it sees, keyed by span id.
    #[derive(Clone, Default)]
    pub(crate) struct SpanRecorder {
        spans: Arc<Mutex<Vec<(u64, RecordedSpan)>>>,
    }

    impl SpanRecorder {
        pub(crate) fn named(&self, name: &str) -> Vec<RecordedSpan> {
            self.spans
                .lock()
                .unwrap()
                .iter()
                .filter(|(_, span)| span.name == name)
                .map(|(_, span)| span.clone())
                .collect()
        }
    }

    impl<S> Layer<S> for SpanRecorder
    where
        S: Subscriber + for<'a> LookupSpan<'a>,
    {
        fn on_new_span(&self, attrs: &Attributes<'_>, id: &Id, _ctx: Context<'_, S>) {
            let mut span = RecordedSpan {
                name: attrs.metadata().name().to_string(),
                ..Default::default()
            };
            attrs.record(&mut FieldCollector(&mut span.fields));
            self.spans.lock().unwrap().push((id.into_u64(), span));
        }

        fn on_record(&self, id: &Id, values: &Record<'_>, _ctx: Context<'_, S>) {
            let mut spans = self.spans.lock().unwrap();
            if let Some((_, span)) = spans
                .iter_mut()
                .find(|(span_id, _)| *span_id == id.into_u64())
            {
                values.record(&mut FieldCollector(&mut span.fields));
            }
        }
    }

    #[test]
    fn disabled_config_creates_no_span() {
        let recorder = SpanRecorder::default();
        let subscriber = tracing_subscriber::registry().with(recorder.clone());
        let _guard = tracing::subscriber::set_default(subscriber);

        let parent = tracing::info_span!("request");
        let ctx = OpContext::with_parent(parent);
        let span = start_span(&TraceConfig::disabled(), &ctx, "app", "users", "Count", |_| {
            panic!("tags must not be computed when tracing is disabled")
        });

        assert!(span.is_none());
        assert!(recorder.named("mongodb").is_empty());
    }

    #[test]
    fn missing_parent_creates_no_span() {
        let recorder = SpanRecorder::default();
        let subscriber = tracing_subscriber::registry().with(recorder.clone());
        let _guard = tracing::subscriber::set_default(subscriber);

        let span = start_span(
            &TraceConfig::enabled(),
            &OpContext::background(),
            "app",
            "users",
            "Count",
            |_| panic!("tags must not be computed without a parent span"),
        );

        assert!(span.is_none());
        assert!(recorder.named("mongodb").is_empty());
    }

    #[test]
    fn child_span_carries_operation_tags() {
        let recorder = SpanRecorder::default();
        let subscriber = tracing_subscriber::registry().with(recorder.clone());
        let _guard = tracing::subscriber::set_default(subscriber);

        let parent = tracing::info_span!("request");
        let ctx = OpContext::with_parent(parent);
        let span = start_span(&TraceConfig::enabled(), &ctx, "app", "users", "FindOne", |tags| {
            tags.tag("filter", doc! { "name": "pi" })
                .tag("skip", 3_i64);
        });

        assert!(span.is_some());

        let spans = recorder.named("mongodb");
        assert_eq!(spans.len(), 1);
        assert_eq!(spans[0].fields["db.name"], "app");
        assert_eq!(spans[0].fields["db.collection"], "users");
        assert_eq!(spans[0].fields["db.method"], "FindOne");
        assert_eq!(spans[0].fields["filter"], r#"{"name":"pi"}"#);
        assert_eq!(spans[0].fields["skip"], "3");
    }
}
