//! Distributed trace context propagation.
//!
//! # Responsibilities
//! - Represent a trace context (an OpenTelemetry span context plus the
//!   parent span id)
//! - Inject/extract it in W3C or B3 header format
//! - Inject a child context into the observation carrier during `start`
//!
//! # Design Decisions
//! - Header encoding is delegated to the OpenTelemetry propagators
//!   (`TraceContextPropagator`, zipkin B3) over `HeaderInjector`/`HeaderExtractor`
//! - Ids must be lowercase hex of the exact width before a header is handed
//!   to a propagator
//! - The parent is taken from the parent observation when it has a trace
//!   context, otherwise extracted from the carrier or the received headers
//! - Injection replaces inbound values so upstream sees the gateway's span

use std::fmt;
use std::sync::Arc;

use axum::http::{HeaderMap, HeaderValue};
use opentelemetry::propagation::TextMapPropagator;
use opentelemetry::trace::{SpanContext, SpanId, TraceContextExt, TraceFlags, TraceId, TraceState};
use opentelemetry::Context;
use opentelemetry_http::{HeaderExtractor, HeaderInjector};
use opentelemetry_sdk::propagation::TraceContextPropagator;
use opentelemetry_sdk::trace::{IdGenerator, RandomIdGenerator};
use opentelemetry_zipkin::{B3Encoding, Propagator as ZipkinPropagator};

use crate::config::PropagationFormat;
use crate::observation::{Observation, ObservationHandler};

/// Trace identity of one observation.
#[derive(Debug, Clone, PartialEq)]
pub struct TraceContext {
    span_context: SpanContext,
    parent_span_id: Option<SpanId>,
}

impl TraceContext {
    /// Start a new, sampled trace.
    pub fn new_root() -> Self {
        let ids = RandomIdGenerator::default();
        Self {
            span_context: SpanContext::new(
                ids.new_trace_id(),
                ids.new_span_id(),
                TraceFlags::SAMPLED,
                false,
                TraceState::default(),
            ),
            parent_span_id: None,
        }
    }

    /// Wrap a span context received from a peer.
    pub fn remote(span_context: SpanContext) -> Self {
        Self {
            span_context,
            parent_span_id: None,
        }
    }

    /// A new span in the same trace, parented to this one.
    pub fn child(&self) -> Self {
        Self {
            span_context: SpanContext::new(
                self.span_context.trace_id(),
                RandomIdGenerator::default().new_span_id(),
                self.span_context.trace_flags(),
                false,
                self.span_context.trace_state().clone(),
            ),
            parent_span_id: Some(self.span_context.span_id()),
        }
    }

    pub fn span_context(&self) -> &SpanContext {
        &self.span_context
    }

    pub fn trace_id(&self) -> TraceId {
        self.span_context.trace_id()
    }

    pub fn span_id(&self) -> SpanId {
        self.span_context.span_id()
    }

    pub fn parent_span_id(&self) -> Option<SpanId> {
        self.parent_span_id
    }

    pub fn is_sampled(&self) -> bool {
        self.span_context.is_sampled()
    }

    pub fn trace_id_hex(&self) -> String {
        format!("{:032x}", self.span_context.trace_id())
    }

    pub fn span_id_hex(&self) -> String {
        format!("{:016x}", self.span_context.span_id())
    }
}

/// Header format for trace contexts.
pub trait Propagator: Send + Sync + fmt::Debug {
    fn inject(&self, context: &TraceContext, carrier: &mut HeaderMap);

    fn extract(&self, carrier: &HeaderMap) -> Option<TraceContext>;
}

/// Pick the propagator for a configured format.
pub fn propagator_for(format: PropagationFormat) -> Arc<dyn Propagator> {
    match format {
        PropagationFormat::W3c => Arc::new(W3cPropagator),
        PropagationFormat::B3Single => Arc::new(B3SinglePropagator),
        PropagationFormat::B3Multi => Arc::new(B3MultiPropagator),
    }
}

fn inject_with(propagator: &dyn TextMapPropagator, context: &TraceContext, carrier: &mut HeaderMap) {
    let cx = Context::new().with_remote_span_context(context.span_context.clone());
    propagator.inject_context(&cx, &mut HeaderInjector(carrier));
}

fn extract_with(propagator: &dyn TextMapPropagator, carrier: &HeaderMap) -> Option<TraceContext> {
    let cx = propagator.extract_with_context(&Context::new(), &HeaderExtractor(carrier));
    let span = cx.span();
    let span_context = span.span_context();
    span_context
        .is_valid()
        .then(|| TraceContext::remote(span_context.clone()))
}

fn header<'a>(carrier: &'a HeaderMap, key: &str) -> Option<&'a str> {
    carrier.get(key).and_then(|v| v.to_str().ok())
}

fn is_lower_hex(s: &str, len: usize) -> bool {
    s.len() == len && s.bytes().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f'))
}

/// `00-<32 hex>-<16 hex>-<2 hex>`; later versions may append fields.
fn is_well_formed_traceparent(value: &str) -> bool {
    let parts: Vec<&str> = value.trim().split('-').collect();
    if parts.len() < 4 {
        return false;
    }
    let version = parts[0];
    if !is_lower_hex(version, 2) || version == "ff" || (version == "00" && parts.len() != 4) {
        return false;
    }
    is_lower_hex(parts[1], 32) && is_lower_hex(parts[2], 16) && is_lower_hex(parts[3], 2)
}

fn is_b3_trace_id(s: &str) -> bool {
    is_lower_hex(s, 16) || is_lower_hex(s, 32)
}

/// Checks the id fields of whichever B3 headers are present.
fn is_well_formed_b3(carrier: &HeaderMap) -> bool {
    if let Some(value) = header(carrier, B3SinglePropagator::B3) {
        let parts: Vec<&str> = value.trim().split('-').collect();
        // A lone sampling decision carries no ids
        if parts.len() >= 2 {
            let parent_ok = parts.get(3).map_or(true, |p| is_lower_hex(p, 16));
            if !(is_b3_trace_id(parts[0]) && is_lower_hex(parts[1], 16) && parent_ok) {
                return false;
            }
        }
    }
    if let Some(trace_id) = header(carrier, B3MultiPropagator::TRACE_ID) {
        let span_ok = header(carrier, B3MultiPropagator::SPAN_ID).is_some_and(|s| is_lower_hex(s, 16));
        if !(is_b3_trace_id(trace_id) && span_ok) {
            return false;
        }
    }
    true
}

/// `traceparent: 00-<trace>-<span>-<flags>`
#[derive(Debug, Clone, Copy, Default)]
pub struct W3cPropagator;

impl W3cPropagator {
    pub const TRACEPARENT: &'static str = "traceparent";
    pub const TRACESTATE: &'static str = "tracestate";
}

impl Propagator for W3cPropagator {
    fn inject(&self, context: &TraceContext, carrier: &mut HeaderMap) {
        inject_with(&TraceContextPropagator::new(), context, carrier);
        if context.span_context.trace_state().header().is_empty() {
            carrier.remove(Self::TRACESTATE);
        }
    }

    fn extract(&self, carrier: &HeaderMap) -> Option<TraceContext> {
        if !is_well_formed_traceparent(header(carrier, Self::TRACEPARENT)?) {
            return None;
        }
        extract_with(&TraceContextPropagator::new(), carrier)
    }
}

/// `b3: <trace>-<span>-<sampled>[-<parent>]`
#[derive(Debug, Clone, Copy, Default)]
pub struct B3SinglePropagator;

impl B3SinglePropagator {
    pub const B3: &'static str = "b3";
}

impl Propagator for B3SinglePropagator {
    fn inject(&self, context: &TraceContext, carrier: &mut HeaderMap) {
        inject_with(
            &ZipkinPropagator::with_encoding(B3Encoding::SingleHeader),
            context,
            carrier,
        );

        // The parent id goes after the sampling state, so a deferred value stays as is
        let Some(parent) = context.parent_span_id else {
            return;
        };
        let value = match header(carrier, Self::B3) {
            Some(value) if value.split('-').count() == 3 => format!("{}-{:016x}", value, parent),
            _ => return,
        };
        if let Ok(value) = value.parse::<HeaderValue>() {
            carrier.insert(Self::B3, value);
        }
    }

    fn extract(&self, carrier: &HeaderMap) -> Option<TraceContext> {
        if !is_well_formed_b3(carrier) {
            return None;
        }
        extract_with(&ZipkinPropagator::with_encoding(B3Encoding::SingleHeader), carrier)
    }
}

/// `X-B3-TraceId`, `X-B3-SpanId`, `X-B3-ParentSpanId`, `X-B3-Sampled`
#[derive(Debug, Clone, Copy, Default)]
pub struct B3MultiPropagator;

impl B3MultiPropagator {
    pub const TRACE_ID: &'static str = "x-b3-traceid";
    pub const SPAN_ID: &'static str = "x-b3-spanid";
    pub const PARENT_SPAN_ID: &'static str = "x-b3-parentspanid";
    pub const SAMPLED: &'static str = "x-b3-sampled";
}

impl Propagator for B3MultiPropagator {
    fn inject(&self, context: &TraceContext, carrier: &mut HeaderMap) {
        inject_with(
            &ZipkinPropagator::with_encoding(B3Encoding::MultipleHeader),
            context,
            carrier,
        );
        match context.parent_span_id {
            Some(parent) => {
                if let Ok(value) = HeaderValue::from_str(&format!("{:016x}", parent)) {
                    carrier.insert(Self::PARENT_SPAN_ID, value);
                }
            }
            None => {
                carrier.remove(Self::PARENT_SPAN_ID);
            }
        }
    }

    fn extract(&self, carrier: &HeaderMap) -> Option<TraceContext> {
        if !is_well_formed_b3(carrier) {
            return None;
        }
        extract_with(&ZipkinPropagator::with_encoding(B3Encoding::MultipleHeader), carrier)
    }
}

/// Headers a server-side observation received, set as an extension before
/// `start` so the propagation handler can continue the inbound trace.
#[derive(Debug, Clone)]
pub struct ReceivedHeaders(pub HeaderMap);

/// Creates a trace context for every started observation and injects it
/// into the observation's carrier.
#[derive(Debug, Clone)]
pub struct PropagatingSenderHandler {
    propagator: Arc<dyn Propagator>,
}

impl PropagatingSenderHandler {
    pub fn new(propagator: Arc<dyn Propagator>) -> Self {
        Self { propagator }
    }
}

impl ObservationHandler for PropagatingSenderHandler {
    fn on_start(&self, observation: &Observation) {
        let from_parent = observation
            .parent()
            .and_then(|parent| parent.extension::<TraceContext>());

        let carrier_context = observation.context().filter(|ctx| ctx.has_carrier());
        let trace = match carrier_context {
            Some(ctx) => {
                let parent = from_parent.or_else(|| {
                    ctx.carrier()
                        .and_then(|headers| self.propagator.extract(&headers))
                });
                let trace = parent.map(|p| p.child()).unwrap_or_else(TraceContext::new_root);
                ctx.with_carrier(|headers| self.propagator.inject(&trace, headers));
                trace
            }
            None => from_parent
                .or_else(|| {
                    observation
                        .extension::<ReceivedHeaders>()
                        .and_then(|received| self.propagator.extract(&received.0))
                })
                .map(|p| p.child())
                .unwrap_or_else(TraceContext::new_root),
        };

        tracing::debug!(
            observation = %observation.id(),
            trace_id = %trace.trace_id_hex(),
            span_id = %trace.span_id_hex(),
            "Trace context created"
        );
        observation.insert_extension(trace);
    }

    fn on_stop(&self, _observation: &Observation) {}
}
