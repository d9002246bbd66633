use log::{debug, info, warn};

use crate::{
    accumulator::{CompletedResponse, ResponseAccumulator},
    decoder::decode,
    error::DecodeError,
    sink::UiSink,
    topics::kind_for_topic,
    transport::ResponseEvents,
    types::{Reading, RequestKind},
};

#[derive(Debug, Clone)]
pub struct Dispatcher<S> {
    sink: S,
    location: String,
}

impl<S: UiSink> Dispatcher<S> {
    pub fn new(sink: S, location: impl Into<String>) -> Self {
        Self {
            sink,
            location: location.into(),
        }
    }

    pub fn route(&self, kind: RequestKind, body: &[u8]) -> Option<Reading> {
        match decode(body, kind, &self.location) {
            Ok(reading) => {
                info!("applying {kind:?} reading: {reading:?}");
                self.sink.apply(&reading);
                Some(reading)
            }
            Err(err @ DecodeError::MissingField { .. }) => {
                warn!("{err}");
                None
            }
            Err(err) => {
                warn!("{err}; {} byte body dropped", body.len());
                None
            }
        }
    }

    pub fn route_completed(&self, response: &CompletedResponse) -> Option<Reading> {
        if response.was_truncated() {
            debug!(
                "{:?} body was truncated to {} bytes",
                response.kind(),
                response.body().len()
            );
        }
        self.route(response.kind(), response.body())
    }

    pub fn route_topic(&self, topic: &str, payload: &[u8]) -> Option<Reading> {
        match kind_for_topic(topic) {
            Ok(kind) => self.route(kind, payload),
            Err(err) => {
                warn!("{err}; dropping {} byte message", payload.len());
                None
            }
        }
    }
}

#[derive(Debug)]
pub struct ResponseRouter<S> {
    accumulator: ResponseAccumulator,
    dispatcher: Dispatcher<S>,
    last_reading: Option<Reading>,
}

impl<S: UiSink> ResponseRouter<S> {
    pub fn new(dispatcher: Dispatcher<S>) -> Self {
        Self::with_accumulator(dispatcher, ResponseAccumulator::new())
    }

    pub fn with_accumulator(dispatcher: Dispatcher<S>, accumulator: ResponseAccumulator) -> Self {
        Self {
            accumulator,
            dispatcher,
            last_reading: None,
        }
    }

    pub fn accumulator(&self) -> &ResponseAccumulator {
        &self.accumulator
    }

    pub fn take_last_reading(&mut self) -> Option<Reading> {
        self.last_reading.take()
    }
}

impl<S: UiSink> ResponseEvents for ResponseRouter<S> {
    fn on_data(&mut self, kind: RequestKind, chunk: &[u8], chunked: bool) {
        self.accumulator.on_data(kind, chunk, chunked);
    }

    fn on_finish(&mut self, kind: RequestKind) {
        if let Some(response) = self.accumulator.on_finish(kind) {
            self.last_reading = self.dispatcher.route_completed(&response);
        }
    }

    fn on_disconnected(&mut self, kind: RequestKind) {
        self.accumulator.on_disconnected(kind);
    }
}
