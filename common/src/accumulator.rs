use log::{debug, warn};

use crate::types::RequestKind;

/// Capacity of the in-flight body buffer, terminator included.
pub const RESPONSE_CAPACITY: usize = 2048;

#[derive(Debug)]
struct InFlight {
    kind: RequestKind,
    body: Vec<u8>,
    truncated: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletedResponse {
    kind: RequestKind,
    bytes: Vec<u8>,
    truncated: bool,
}

impl CompletedResponse {
    pub fn kind(&self) -> RequestKind {
        self.kind
    }

    pub fn body(&self) -> &[u8] {
        &self.bytes[..self.bytes.len() - 1]
    }

    pub fn bytes_with_nul(&self) -> &[u8] {
        &self.bytes
    }

    pub fn was_truncated(&self) -> bool {
        self.truncated
    }
}

#[derive(Debug)]
pub struct ResponseAccumulator {
    capacity: usize,
    in_flight: Option<InFlight>,
}

impl Default for ResponseAccumulator {
    fn default() -> Self {
        Self::with_capacity(RESPONSE_CAPACITY)
    }
}

impl ResponseAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            in_flight: None,
        }
    }

    pub fn is_idle(&self) -> bool {
        self.in_flight.is_none()
    }

    pub fn buffered_len(&self) -> usize {
        self.in_flight.as_ref().map_or(0, |in_flight| in_flight.body.len())
    }

    pub fn on_data(&mut self, kind: RequestKind, chunk: &[u8], chunked: bool) -> bool {
        if chunked {
            debug!("{kind:?} response uses chunked transfer; skipping accumulation");
            return false;
        }
        if chunk.is_empty() {
            return true;
        }

        if let Some(in_flight) = &self.in_flight {
            if in_flight.kind != kind {
                warn!(
                    "dropping {kind:?} data while a {:?} response is in flight",
                    in_flight.kind
                );
                return false;
            }
        }

        let capacity = self.capacity;
        let limit = capacity - 1;
        let in_flight = self.in_flight.get_or_insert_with(|| InFlight {
            kind,
            body: Vec::with_capacity(capacity),
            truncated: false,
        });

        let room = limit.saturating_sub(in_flight.body.len());
        let take = chunk.len().min(room);
        if take < chunk.len() {
            if !in_flight.truncated {
                debug!(
                    "{kind:?} response exceeds {limit} bytes; dropping {} bytes",
                    chunk.len() - take
                );
            }
            in_flight.truncated = true;
        }
        in_flight.body.extend_from_slice(&chunk[..take]);
        true
    }

    pub fn on_finish(&mut self, kind: RequestKind) -> Option<CompletedResponse> {
        match self.in_flight.take() {
            Some(in_flight) if in_flight.kind == kind => {
                let InFlight {
                    kind,
                    mut body,
                    truncated,
                } = in_flight;
                body.push(0);
                Some(CompletedResponse {
                    kind,
                    bytes: body,
                    truncated,
                })
            }
            Some(in_flight) => {
                warn!(
                    "ignoring {kind:?} finish while a {:?} response is in flight",
                    in_flight.kind
                );
                self.in_flight = Some(in_flight);
                None
            }
            None => None,
        }
    }

    pub fn on_disconnected(&mut self, kind: RequestKind) {
        match self.in_flight.take() {
            Some(in_flight) if in_flight.kind == kind => {
                debug!(
                    "{kind:?} connection dropped; discarding {} buffered bytes",
                    in_flight.body.len()
                );
            }
            Some(in_flight) => {
                warn!(
                    "ignoring {kind:?} disconnect while a {:?} response is in flight",
                    in_flight.kind
                );
                self.in_flight = Some(in_flight);
            }
            None => {}
        }
    }
}
