use std::time::Duration;

use crate::{error::TransportError, types::RequestKind};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchRequest {
    pub kind: RequestKind,
    pub url: String,
    pub timeout: Duration,
}

/// Events for one request arrive serially on the thread that called
/// [`Transport::perform`]; exactly one of `on_finish` / `on_disconnected`
/// closes a request that delivered data.
pub trait ResponseEvents {
    fn on_data(&mut self, kind: RequestKind, chunk: &[u8], chunked: bool);
    fn on_finish(&mut self, kind: RequestKind);
    fn on_disconnected(&mut self, kind: RequestKind);
}

pub trait Transport {
    fn perform(
        &mut self,
        request: &FetchRequest,
        events: &mut dyn ResponseEvents,
    ) -> Result<(), TransportError>;
}
