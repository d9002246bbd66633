pub mod accumulator;
pub mod config;
pub mod decoder;
pub mod dispatch;
pub mod error;
pub mod gate;
pub mod scheduler;
pub mod sink;
pub mod topics;
pub mod transport;
pub mod types;

pub use accumulator::{CompletedResponse, ResponseAccumulator, RESPONSE_CAPACITY};
pub use config::{DisplayConfig, NetworkConfig, RuntimeConfig, WeatherConfig};
pub use dispatch::{Dispatcher, ResponseRouter};
pub use error::{DecodeError, TransportError};
pub use gate::ConnectivityGate;
pub use scheduler::{Clock, CycleStats, FetchScheduler, FetchState, SystemClock};
pub use sink::{RenderLock, UiSink, Widgets};
pub use topics::*;
pub use transport::{FetchRequest, ResponseEvents, Transport};
pub use types::{DecodedWeather, OutdoorReading, Page, Reading, RequestKind, RoomReading};
