//! Rendering pipeline: admission, browser sessions and orchestration.

pub mod browser;
pub mod idle;
pub mod scheduler;
pub mod service;
pub mod session;
pub mod single_flight;

pub use browser::{BrowserEngine, ChromiumEngine, EngineConfig};
pub use idle::NetworkIdle;
pub use scheduler::{RenderScheduler, RenderTicket};
pub use service::{ScreenshotOutcome, ScreenshotService};
pub use session::{ActiveSessions, SessionState, SessionTracker};
pub use single_flight::{FlightGuard, SingleFlight};
