//! Chrome DevTools Protocol transport for pixiscope.
//!
//! # Architecture
//!
//! - **`cdp`**: WebSocket client with JSON-RPC command/response correlation
//!   and event subscriptions keyed by event method name.
//! - **`session`**: `PageSession`, one page with the `Runtime` and `Log`
//!   domains enabled. Injects a bootstrap script once per session, evaluates
//!   expressions by value and merges console output from both domains.
//! - **`targets`**: page discovery through the `/json/list` HTTP endpoint.
//! - **`launch`**: browser binary discovery and launch with remote debugging.
//!
//! # Chrome Setup
//!
//! Chrome must be running with the `--remote-debugging-port` flag:
//!
//! ```sh
//! google-chrome --remote-debugging-port=9222
//! ```
//!
//! or started through [`launch::launch`].

pub mod cdp;
pub mod error;
pub mod launch;
pub mod session;
pub mod targets;

pub use cdp::{CdpClient, CdpEvent, Subscription};
pub use error::{BrowserError, DiscoveryError};
pub use launch::{LaunchOptions, LaunchedBrowser};
pub use session::{ConsoleLevel, ConsoleMessage, ConsoleStream, PageSession};
pub use targets::{select_target, BrowserVersion, DevtoolsEndpoint, TargetInfo};
