//! snippets-client library - snippet selection, delivery and local state
//!
//! Picks at most one promotional snippet for a host surface, shows it, and
//! tracks what the user does with it:
//! - `bus`: correlated request/response messaging with the host
//! - `facts`, `geo`: host facts used as selection input
//! - `store`, `blocklist`: persisted list of dismissed snippets
//! - `selection`: eligibility filters and weighted draw
//! - `metrics`: sampled usage reporting
//! - `content`, `delivery`: injection and click/dismiss handling
//! - `host`: stand-in host used by the CLI and tests

pub mod blocklist;
pub mod bus;
pub mod content;
pub mod delivery;
pub mod facts;
pub mod geo;
pub mod host;
pub mod metrics;
pub mod model;
pub mod selection;
pub mod store;

pub use blocklist::BlockList;
pub use bus::{CorrelationBus, HostRequest, HostResponse};
pub use delivery::{
    ClickEvent, ClickOutcome, DeliveryController, DeliveryOutcome, DeliverySettings, DeliveryState,
    ElementRef, HostSurface,
};
pub use facts::{ClientEnvironment, HostFactCache, HostFacts};
pub use metrics::{MetricsEvent, MetricsReporter, MetricsSettings};
pub use model::{parse_catalog, BlockId, Snippet};
pub use store::{open_block_store, BlockListStore, OpenedStore};

/// Outbound bus buffer per host listener
pub const BUS_CAPACITY: usize = 64;
