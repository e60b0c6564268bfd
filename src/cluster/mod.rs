//! Node cluster: descriptors, transport, tokens, health and fan-out

pub mod auth;
pub mod fanout;
pub mod health;
pub mod node;
pub mod transport;

pub use auth::{issuer_from_config, HmacTokenIssuer, StaticTokenIssuer, TokenIssuer};
pub use fanout::FanOut;
pub use health::{ClusterHealth, ClusterStatus, HealthTracker, NodeHealth, NodeStatus};
pub use node::{NodeDescriptor, NodeFailure, NodeOutcome};
pub use transport::{HttpTransport, Method, Transport, TransportError, TransportResponse};
