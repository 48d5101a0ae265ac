//! Session transport client for hardware wallet bridge daemons.
//!
//! A bridge daemon multiplexes USB devices over a local HTTP API. Several
//! applications may talk to the same device, so every session is negotiated
//! with the daemon and the client keeps its view of who owns what in step
//! with the daemon's through a long-poll listen loop.
//!
//! ```no_run
//! # use std::sync::Arc;
//! # use hwbridge::{AcquireInput, BridgeConfig, BridgeTransport, Transport};
//! # use hwbridge::protocol::MessageSchema;
//! # async fn example(schema: MessageSchema) -> hwbridge::Result<()> {
//! let transport = BridgeTransport::new(BridgeConfig::default(), Arc::new(schema))?;
//! transport.init(None).await?;
//! transport.listen()?;
//!
//! let path = transport.enumerate(None).await?[0].path.clone();
//! let session = transport.acquire(AcquireInput { path, previous: None }, None).await?;
//! # let _ = session;
//! transport.stop();
//! # Ok(())
//! # }
//! ```

pub mod bridge;
pub mod diff;
pub mod error;
pub mod transport;
pub mod types;

pub use bridge::{BridgeConfig, BridgeTransport, DEFAULT_URL};
pub use diff::DescriptorDiff;
pub use error::{ErrorKind, Result, TransportError};
pub use hwbridge_protocol as protocol;
pub use transport::{Operation, Transport};
pub use types::{AcquireInput, CallInput, Descriptor, ReceiveInput, ReleaseInput, Session, TransportEvent};
