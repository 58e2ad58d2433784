//! Convenient re-exports for common usage.
//!
//! ```
//! use formsync::prelude::*;
//! ```

pub use crate::attach_client;
pub use crate::Channel;
pub use crate::ClientConnection;
pub use crate::Connection;
pub use crate::ConnectionRef;
pub use crate::ConnectionRegistry;
pub use crate::Envelope;
pub use crate::FormState;
pub use crate::FormStateStore;
pub use crate::ReplicationManager;
