//! External service integrations.

pub mod feed_client {
    pub use crate::feed_client::*;
}

pub mod ingestion {
    pub use crate::ingestion::*;
}

pub mod exporter {
    pub use crate::exporter::*;
}
