//! Resumable chunked uploads over blob storage.
//!
//! - [`ChunkStorage`] appends chunks of an upload into one growing blob per
//!   session and optionally renames it to the client's filename when the
//!   last chunk arrives.
//! - [`OrphanageStorage`] parks finished files per web session until the
//!   application promotes them to a [`DestinationStorage`].
//! - Both sweep abandoned data by age.

pub mod chunks;
pub mod destination;
pub mod error;
pub mod file;
pub mod orphanage;
pub mod report;
pub mod session;

pub use chunks::{Chunk, ChunkStorage};
pub use destination::{BlobStorage, DestinationStorage};
pub use error::{UploaderError, UploaderResult};
pub use file::StoredFile;
pub use orphanage::OrphanageStorage;
pub use report::{PromotionReport, SkippedDirectory, SkippedFile, SweepReport};
pub use session::{StaticSession, WebSession};
