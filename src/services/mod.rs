//! External service clients
//!
//! HTTP clients for the three remote dependencies the registration saga
//! coordinates, each behind a trait seam:
//!
//! - **Moderation**: content-safety classification of uploaded images
//! - **Embedding**: face embeddings + same-person verification
//! - **Media**: object storage for case images
//!
//! All calls run on a shared `reqwest` client with a bounded timeout; a
//! timeout is a step failure like any other.

pub mod embedding;
pub mod media;
pub mod moderation;

pub use embedding::{EmbeddingPair, FaceEmbedder, HttpEmbedder};
pub use media::{media_key, HttpMediaStore, MediaStore};
pub use moderation::{ContentModerator, HttpModerator, ModerationVerdict};
