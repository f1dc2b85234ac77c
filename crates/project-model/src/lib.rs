//! Cutline Project Model
//!
//! Defines the core data contracts for Cutline projects:
//! - **Timeline:** Ordered, contiguous frame ranges with a speed or delete tag
//! - **Overlays:** Declared annotation templates and their resolved objects
//! - **Project:** Source media, edits, overlays, and export configuration
//!
//! Frame indices refer to the input video at the target frame rate.

pub mod overlay;
pub mod project;
pub mod timeline;

pub use overlay::*;
pub use project::*;
pub use timeline::*;
