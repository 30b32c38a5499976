//! Host-filesystem stages of the shipyard pipeline.
//!
//! # Build pipeline
//!
//! ```text
//! shipyard build
//!   1. Archive   ── git archive HEAD, or filtered walk  → builder/repo.tar
//!   2. Package   ── unpack repo.tar                     → builder/package/
//!   3. Overlay   ── copy *.example.php overrides        → builder/package/config/
//!   4. (container stages, see shipyard-docker)
//!   5. Stage     ── one bundle per flavor               → dist/<run-id>/<flavor>/
//! ```
//!
//! # Archive strategy
//!
//! A source tree under git is exported with `git archive HEAD`, so only
//! committed content ships. Without git, or if the export fails, the tree
//! is walked and every path with a segment in [`archive::DEFAULT_EXCLUDES`]
//! is left out.

pub mod archive;
pub mod overlay;
pub mod package;
pub mod stage;

pub use archive::{ArchiveError, ArchiveReport, Archiver, ExclusionSet};
pub use overlay::{OverlayError, OverlayReport, apply_overlays};
pub use package::PackageError;
pub use stage::{
    DeploymentStager, FlavorBuilder, FlavorContext, FlavorOutcome, ScriptFlavor, StageError,
    StageReport,
};
