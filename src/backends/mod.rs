//! Stateless inference wrappers (C3): `PoseBackend` and `FireObjectBackend`.
//! Both load their model once at worker start and are invoked synchronously,
//! sequentially, from the same worker thread. Grounded on the pack's
//! `tract`-based `DetectorBackend` trait, split into two purpose-specific
//! traits since pose and fire/smoke detection return different result
//! shapes here.

mod fire_backend;
mod pose_backend;

pub use fire_backend::{FireBox, FireLabel, FireObjectBackend, StubFireBackend, TractFireBackend};
pub use pose_backend::{PoseBackend, StubPoseBackend, TractPoseBackend};
