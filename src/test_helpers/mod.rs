// Test Helpers Module - In-memory collaborators
//
// Fakes for the builder, image store and cluster runtime seams so the
// scheduling, import and reconciliation logic can be exercised without
// Docker or a cluster. Used by unit tests and the integration tests in tests/.

pub mod fake_build;
pub mod fake_cluster;

pub use fake_build::{BuildCall, FakeArtifactBuilder, FakeArtifactStore};
pub use fake_cluster::{FakeClusterRuntime, StatusQuery};
