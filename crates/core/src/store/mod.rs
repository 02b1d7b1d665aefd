pub mod memory;

pub use memory::{
    InMemoryLevelConfigStore, InMemoryRequestStore, InMemoryStepStore, RecordingArtifactMover,
    RecordingNotifier, SentNotice,
};
