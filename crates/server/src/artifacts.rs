use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;
use ladder_core::domain::request::ArtifactRef;
use ladder_core::errors::SideEffectError;
use ladder_core::ports::ArtifactMover;
use tracing::info;

/// Artifacts live under `root/<store_id>/<file_id>`; approved copies land in
/// `root/<destination>/<file_name>`.
#[derive(Clone, Debug)]
pub struct FsArtifactMover {
    root: PathBuf,
}

impl FsArtifactMover {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn resolve(&self, relative: &str) -> Result<PathBuf, SideEffectError> {
        let path = Path::new(relative);
        let plain = !relative.trim().is_empty()
            && path.components().all(|component| matches!(component, Component::Normal(_)));
        if !plain {
            return Err(SideEffectError::ArtifactMoveFailure(format!(
                "`{relative}` is not a relative path inside the artifact root"
            )));
        }
        Ok(self.root.join(path))
    }

    fn resolve_name<'a>(&self, name: &'a str) -> Result<&'a Path, SideEffectError> {
        let path = Path::new(name);
        match path.components().collect::<Vec<_>>().as_slice() {
            [Component::Normal(_)] => Ok(path),
            _ => Err(SideEffectError::ArtifactMoveFailure(format!(
                "`{name}` is not a plain file name"
            ))),
        }
    }
}

#[async_trait]
impl ArtifactMover for FsArtifactMover {
    async fn move_to_approved_location(
        &self,
        artifacts: &[ArtifactRef],
        destination: &str,
    ) -> Result<(), SideEffectError> {
        let target_dir = self.resolve(destination)?;
        tokio::fs::create_dir_all(&target_dir).await.map_err(|error| {
            SideEffectError::ArtifactMoveFailure(format!(
                "could not create `{}`: {error}",
                target_dir.display()
            ))
        })?;

        for artifact in artifacts {
            let source =
                self.resolve(&artifact.store_id)?.join(self.resolve_name(&artifact.file_id)?);
            let target = target_dir.join(self.resolve_name(&artifact.file_name)?);
            tokio::fs::rename(&source, &target).await.map_err(|error| {
                SideEffectError::ArtifactMoveFailure(format!(
                    "could not move `{}` to `{}`: {error}",
                    source.display(),
                    target.display()
                ))
            })?;
            info!(
                event_name = "artifact.moved",
                file_id = %artifact.file_id,
                destination = %target.display(),
                "artifact moved to approved location"
            );
        }

        Ok(())
    }
}
