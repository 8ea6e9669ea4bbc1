use std::path::{Component, Path, PathBuf};
use tonic::Status;

/// The directory tree the agent is allowed to touch. Every client-supplied path is resolved
/// against it.
#[derive(Clone, Debug)]
pub struct Staging {
    root: PathBuf,
}

impl Staging {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolve `path` under the root. Absolute paths and `..` components are rejected.
    pub fn resolve(&self, path: &str) -> Result<PathBuf, Status> {
        let mut resolved = self.root.clone();
        for component in Path::new(path).components() {
            match component {
                Component::Normal(part) => resolved.push(part),
                Component::CurDir => {}
                _ => {
                    return Err(Status::invalid_argument(format!(
                        "path {:?} escapes the agent root",
                        path
                    )))
                }
            }
        }
        Ok(resolved)
    }

    /// Like `resolve`, but the result must name a file rather than the root itself.
    pub fn resolve_file(&self, path: &str) -> Result<PathBuf, Status> {
        let resolved = self.resolve(path)?;
        if resolved == self.root {
            return Err(Status::invalid_argument("a file path is required"));
        }
        Ok(resolved)
    }

    pub async fn put(&self, path: &str, data: &[u8]) -> Result<(), Status> {
        let target = self.resolve_file(path)?;
        if let Some(parent) = target.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(io_status)?;
        }
        tokio::fs::write(&target, data).await.map_err(io_status)
    }

    pub async fn get(&self, path: &str) -> Result<Vec<u8>, Status> {
        let target = self.resolve_file(path)?;
        tokio::fs::read(&target).await.map_err(io_status)
    }

    pub async fn delete(&self, path: &str) -> Result<(), Status> {
        let target = self.resolve_file(path)?;
        tokio::fs::remove_file(&target).await.map_err(io_status)
    }
}

pub fn io_status(err: std::io::Error) -> Status {
    match err.kind() {
        std::io::ErrorKind::NotFound => Status::not_found(err.to_string()),
        std::io::ErrorKind::PermissionDenied => Status::permission_denied(err.to_string()),
        _ => Status::internal(err.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tonic::Code;

    #[test]
    fn resolves_relative_paths_under_root() {
        let staging = Staging::new("/srv/agent");
        assert_eq!(
            staging.resolve("runs/./trigger.json").unwrap(),
            PathBuf::from("/srv/agent/runs/trigger.json")
        );
        assert_eq!(staging.resolve("").unwrap(), PathBuf::from("/srv/agent"));
        // rebuilt from normal components only
        assert_eq!(
            staging.resolve("./runs/.").unwrap().as_os_str(),
            "/srv/agent/runs"
        );
    }

    #[test]
    fn rejects_escapes() {
        let staging = Staging::new("/srv/agent");
        for path in ["/etc/passwd", "../secret", "runs/../../x"] {
            let status = staging.resolve(path).unwrap_err();
            assert_eq!(status.code(), Code::InvalidArgument, "{}", path);
        }
        assert_eq!(staging.resolve_file(".").unwrap_err().code(), Code::InvalidArgument);
    }

    #[tokio::test]
    async fn put_get_delete() {
        let root = tempfile::tempdir().unwrap();
        let staging = Staging::new(root.path());

        staging.put("a/b/data.bin", b"payload").await.unwrap();
        assert_eq!(staging.get("a/b/data.bin").await.unwrap(), b"payload");
        staging.delete("a/b/data.bin").await.unwrap();
        assert_eq!(staging.get("a/b/data.bin").await.unwrap_err().code(), Code::NotFound);
    }
}
