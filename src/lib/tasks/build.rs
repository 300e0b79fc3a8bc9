use std::{
    io,
    path::{Path, PathBuf},
};

/// Build context packed for the engine, plus the dockerfile's name inside it.
#[derive(Debug)]
pub struct PackedContext {
    pub archive: Vec<u8>,
    pub dockerfile: String,
}

/// Tars `context` for an image build. A dockerfile outside the context is
/// appended under a generated name so the engine can still find it.
pub fn pack_build_context(context: &Path, dockerfile: &Path) -> io::Result<PackedContext> {
    let mut builder = tar::Builder::new(Vec::new());
    builder.follow_symlinks(false);
    builder.append_dir_all(".", context)?;

    let dockerfile = match locate_in_context(context, dockerfile) {
        Some(relative) => relative.to_string_lossy().replace('\\', "/"),
        None => {
            let name = format!(".dockerfile.{}", uuid::Uuid::new_v4().simple());
            builder.append_path_with_name(dockerfile, &name)?;
            name
        }
    };

    Ok(PackedContext {
        archive: builder.into_inner()?,
        dockerfile,
    })
}

fn locate_in_context(context: &Path, dockerfile: &Path) -> Option<PathBuf> {
    if dockerfile.is_relative() {
        return Some(dockerfile.to_path_buf());
    }
    dockerfile
        .strip_prefix(context)
        .ok()
        .map(Path::to_path_buf)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read;

    fn entry_names(archive: &[u8]) -> Vec<String> {
        let mut archive = tar::Archive::new(archive);
        archive
            .entries()
            .unwrap()
            .map(|entry| entry.unwrap().path().unwrap().to_string_lossy().into_owned())
            .collect()
    }

    #[test]
    fn relative_dockerfile_is_used_in_place() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("Dockerfile"), "FROM alpine\n").unwrap();

        let packed = pack_build_context(dir.path(), Path::new("Dockerfile")).unwrap();

        assert_eq!(packed.dockerfile, "Dockerfile");
        assert!(entry_names(&packed.archive).iter().any(|name| name.ends_with("Dockerfile")));
    }

    #[test]
    fn dockerfile_outside_context_is_appended() {
        let context = tempfile::tempdir().unwrap();
        let elsewhere = tempfile::tempdir().unwrap();
        std::fs::write(context.path().join("app.js"), "console.log(1)\n").unwrap();
        let dockerfile = elsewhere.path().join("fuel-ignition.dockerfile");
        std::fs::write(&dockerfile, "FROM node\n").unwrap();

        let packed = pack_build_context(context.path(), &dockerfile).unwrap();

        assert!(packed.dockerfile.starts_with(".dockerfile."));
        let mut archive = tar::Archive::new(packed.archive.as_slice());
        let mut found = String::new();
        for entry in archive.entries().unwrap() {
            let mut entry = entry.unwrap();
            if entry.path().unwrap().to_string_lossy() == packed.dockerfile {
                entry.read_to_string(&mut found).unwrap();
            }
        }
        assert_eq!(found, "FROM node\n");
    }
}
