use crate::clients::{ByteStream, ClusterGateway};
use crate::constants::{
    AGGREGATOR_CONTAINER, AGGREGATOR_POD, AGGREGATOR_RESULTS_PATH, DEFAULT_NAMESPACE,
    SPLAT_BINARY, SPLAT_COMMAND,
};
use crate::error::{self, Result};
use flate2::bufread::GzDecoder;
use log::{debug, info, warn};
use snafu::{ensure, ResultExt};
use std::fs::{self, File};
use std::io::{self, BufReader, Read};
use std::path::{Component, Path, PathBuf};
use tar::{Archive, EntryType};
use tokio_util::io::SyncIoBridge;

/// Where and how to retrieve the results of a run.
#[derive(Debug, Clone)]
pub struct RetrieveConfig {
    pub namespace: String,
    /// The directory inside the aggregator that is archived.
    pub remote_path: String,
    /// The local directory the results are written to.
    pub destination: PathBuf,
    /// Rename the retrieved file. Additional files get a numbered suffix.
    pub filename: Option<String>,
    /// Expand the retrieved archive into `destination` and delete it.
    pub extract: bool,
}

impl Default for RetrieveConfig {
    fn default() -> Self {
        Self {
            namespace: DEFAULT_NAMESPACE.to_string(),
            remote_path: AGGREGATOR_RESULTS_PATH.to_string(),
            destination: PathBuf::from("."),
            filename: None,
            extract: false,
        }
    }
}

/// Ask the aggregator to archive `remote_path` and return the gzipped tar stream it writes to
/// stdout.
pub async fn retrieve_results(
    gateway: &dyn ClusterGateway,
    namespace: &str,
    remote_path: &str,
) -> Result<ByteStream> {
    gateway
        .get_pod(namespace, AGGREGATOR_POD)
        .await
        .context(error::ClientSnafu {
            action: "find the aggregator pod",
        })?;
    gateway
        .exec(
            namespace,
            AGGREGATOR_POD,
            AGGREGATOR_CONTAINER,
            &[SPLAT_BINARY, SPLAT_COMMAND, remote_path],
        )
        .await
        .context(error::ClientSnafu {
            action: "run the results archiver in the aggregator",
        })
}

/// Retrieve the results of a run into `config.destination`, returning the paths written.
///
/// When `config.extract` is set the retrieved archives are expanded and then deleted. A failure
/// to delete them is reported as `Error::Deletion`, after everything else succeeded.
pub async fn retrieve(gateway: &dyn ClusterGateway, config: &RetrieveConfig) -> Result<Vec<PathBuf>> {
    let stream = retrieve_results(gateway, &config.namespace, &config.remote_path).await?;
    let written = untar_stream(stream, config.destination.clone(), config.filename.clone()).await?;
    info!(
        "Retrieved {} file(s) into '{}'",
        written.len(),
        config.destination.display()
    );
    if !config.extract {
        return Ok(written);
    }

    let destination = config.destination.clone();
    tokio::task::spawn_blocking(move || extract_archives(&written, &destination))
        .await
        .context(error::JoinSnafu)?
}

/// Expand a gzipped tar stream into `destination` on a blocking thread.
pub async fn untar_stream(
    stream: ByteStream,
    destination: PathBuf,
    filename: Option<String>,
) -> Result<Vec<PathBuf>> {
    // The bridge has to be created on the runtime so it can find its way back to it.
    let reader = SyncIoBridge::new(stream);
    tokio::task::spawn_blocking(move || untar_gzip(reader, &destination, filename.as_deref()))
        .await
        .context(error::JoinSnafu)?
}

/// Expand a gzipped tar stream into `destination`.
///
/// The whole stream is read. Whatever follows the gzip data must be zero padding and the stream
/// has to end without an error, otherwise the retrieval failed even if every file was written.
pub fn untar_gzip<R: Read>(
    reader: R,
    destination: &Path,
    filename: Option<&str>,
) -> Result<Vec<PathBuf>> {
    let mut decoder = GzDecoder::new(BufReader::new(reader));
    let written = untar_all(&mut decoder, destination, filename)?;
    // The decoder stops at the end of the gzip member and leaves the rest in the buffer.
    ensure_zero_padding(decoder.into_inner())?;
    Ok(written)
}

/// Expand every gzipped tarball in `archives` into `destination`, then delete them.
///
/// An archive that cannot be deleted does not stop the others from being expanded. The first
/// such failure is returned as `Error::Deletion` once all of them were, and only if nothing else
/// went wrong.
pub fn extract_archives(archives: &[PathBuf], destination: &Path) -> Result<Vec<PathBuf>> {
    extract_archives_with(archives, destination, |archive| fs::remove_file(archive))
}

fn extract_archives_with<F>(
    archives: &[PathBuf],
    destination: &Path,
    mut remove: F,
) -> Result<Vec<PathBuf>>
where
    F: FnMut(&Path) -> io::Result<()>,
{
    let mut extracted = Vec::new();
    let mut undeleted = None;
    for archive in archives {
        let file = File::open(archive).context(error::RetrievalSnafu {
            stage: format!("open '{}'", archive.display()),
        })?;
        extracted.extend(untar_gzip(file, destination, None)?);
        if let Err(e) = remove(archive).context(error::DeletionSnafu {
            filename: archive.as_path(),
        }) {
            warn!("{}", e);
            undeleted.get_or_insert(e);
        }
    }
    match undeleted {
        Some(e) => Err(e),
        None => Ok(extracted),
    }
}

/// The name given to the `count`th regular file when the caller chose `filename`. The first
/// file keeps the name, later ones get a two digit suffix before the extension.
pub fn unique_filename(filename: &str, count: i32) -> String {
    if count <= 0 {
        return filename.to_string();
    }
    match filename.rfind('.') {
        Some(dot) if dot > 0 => format!(
            "{}-{:02}{}",
            &filename[..dot],
            count,
            &filename[dot..]
        ),
        _ => format!("{}-{:02}", filename, count),
    }
}

/// Expand a tar stream into `destination`.
///
/// Entry names containing `..` are rejected and leading `/` are dropped, and nothing is ever
/// written through a symlink, so every file lands inside `destination`. After the end of the
/// archive the rest of the stream must be zero padding.
pub fn untar_all<R: Read>(
    reader: R,
    destination: &Path,
    filename: Option<&str>,
) -> Result<Vec<PathBuf>> {
    let mut archive = Archive::new(reader);
    let mut written = Vec::new();
    let mut entry_count = 0;
    let mut file_count = 0;

    for entry in archive.entries().context(error::RetrievalSnafu {
        stage: "read the archive",
    })? {
        let mut entry = entry.context(error::RetrievalSnafu {
            stage: "read an archive entry",
        })?;
        entry_count += 1;

        let name = entry
            .path()
            .context(error::RetrievalSnafu {
                stage: "read an entry name",
            })?
            .into_owned();
        let relative = sanitize_entry_name(&name)?;
        if relative.as_os_str().is_empty() {
            continue;
        }

        let entry_type = entry.header().entry_type();
        match entry_type {
            EntryType::Directory => {
                ensure_no_symlinks(destination, &relative)?;
                let target = destination.join(&relative);
                fs::create_dir_all(&target).context(error::RetrievalSnafu {
                    stage: format!("create directory '{}'", target.display()),
                })?;
            }
            EntryType::Symlink => {
                let link = entry
                    .link_name()
                    .context(error::RetrievalSnafu {
                        stage: "read a link target",
                    })?
                    .map(|link| link.into_owned());
                let link = match link {
                    Some(link) => link,
                    None => {
                        warn!("Skipping symlink '{}' without a target", name.display());
                        continue;
                    }
                };
                ensure_no_symlinks(destination, &relative)?;
                let target = destination.join(&relative);
                create_parent(&target)?;
                make_symlink(&link, &target)?;
            }
            EntryType::Regular | EntryType::Continuous => {
                let relative = match filename {
                    Some(filename) => {
                        let renamed = unique_filename(filename, file_count);
                        sanitize_entry_name(Path::new(&renamed))?
                    }
                    None => relative,
                };
                file_count += 1;
                ensure_no_symlinks(destination, &relative)?;
                let target = destination.join(&relative);
                create_parent(&target)?;
                let mode = entry.header().mode().ok();
                let mut file = File::create(&target).context(error::RetrievalSnafu {
                    stage: format!("create '{}'", target.display()),
                })?;
                io::copy(&mut entry, &mut file).context(error::RetrievalSnafu {
                    stage: format!("write '{}'", target.display()),
                })?;
                if let Some(mode) = mode {
                    set_mode(&target, mode)?;
                }
                debug!("Wrote '{}'", target.display());
                written.push(target);
            }
            other => debug!("Skipping '{}' of type {:?}", name.display(), other),
        }
    }
    ensure!(entry_count > 0, error::RetrievalEmptySnafu);

    // Only zero padding may follow the end of the archive.
    ensure_zero_padding(archive.into_inner())?;
    Ok(written)
}

/// Read `reader` to the end, failing on anything but zeros.
fn ensure_zero_padding<R: Read>(mut reader: R) -> Result<()> {
    let mut buf = [0u8; 8192];
    loop {
        let n = reader.read(&mut buf).context(error::RetrievalSnafu {
            stage: "read past the end of the archive",
        })?;
        if n == 0 {
            return Ok(());
        }
        ensure!(
            buf[..n].iter().all(|b| *b == 0),
            error::RetrievalTrailingDataSnafu
        );
    }
}

/// Turn an entry name into a path relative to the destination.
fn sanitize_entry_name(name: &Path) -> Result<PathBuf> {
    let display = name.to_string_lossy();
    ensure!(
        !display.contains(".."),
        error::RetrievalUnsafePathSnafu {
            name: display.to_string()
        }
    );
    let mut relative = PathBuf::new();
    for component in name.components() {
        match component {
            Component::Normal(part) => relative.push(part),
            Component::RootDir | Component::Prefix(_) | Component::CurDir => {}
            Component::ParentDir => {
                return error::RetrievalUnsafePathSnafu {
                    name: display.to_string(),
                }
                .fail()
            }
        }
    }
    Ok(relative)
}

/// Refuse to write anything whose path inside `destination` passes through a symlink, since an
/// earlier entry may have pointed one outside of it.
fn ensure_no_symlinks(destination: &Path, relative: &Path) -> Result<()> {
    let mut current = destination.to_path_buf();
    for component in relative.components() {
        current.push(component);
        if let Ok(metadata) = fs::symlink_metadata(&current) {
            ensure!(
                !metadata.file_type().is_symlink(),
                error::RetrievalUnsafePathSnafu {
                    name: relative.to_string_lossy().to_string()
                }
            );
        }
    }
    Ok(())
}

fn create_parent(target: &Path) -> Result<()> {
    if let Some(parent) = target.parent() {
        fs::create_dir_all(parent).context(error::RetrievalSnafu {
            stage: format!("create directory '{}'", parent.display()),
        })?;
    }
    Ok(())
}

#[cfg(unix)]
fn make_symlink(link: &Path, target: &Path) -> Result<()> {
    std::os::unix::fs::symlink(link, target).context(error::RetrievalSnafu {
        stage: format!("create symlink '{}'", target.display()),
    })
}

#[cfg(not(unix))]
fn make_symlink(link: &Path, target: &Path) -> Result<()> {
    warn!(
        "Skipping symlink '{}' -> '{}' on this platform",
        target.display(),
        link.display()
    );
    Ok(())
}

#[cfg(unix)]
fn set_mode(target: &Path, mode: u32) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(target, fs::Permissions::from_mode(mode & 0o777)).context(
        error::RetrievalSnafu {
            stage: format!("set the mode of '{}'", target.display()),
        },
    )
}

#[cfg(not(unix))]
fn set_mode(_target: &Path, _mode: u32) -> Result<()> {
    Ok(())
}
