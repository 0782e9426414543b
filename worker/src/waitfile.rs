/*!

The waitfile protocol between a plugin and its worker.

The plugin writes the path of its result into the done file. The worker polls for that file, gives
a postprocessing sidecar a grace period to delete it again, and then hands the path on for upload.
If the plugin exits cleanly without ever writing the done file, the worker archives the whole
results directory itself and writes the done file for it.

!*/

use crate::error::{self, Result};
use crate::monitor::ContainerMonitor;
use flate2::write::GzEncoder;
use flate2::Compression;
use log::{debug, info, warn};
use snafu::ResultExt;
use std::fs::{self, File};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tar::Builder;
use tokio::time::{sleep, MissedTickBehavior};

/// The archive the worker creates when the plugin did not write a done file.
pub const FALLBACK_ARCHIVE: &str = "results.tar.gz";
const POLL_INTERVAL: Duration = Duration::from_secs(1);
const FALLBACK_GRACE: Duration = Duration::from_secs(5);

#[derive(Debug, Clone)]
pub struct Waitfile {
    pub results_dir: PathBuf,
    pub done_file: PathBuf,
    /// How long the done file has to stick around before it counts.
    pub grace: Duration,
    pub poll_interval: Duration,
    /// How long to wait for a done file after the plugin exited.
    pub fallback_grace: Duration,
}

impl Waitfile {
    pub fn new<P1, P2>(results_dir: P1, done_file: P2, grace: Duration) -> Self
    where
        P1: Into<PathBuf>,
        P2: Into<PathBuf>,
    {
        Self {
            results_dir: results_dir.into(),
            done_file: done_file.into(),
            grace,
            poll_interval: POLL_INTERVAL,
            fallback_grace: FALLBACK_GRACE,
        }
    }

    /// Wait until the plugin is done and return the path of the result to upload.
    pub async fn wait_for_result(&self, monitor: &dyn ContainerMonitor) -> Result<PathBuf> {
        let mut interval = tokio::time::interval(self.poll_interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            interval.tick().await;

            if self.done_file.exists() {
                debug!(
                    "Found '{}', waiting {:?} before using it",
                    self.done_file.display(),
                    self.grace
                );
                sleep(self.grace).await;
                if !self.done_file.exists() {
                    info!(
                        "'{}' was removed during the grace period, waiting for it again",
                        self.done_file.display()
                    );
                    continue;
                }
                return self.read_done_file();
            }

            match monitor.others_succeeded().await {
                Ok(false) => {}
                Ok(true) => {
                    info!(
                        "The plugin exited without writing '{}', waiting {:?} for it",
                        self.done_file.display(),
                        self.fallback_grace
                    );
                    sleep(self.fallback_grace).await;
                    if self.done_file.exists() {
                        continue;
                    }
                    let archive = self.archive_results().await?;
                    self.write_done_file(&archive)?;
                    return Ok(archive);
                }
                Err(e) => warn!("{}", e),
            }
        }
    }

    fn read_done_file(&self) -> Result<PathBuf> {
        let contents =
            fs::read_to_string(&self.done_file).context(error::FileSnafu {
                action: "read",
                path: &self.done_file,
            })?;
        let result = PathBuf::from(contents.trim());
        info!("The plugin's result is '{}'", result.display());
        Ok(result)
    }

    fn write_done_file(&self, result: &Path) -> Result<()> {
        fs::write(&self.done_file, result.to_string_lossy().as_bytes()).context(
            error::FileSnafu {
                action: "write",
                path: &self.done_file,
            },
        )
    }

    /// Archive everything in the results directory into `FALLBACK_ARCHIVE` inside it.
    async fn archive_results(&self) -> Result<PathBuf> {
        let results_dir = self.results_dir.clone();
        let done_file = self.done_file.clone();
        tokio::task::spawn_blocking(move || archive_dir(&results_dir, &done_file))
            .await
            .context(error::JoinSnafu)?
    }
}

fn archive_dir(results_dir: &Path, done_file: &Path) -> Result<PathBuf> {
    let archive_path = results_dir.join(FALLBACK_ARCHIVE);
    let context = || error::ArchiveSnafu {
        path: results_dir.to_path_buf(),
    };
    let mut entries = fs::read_dir(results_dir)
        .with_context(|_| context())?
        .map(|entry| entry.map(|entry| entry.path()))
        .collect::<std::io::Result<Vec<_>>>()
        .with_context(|_| context())?;
    entries.retain(|path| path != &archive_path && path != done_file);
    entries.sort();

    let file = File::create(&archive_path).with_context(|_| context())?;
    let mut builder = Builder::new(GzEncoder::new(file, Compression::default()));
    for path in entries {
        let name = match path.file_name() {
            Some(name) => PathBuf::from(name),
            None => continue,
        };
        if path.is_dir() {
            builder
                .append_dir_all(&name, &path)
                .with_context(|_| context())?;
        } else {
            builder
                .append_path_with_name(&path, &name)
                .with_context(|_| context())?;
        }
    }
    builder
        .into_inner()
        .and_then(|encoder| encoder.finish())
        .with_context(|_| context())?;
    info!("Archived '{}' into '{}'", results_dir.display(), archive_path.display());
    Ok(archive_path)
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::monitor::NoMonitor;
    use async_trait::async_trait;
    use flate2::read::GzDecoder;
    use tar::Archive;
    use tempfile::TempDir;

    struct PluginExited;

    #[async_trait]
    impl ContainerMonitor for PluginExited {
        async fn others_succeeded(&self) -> Result<bool> {
            Ok(true)
        }
    }

    fn waitfile(dir: &Path) -> Waitfile {
        Waitfile::new(dir, dir.join("done"), Duration::from_secs(5))
    }

    #[tokio::test(start_paused = true)]
    async fn done_file_is_used_after_the_grace_period() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("done"), "/tmp/sonobuoy/results/junit_01.xml\n").unwrap();
        let result = waitfile(dir.path())
            .wait_for_result(&NoMonitor)
            .await
            .unwrap();
        assert_eq!(result, PathBuf::from("/tmp/sonobuoy/results/junit_01.xml"));
    }

    #[tokio::test(start_paused = true)]
    async fn done_file_removed_during_the_grace_period_is_ignored() {
        let dir = TempDir::new().unwrap();
        let done = dir.path().join("done");
        fs::write(&done, "first.tar.gz").unwrap();

        let sidecar_done = done.clone();
        let sidecar = tokio::spawn(async move {
            // A postprocessing sidecar takes the result away and later hands in its own.
            sleep(Duration::from_secs(2)).await;
            fs::remove_file(&sidecar_done).unwrap();
            sleep(Duration::from_secs(8)).await;
            fs::write(&sidecar_done, "second.tar.gz").unwrap();
        });

        let result = waitfile(dir.path())
            .wait_for_result(&NoMonitor)
            .await
            .unwrap();
        sidecar.await.unwrap();
        assert_eq!(result, PathBuf::from("second.tar.gz"));
    }

    #[tokio::test(start_paused = true)]
    async fn results_are_archived_when_the_plugin_exits_silently() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("junit_01.xml"), "<testsuites/>").unwrap();
        fs::create_dir(dir.path().join("logs")).unwrap();
        fs::write(dir.path().join("logs").join("e2e.log"), "ok\n").unwrap();

        let result = waitfile(dir.path())
            .wait_for_result(&PluginExited)
            .await
            .unwrap();
        assert_eq!(result, dir.path().join(FALLBACK_ARCHIVE));
        assert_eq!(
            fs::read_to_string(dir.path().join("done")).unwrap(),
            result.to_string_lossy()
        );

        let mut names: Vec<String> = Archive::new(GzDecoder::new(File::open(&result).unwrap()))
            .entries()
            .unwrap()
            .map(|entry| entry.unwrap().path().unwrap().to_string_lossy().to_string())
            .collect();
        names.sort();
        assert!(names.contains(&"junit_01.xml".to_string()), "{:?}", names);
        assert!(names.contains(&"logs/e2e.log".to_string()), "{:?}", names);
        assert!(!names.iter().any(|name| name.contains(FALLBACK_ARCHIVE)));
    }
}
