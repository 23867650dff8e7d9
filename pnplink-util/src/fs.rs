use std::fs;
use std::io::{self, Write};
use std::path::Path;

use rand::Rng;
use rand::distr::Alphanumeric;

/// Atomically creates a file with the given contents, overwriting
/// it if one exists.
///
/// The buffer is first written into a sibling temporary file which is
/// synced and then renamed over the destination, so a power loss leaves
/// either the old or the new document on disk, never a truncated one.
pub fn safe_write_all<P: AsRef<Path>, B: AsRef<[u8]>>(path: P, buf: B) -> io::Result<()> {
    let suffix: String = rand::rng()
        .sample_iter(&Alphanumeric)
        .take(6)
        .map(char::from)
        .collect();
    let tmp_path = path.as_ref().with_extension(format!("sync-{suffix}"));
    let mut tmp_file = fs::File::create(&tmp_path)?;

    tmp_file.write_all(buf.as_ref())?;
    tmp_file.flush()?;
    tmp_file.sync_all()?;
    drop(tmp_file);

    fs::rename(&tmp_path, path.as_ref())
}

/// Run blocking file operations on the blocking thread pool when called
/// from within a Tokio runtime, synchronously otherwise
pub async fn run_async<F, T>(f: F) -> io::Result<T>
where
    F: FnOnce() -> io::Result<T> + Send + 'static,
    T: Send + 'static,
{
    use tokio::runtime;

    match runtime::Handle::try_current() {
        Ok(handle) => handle.spawn_blocking(f).await.map_err(io::Error::from)?,
        Err(_) => f(),
    }
}
