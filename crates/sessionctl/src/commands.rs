use std::io::Write;
use std::path::Path;

use anyhow::{Context, Result};
use sessionfs::{OpenFlags, SessionConfig, SessionEngine, Whence};
use tracing::{debug, info};

pub fn show_config(config: &SessionConfig) {
    print!("{}", config.to_toml());
}

pub fn cat(config: SessionConfig, path: &Path) -> Result<()> {
    let engine = SessionEngine::new(config);
    let handle = engine
        .open_path(path, OpenFlags::READ | OpenFlags::SESSION)
        .with_context(|| format!("failed to open {}", path.display()))?;

    let mut stdout = std::io::stdout().lock();
    let mut buf = [0u8; 4096];
    loop {
        let n = handle.read(&mut buf)?;
        if n == 0 {
            break;
        }
        stdout.write_all(&buf[..n])?;
    }
    stdout.flush()?;

    debug!(path = %path.display(), bytes = handle.position(), "read complete");
    Ok(())
}

pub fn write(
    config: SessionConfig,
    path: &Path,
    offset: u64,
    create: bool,
    text: &str,
) -> Result<()> {
    let engine = SessionEngine::new(config);
    let mut flags = OpenFlags::read_write() | OpenFlags::SESSION;
    if create {
        flags |= OpenFlags::CREATE;
    }

    let handle = engine
        .open_path(path, flags)
        .with_context(|| format!("failed to open {}", path.display()))?;

    let offset = i64::try_from(offset).context("offset too large")?;
    handle.seek(offset, Whence::Start)?;
    let written = handle.write(text.as_bytes())?;
    if written < text.len() {
        anyhow::bail!(
            "only {} of {} bytes fit in the session buffer",
            written,
            text.len()
        );
    }

    handle
        .close()
        .map_err(|e| e.error)
        .with_context(|| format!("failed to commit {}", path.display()))?;

    info!(path = %path.display(), offset, bytes = written, "committed");
    println!("wrote {} bytes at offset {} to {}", written, offset, path.display());
    Ok(())
}
