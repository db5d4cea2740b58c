//! Command implementations over a `TransferEngine`

use anyhow::{Context, Result};
use indicatif::{ProgressBar, ProgressStyle};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::cli::args::OutputFormat;
use crate::transfer::{
    default_key, DownloadResult, ObjectMetadata, TransferEngine, TransferError, TransferReport,
    TransferResult,
};

// ============================================================================
// Utility functions
// ============================================================================

/// Format bytes in human-readable form (B, KiB, MiB, GiB, TiB)
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: &[&str] = &["B", "KiB", "MiB", "GiB", "TiB", "PiB"];

    if bytes == 0 {
        return "0 B".to_string();
    }

    let bytes_f64 = bytes as f64;
    let exponent = (bytes_f64.ln() / 1024_f64.ln()).floor() as usize;
    let exponent = exponent.min(UNITS.len() - 1);

    let value = bytes_f64 / 1024_f64.powi(exponent as i32);

    if exponent == 0 {
        format!("{} {}", bytes, UNITS[exponent])
    } else {
        format!("{:.2} {}", value, UNITS[exponent])
    }
}

fn spinner(message: String) -> Result<ProgressBar> {
    let pb = ProgressBar::new_spinner();
    pb.set_style(ProgressStyle::default_spinner().template("{spinner:.cyan} [{elapsed}] {msg}")?);
    pb.set_message(message);
    pb.enable_steady_tick(Duration::from_millis(120));
    Ok(pb)
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn resolve_key(file: &Path, key: Option<String>) -> Result<String> {
    match key {
        Some(key) => Ok(key),
        None => Ok(default_key(file)?),
    }
}

fn report_upload(
    format: OutputFormat,
    file: &Path,
    key: &str,
    result: std::result::Result<TransferResult, TransferError>,
) -> Result<()> {
    if format == OutputFormat::Json {
        print_json(&TransferReport::from_result(key, &result))?;
    }
    let result = result.with_context(|| format!("Upload of {} failed", file.display()))?;

    if format == OutputFormat::Text {
        println!("{} -> {} ({})", file.display(), result.key, result.strategy);
        match result.parts {
            Some(parts) => println!("  {} uploaded in {} parts", format_bytes(result.size), parts),
            None => println!("  {} uploaded", format_bytes(result.size)),
        }
        println!("  etag {}", result.etag);
    }
    Ok(())
}

// ============================================================================
// Commands
// ============================================================================

/// Upload with the strategy chosen by size
pub async fn cmd_put(
    engine: &TransferEngine,
    format: OutputFormat,
    file: &Path,
    key: Option<String>,
) -> Result<()> {
    let key = resolve_key(file, key)?;
    let pb = spinner(format!("Uploading {}", file.display()))?;
    let result = engine.upload_auto(file, &key).await;
    pb.finish_and_clear();
    report_upload(format, file, &key, result)
}

/// Single PUT upload
pub async fn cmd_put_small(
    engine: &TransferEngine,
    format: OutputFormat,
    file: &Path,
    key: Option<String>,
) -> Result<()> {
    let key = resolve_key(file, key)?;
    let pb = spinner(format!("Uploading {}", file.display()))?;
    let result = engine.upload(file, &key).await;
    pb.finish_and_clear();
    report_upload(format, file, &key, result)
}

/// Multipart upload; `concurrency` overrides the configured value for this run
pub async fn cmd_put_large(
    engine: &TransferEngine,
    format: OutputFormat,
    file: &Path,
    key: Option<String>,
    part_size: Option<u64>,
    concurrency: Option<usize>,
) -> Result<()> {
    let key = resolve_key(file, key)?;

    let engine = match concurrency {
        Some(n) if n != engine.settings().concurrency => {
            let mut settings = engine.settings().clone();
            settings.concurrency = n;
            TransferEngine::new(engine.store().clone(), settings)
        }
        _ => engine.clone(),
    };

    let pb = spinner(format!("Uploading {} in parts", file.display()))?;
    let result = engine.upload_large(file, &key, part_size).await;
    pb.finish_and_clear();
    report_upload(format, file, &key, result)
}

/// Download to `output`, or to the key's file name in the current directory
pub async fn cmd_get(
    engine: &TransferEngine,
    format: OutputFormat,
    key: &str,
    output: Option<PathBuf>,
) -> Result<()> {
    let dest = match output {
        Some(path) => path,
        None => PathBuf::from(default_key(Path::new(key))?),
    };

    let pb = spinner(format!("Downloading {}", key))?;
    let result = engine.download_to(key, &dest).await;
    pb.finish_and_clear();

    let result: DownloadResult = match result {
        Ok(r) => r,
        Err(e) => {
            if format == OutputFormat::Json {
                print_json(&TransferReport::failure(key, &e))?;
            }
            return Err(e).with_context(|| format!("Download of {} failed", key));
        }
    };

    match format {
        OutputFormat::Json => print_json(&result)?,
        OutputFormat::Text => {
            println!("{} -> {}", key, dest.display());
            println!("  {} downloaded", format_bytes(result.size));
        }
    }
    Ok(())
}

/// List every object under `prefix`
pub async fn cmd_ls(engine: &TransferEngine, format: OutputFormat, prefix: &str) -> Result<()> {
    let objects: Vec<ObjectMetadata> = engine
        .list(prefix)
        .await
        .with_context(|| format!("Listing {:?} failed", prefix))?;

    match format {
        OutputFormat::Json => print_json(&objects)?,
        OutputFormat::Text => {
            if objects.is_empty() {
                println!("No objects found");
                return Ok(());
            }
            for obj in &objects {
                let when = obj
                    .last_modified
                    .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
                    .unwrap_or_else(|| "-".repeat(19));
                println!("{} {:>12} {}", when, format_bytes(obj.size), obj.key);
            }
            let total: u64 = objects.iter().map(|o| o.size).sum();
            println!("{} objects, {}", objects.len(), format_bytes(total));
        }
    }
    Ok(())
}

#[derive(Serialize)]
struct Deleted<'a> {
    success: bool,
    key: &'a str,
}

/// Delete one object
pub async fn cmd_rm(engine: &TransferEngine, format: OutputFormat, key: &str) -> Result<()> {
    engine
        .delete(key)
        .await
        .with_context(|| format!("Deleting {} failed", key))?;

    match format {
        OutputFormat::Json => print_json(&Deleted { success: true, key })?,
        OutputFormat::Text => println!("Removed {}", key),
    }
    Ok(())
}

#[derive(Serialize)]
struct Presigned<'a> {
    key: &'a str,
    url: String,
    expires_in: u64,
}

/// Print a presigned GET URL
pub async fn cmd_presign(
    engine: &TransferEngine,
    format: OutputFormat,
    key: &str,
    expires: u64,
) -> Result<()> {
    let url = engine.presign_download(key, Some(Duration::from_secs(expires)))?;

    match format {
        OutputFormat::Json => print_json(&Presigned {
            key,
            url,
            expires_in: expires,
        })?,
        OutputFormat::Text => println!("{}", url),
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TransferSettings;
    use crate::s3::MemoryStore;
    use std::sync::Arc;

    #[test]
    fn test_format_bytes() {
        assert_eq!(format_bytes(0), "0 B");
        assert_eq!(format_bytes(512), "512 B");
        assert_eq!(format_bytes(1024), "1.00 KiB");
        assert_eq!(format_bytes(1536), "1.50 KiB");
        assert_eq!(format_bytes(250 * 1024 * 1024), "250.00 MiB");
        assert_eq!(format_bytes(5 * 1024 * 1024 * 1024), "5.00 GiB");
    }

    #[test]
    fn test_resolve_key() {
        assert_eq!(resolve_key(Path::new("/tmp/a.txt"), None).unwrap(), "a.txt");
        assert_eq!(
            resolve_key(Path::new("/tmp/a.txt"), Some("docs/a.txt".to_string())).unwrap(),
            "docs/a.txt"
        );
    }

    #[tokio::test]
    async fn test_get_writes_to_output() {
        let store = Arc::new(MemoryStore::new("b"));
        store.insert("reports/q1.csv", bytes::Bytes::from_static(b"a,b\n"));
        let engine = TransferEngine::new(store, TransferSettings::default());
        let tmp = tempfile::tempdir().unwrap();
        let dest = tmp.path().join("out").join("q1.csv");

        cmd_get(&engine, OutputFormat::Json, "reports/q1.csv", Some(dest.clone()))
            .await
            .unwrap();
        assert_eq!(std::fs::read(dest).unwrap(), b"a,b\n");
    }

    #[tokio::test]
    async fn test_put_large_concurrency_override() {
        let store = Arc::new(MemoryStore::new("b"));
        let engine = TransferEngine::new(store.clone(), TransferSettings::default());
        let tmp = tempfile::tempdir().unwrap();
        let file = tmp.path().join("blob.bin");
        std::fs::write(&file, vec![7u8; 100]).unwrap();

        cmd_put_large(&engine, OutputFormat::Text, &file, None, Some(30), Some(3))
            .await
            .unwrap();

        assert_eq!(store.object("blob.bin").unwrap().len(), 100);
        assert_eq!(store.open_uploads(), 0);
    }
}
