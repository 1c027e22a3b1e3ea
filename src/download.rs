use indicatif::{ProgressBar, ProgressStyle};
use reqwest::blocking::Response;
use std::fs::File;
use std::io::{Read, Write};
use std::path::Path;

use crate::error::Result;

/// Bytes read from the response before each write.
pub(crate) const CHUNK_SIZE: usize = 64 * 1024;

/// Streams `resp` into `target`, truncating any existing file.
///
/// Each chunk is written before the next one is read, so memory stays bounded
/// by [`CHUNK_SIZE`] whatever the payload size. Returns the number of bytes written.
pub(crate) fn stream_to_file(mut resp: Response, target: &Path, progress: bool) -> Result<u64> {
    let pb = if progress {
        let pb = match resp.content_length() {
            Some(len) => ProgressBar::new(len),
            None => ProgressBar::no_length(),
        };
        if let Ok(style) = ProgressStyle::with_template(
            "{spinner:.green} {bytes}/{total_bytes} ({bytes_per_sec}) {wide_bar} {eta}",
        ) {
            pb.set_style(style.progress_chars("=>-"));
        }
        Some(pb)
    } else {
        None
    };

    let mut out = File::create(target)?;
    let mut buf = vec![0u8; CHUNK_SIZE];
    let mut written: u64 = 0;

    loop {
        let n = resp.read(&mut buf)?;
        if n == 0 {
            break;
        }
        out.write_all(&buf[..n])?;
        written += n as u64;
        if let Some(pb) = &pb {
            pb.inc(n as u64);
        }
    }

    out.flush()?;
    if let Some(pb) = &pb {
        pb.finish_and_clear();
    }
    Ok(written)
}
