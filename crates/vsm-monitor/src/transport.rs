//! Line sources for a session: recorded files, stdin and paced replay

use std::path::Path;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWriteExt, BufReader, DuplexStream};
use tokio::time::{interval, Duration, MissedTickBehavior};
use tracing::{debug, warn};
use vsm_core::{VsmError, VsmResult};

/// Boxed line-oriented transport
pub type LineSource = Box<dyn AsyncBufRead + Unpin + Send>;

/// Interval between paced chunks
const PACE_CHUNK: Duration = Duration::from_millis(50);

/// Open a recorded capture.
///
/// With `lines_per_second` set, lines are re-emitted at that rate the way
/// the device produced them; otherwise the file is read as fast as the
/// session consumes it.
pub async fn open_replay(
    path: impl AsRef<Path>,
    lines_per_second: Option<f64>,
) -> VsmResult<LineSource> {
    let path = path.as_ref();
    let file = tokio::fs::File::open(path).await.map_err(|e| VsmError::Transport {
        reason: format!("cannot open {}: {}", path.display(), e),
    })?;
    let reader = BufReader::new(file);

    let source: LineSource = match lines_per_second {
        Some(rate) => Box::new(BufReader::new(paced_lines(reader, rate))),
        None => Box::new(reader),
    };
    Ok(source)
}

/// Lines from standard input, e.g. piped from a serial terminal
pub fn stdin_source() -> LineSource {
    Box::new(BufReader::new(tokio::io::stdin()))
}

/// Re-emit the lines of `source` at `lines_per_second` through a pipe.
///
/// The returned read half reaches EOF after the last source line.
pub fn paced_lines<R>(source: R, lines_per_second: f64) -> DuplexStream
where
    R: AsyncBufRead + Unpin + Send + 'static,
{
    let (mut writer, reader) = tokio::io::duplex(64 * 1024);
    let per_chunk = (lines_per_second * PACE_CHUNK.as_secs_f64()).round().max(1.0) as usize;

    tokio::spawn(async move {
        let mut lines = source.lines();
        let mut ticker = interval(PACE_CHUNK);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Burst);
        let mut written = 0u64;

        'outer: loop {
            ticker.tick().await;
            let mut chunk = String::new();
            for _ in 0..per_chunk {
                match lines.next_line().await {
                    Ok(Some(line)) => {
                        chunk.push_str(&line);
                        chunk.push('\n');
                        written += 1;
                    }
                    Ok(None) => {
                        let _ = writer.write_all(chunk.as_bytes()).await;
                        break 'outer;
                    }
                    Err(e) => {
                        warn!(error = %e, "Replay source failed");
                        break 'outer;
                    }
                }
            }
            if writer.write_all(chunk.as_bytes()).await.is_err() {
                break;
            }
        }

        let _ = writer.shutdown().await;
        debug!(lines = written, "Paced replay finished");
    });

    reader
}
