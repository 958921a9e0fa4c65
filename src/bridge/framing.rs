use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

pub const TAG_FFARGS_JSON: &str = "ffargsJson";
pub const TAG_STDOUT: &str = "stdout";
pub const TAG_STDERR: &str = "stderr";

/// Upper bound on a single frame payload. The args JSON and log fragments
/// are tiny; this only exists so a corrupt header cannot ask for the moon.
pub const MAX_FRAME_LEN: u64 = 16 * 1024 * 1024;

/// Frame headers are one short ASCII line; anything longer is garbage.
const MAX_HEADER_LEN: usize = 256;

#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    /// Clean EOF at a frame boundary.
    #[error("connection closed")]
    Closed,
    #[error("malformed frame header: {0}")]
    Header(String),
    #[error("frame length out of range: {0}")]
    Length(i64),
    #[error("short frame payload")]
    ShortPayload,
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Read one `"<tag> <len>\n<payload>"` frame. Fails with a protocol error on
/// a missing separator, non-integer or negative length, or short payload.
pub async fn read_frame<R: AsyncRead + Unpin>(r: &mut R) -> Result<(String, Vec<u8>), FrameError> {
    let header = read_header_line(r).await?;

    let (tag, len_str) = header
        .split_once(' ')
        .ok_or_else(|| FrameError::Header(header.clone()))?;
    if tag.is_empty() {
        return Err(FrameError::Header(header.clone()));
    }
    let len: i64 = len_str
        .trim_end_matches('\n')
        .parse()
        .map_err(|_| FrameError::Header(header.clone()))?;
    if len < 0 || len as u64 > MAX_FRAME_LEN {
        return Err(FrameError::Length(len));
    }

    let mut payload = vec![0u8; len as usize];
    r.read_exact(&mut payload).await.map_err(|e| {
        if e.kind() == std::io::ErrorKind::UnexpectedEof {
            FrameError::ShortPayload
        } else {
            FrameError::Io(e)
        }
    })?;

    Ok((tag.to_string(), payload))
}

/// Write one frame. The header and payload go out as a single write so
/// concurrent writers on different frames can never interleave mid-frame;
/// callers still serialize frames per connection by holding the write half.
pub async fn write_frame<W: AsyncWrite + Unpin>(
    w: &mut W,
    tag: &str,
    payload: &[u8],
) -> std::io::Result<()> {
    let mut buf = Vec::with_capacity(tag.len() + 16 + payload.len());
    buf.extend_from_slice(tag.as_bytes());
    buf.extend_from_slice(format!(" {}\n", payload.len()).as_bytes());
    buf.extend_from_slice(payload);
    w.write_all(&buf).await?;
    w.flush().await
}

async fn read_header_line<R: AsyncRead + Unpin>(r: &mut R) -> Result<String, FrameError> {
    let mut line = Vec::new();
    let mut byte = [0u8; 1];
    loop {
        let n = r.read(&mut byte).await?;
        if n == 0 {
            if line.is_empty() {
                return Err(FrameError::Closed);
            }
            return Err(FrameError::ShortPayload);
        }
        if byte[0] == b'\n' {
            break;
        }
        line.push(byte[0]);
        if line.len() > MAX_HEADER_LEN {
            return Err(FrameError::Header(String::from_utf8_lossy(&line).into_owned()));
        }
    }
    String::from_utf8(line).map_err(|e| FrameError::Header(e.to_string()))
}
