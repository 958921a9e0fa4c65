use std::io::Read;
use std::path::Path;

use crc32fast::Hasher;

/// Lowercase 8-hex rendering used everywhere a CRC-32 appears on the wire
/// or in a sidecar.
pub fn crc32_hex(sum: u32) -> String {
    format!("{:08x}", sum)
}

pub fn crc32_of_bytes(data: &[u8]) -> u32 {
    let mut hasher = Hasher::new();
    hasher.update(data);
    hasher.finalize()
}

/// Streaming CRC-32 of a file's contents. Blocking; callers on the async
/// side go through `spawn_blocking`.
pub fn crc32_of_file(path: &Path) -> std::io::Result<String> {
    let mut file = std::fs::File::open(path)?;
    let mut hasher = Hasher::new();
    let mut buf = vec![0u8; 64 * 1024];
    loop {
        let n = file.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(crc32_hex(hasher.finalize()))
}
