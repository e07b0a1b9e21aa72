use std::fs;
use std::io::{self, Write};
use std::path::Path;

use super::crypto::{pseudorandom_string, ALPHA_NUM};

/// Replace a file's contents atomically.
///
/// The buffer goes to a randomly named sibling first and only lands on
/// the final path through a rename, after syncing, so a crash mid-write
/// leaves either the old contents or the new ones but never a torn mix.
/// The token cache relies on this: a half-written cache would be worse
/// than none.
pub fn safe_write_all<P: AsRef<Path>, B: AsRef<[u8]>>(path: P, buf: B) -> io::Result<()> {
    let path = path.as_ref();
    let tmp_path = path.with_extension(format!("tmp-{}", pseudorandom_string(ALPHA_NUM, 6)));

    let mut tmp_file = fs::File::create(&tmp_path)?;
    tmp_file.write_all(buf.as_ref())?;
    tmp_file.sync_all()?;
    drop(tmp_file);

    fs::rename(&tmp_path, path)
}
