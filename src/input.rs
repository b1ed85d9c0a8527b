//! File-backed input sequences
//!
//! Input lists are read lazily, one identifier per line. A sequence is
//! single-pass: resuming means re-opening the file and skipping to the cursor.

use std::fs::File;
use std::io::{BufRead, BufReader, Lines};
use std::path::{Path, PathBuf};

/// Errors reading an input list
#[derive(Debug, thiserror::Error)]
pub enum InputError {
    /// Could not open the input
    #[error("failed to open input {path}: {reason}")]
    Open {
        /// Input path
        path: PathBuf,
        /// OS error
        reason: String,
    },

    /// Could not read a line
    #[error("failed to read input at line {line}: {reason}")]
    Read {
        /// 1-based line number
        line: u64,
        /// OS error
        reason: String,
    },

    /// The input ended before the resume cursor
    #[error("input has {available} items, fewer than the {cursor} already processed")]
    TooShort {
        /// Items available
        available: u64,
        /// Cursor to skip to
        cursor: u64,
    },
}

/// Lazy iterator over the non-blank, trimmed lines of a file
pub struct FileInput {
    path: PathBuf,
    lines: Lines<BufReader<File>>,
    line: u64,
}

impl FileInput {
    /// Open `path` for reading
    pub fn open(path: impl AsRef<Path>) -> Result<Self, InputError> {
        let path = path.as_ref().to_path_buf();
        let file = File::open(&path).map_err(|e| InputError::Open {
            path: path.clone(),
            reason: e.to_string(),
        })?;
        Ok(Self {
            path,
            lines: BufReader::new(file).lines(),
            line: 0,
        })
    }

    /// Path being read
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Iterator for FileInput {
    type Item = Result<String, InputError>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let line = self.lines.next()?;
            self.line += 1;
            match line {
                Ok(text) => {
                    let item = text.trim();
                    if !item.is_empty() {
                        return Some(Ok(item.to_string()));
                    }
                }
                Err(e) => {
                    return Some(Err(InputError::Read {
                        line: self.line,
                        reason: e.to_string(),
                    }))
                }
            }
        }
    }
}

/// Count the items `FileInput` would yield, streaming the file
pub fn count_items(path: impl AsRef<Path>) -> Result<u64, InputError> {
    let mut count = 0;
    for item in FileInput::open(path)? {
        item?;
        count += 1;
    }
    Ok(count)
}

/// Advance `input` past the first `cursor` items.
///
/// Fails with [`InputError::TooShort`] if the input ends first.
pub fn skip_items<I>(input: &mut I, cursor: u64) -> Result<(), InputError>
where
    I: Iterator<Item = Result<String, InputError>>,
{
    let mut skipped = 0;
    while skipped < cursor {
        match input.next() {
            Some(item) => {
                item?;
                skipped += 1;
            }
            None => {
                return Err(InputError::TooShort {
                    available: skipped,
                    cursor,
                })
            }
        }
    }
    Ok(())
}
